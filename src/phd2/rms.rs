//! Windowed RMS of guide-step tracking error.
//!
//! Four raw signals are tracked, the RA and DEC distances in both the raw
//! and guide representations. Two combined signals are derived on demand as
//! the per-sample hypotenuse of the RA/DEC pair of each representation.

use std::collections::VecDeque;

use super::event::field_value;
use super::Record;
use crate::labels::LabelSet;
use crate::sink::{MetricSink, SinkError};

pub const METRIC_RMS: &str = "rms";
pub const LABEL_SOURCE: &str = "source";
pub const LABEL_SCALE: &str = "scale";
pub const SCALE_PX: &str = "px";
pub const SCALE_ARCSEC: &str = "arcsec";

/// Default number of samples per window.
pub const DEFAULT_SAMPLES: usize = 10;

/// A tracking-error signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    DecRaw,
    DecGuide,
    RaRaw,
    RaGuide,
    TotalRaw,
    TotalGuide,
}

impl Signal {
    /// Signals read from GuideStep events.
    pub const RAW: [Signal; 4] = [Self::DecRaw, Self::DecGuide, Self::RaRaw, Self::RaGuide];

    /// Every reported signal, raw then combined.
    pub const ALL: [Signal; 6] = [
        Self::DecRaw,
        Self::DecGuide,
        Self::RaRaw,
        Self::RaGuide,
        Self::TotalRaw,
        Self::TotalGuide,
    ];

    /// Source label, which for raw signals is also the GuideStep field name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DecRaw => "DECDistanceRaw",
            Self::DecGuide => "DECDistanceGuide",
            Self::RaRaw => "RADistanceRaw",
            Self::RaGuide => "RADistanceGuide",
            Self::TotalRaw => "TotalDistanceRaw",
            Self::TotalGuide => "TotalDistanceGuide",
        }
    }

    /// Index into the raw windows, `None` for combined signals.
    const fn raw_index(self) -> Option<usize> {
        match self {
            Self::DecRaw => Some(0),
            Self::DecGuide => Some(1),
            Self::RaRaw => Some(2),
            Self::RaGuide => Some(3),
            Self::TotalRaw | Self::TotalGuide => None,
        }
    }
}

/// One guide step's worth of raw samples. Any may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RmsSample {
    values: [Option<f64>; 4],
}

impl RmsSample {
    /// A sample with all four signals present.
    pub fn new(ra_raw: f64, dec_raw: f64, ra_guide: f64, dec_guide: f64) -> Self {
        Self {
            values: [Some(dec_raw), Some(dec_guide), Some(ra_raw), Some(ra_guide)],
        }
    }

    pub fn from_record(record: &Record) -> Self {
        Self {
            values: Signal::RAW.map(|s| field_value(record, s.as_str())),
        }
    }

    pub fn get(&self, signal: Signal) -> Option<f64> {
        signal.raw_index().and_then(|i| self.values[i])
    }
}

/// Fixed-size sliding windows over the raw signals.
#[derive(Debug, Clone)]
pub struct RmsTracker {
    capacity: usize,
    windows: [VecDeque<f64>; 4],
}

impl RmsTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            windows: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a sample, evicting the oldest value of full windows.
    ///
    /// Returns `true` when every signal was present and every window now
    /// holds exactly `capacity` samples.
    pub fn collect(&mut self, sample: &RmsSample) -> bool {
        let mut ready = true;

        for (window, value) in self.windows.iter_mut().zip(sample.values) {
            let Some(value) = value else {
                ready = false;
                continue;
            };

            if window.len() >= self.capacity {
                window.pop_front();
            }
            window.push_back(value);

            if window.len() < self.capacity {
                ready = false;
            }
        }

        ready
    }

    /// Clears every window.
    pub fn reset(&mut self) {
        for window in &mut self.windows {
            window.clear();
        }
    }

    /// Number of samples currently held for a raw signal.
    pub fn len(&self, signal: Signal) -> usize {
        match signal.raw_index() {
            Some(i) => self.windows[i].len(),
            None => self.window(signal).len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.windows.iter().all(VecDeque::is_empty)
    }

    /// Window contents for a signal, oldest first.
    pub fn window(&self, signal: Signal) -> Vec<f64> {
        match signal {
            Signal::TotalRaw => self.combined(Signal::RaRaw, Signal::DecRaw),
            Signal::TotalGuide => self.combined(Signal::RaGuide, Signal::DecGuide),
            raw => raw
                .raw_index()
                .map(|i| self.windows[i].iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    fn combined(&self, ra: Signal, dec: Signal) -> Vec<f64> {
        let ra = self.window(ra);
        let dec = self.window(dec);
        ra.iter().zip(&dec).map(|(r, d)| r.hypot(*d)).collect()
    }

    /// RMS of a signal's window, `None` while the window is empty.
    pub fn rms(&self, signal: Signal) -> Option<f64> {
        rms(&self.window(signal))
    }

    /// Emits the `rms` gauge for every signal.
    ///
    /// Values are in pixels; when `pixel_scale` is known they are also emitted
    /// in arcseconds. Windows are not modified. Returns the number of samples
    /// emitted.
    pub fn compute_and_emit<S: MetricSink + ?Sized>(
        &self,
        pixel_scale: f64,
        sink: &S,
    ) -> Result<usize, SinkError> {
        let mut emitted = 0;

        for signal in Signal::ALL {
            let Some(rms_px) = self.rms(signal) else {
                continue;
            };

            let labels = LabelSet::new().with(LABEL_SOURCE, signal.as_str());

            sink.set(METRIC_RMS, rms_px, &labels.with(LABEL_SCALE, SCALE_PX))?;
            emitted += 1;

            if pixel_scale > 0.0 {
                sink.set(
                    METRIC_RMS,
                    rms_px * pixel_scale,
                    &labels.with(LABEL_SCALE, SCALE_ARCSEC),
                )?;
                emitted += 1;
            }
        }

        tracing::trace!(emitted, pixel_scale, "exported rms");

        Ok(emitted)
    }
}

impl Default for RmsTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLES)
    }
}

/// Root mean square of `values`.
pub fn rms(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum_sq: f64 = values.iter().map(|v| v * v).sum();
    Some((sum_sq / values.len() as f64).sqrt())
}
