use std::collections::HashMap;

use parking_lot::Mutex;

use super::{MetricKind, MetricSink, SinkError};
use crate::labels::LabelSet;

/// A recorded metric sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub kind: MetricKind,
    pub name: String,
    pub value: f64,
    pub labels: LabelSet,
}

/// In-memory sink that keeps every emission, used by tests and benchmarks.
#[derive(Default)]
pub struct MemorySink {
    samples: Mutex<Vec<Sample>>,
    counters: Mutex<HashMap<(String, String), f64>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All emissions, oldest first.
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().clone()
    }

    /// Emissions recorded under `name`.
    pub fn emissions(&self, name: &str) -> Vec<Sample> {
        self.samples
            .lock()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    /// Latest value of gauge `name` under exactly `labels`.
    pub fn gauge(&self, name: &str, labels: &LabelSet) -> Option<f64> {
        self.samples
            .lock()
            .iter()
            .rev()
            .find(|s| s.kind == MetricKind::Gauge && s.name == name && &s.labels == labels)
            .map(|s| s.value)
    }

    /// Current value of counter `name` under exactly `labels`.
    pub fn counter(&self, name: &str, labels: &LabelSet) -> f64 {
        self.counters
            .lock()
            .get(&(name.to_string(), labels.to_string()))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
        self.counters.lock().clear();
    }
}

impl MetricSink for MemorySink {
    fn set(&self, name: &str, value: f64, labels: &LabelSet) -> Result<(), SinkError> {
        self.samples.lock().push(Sample {
            kind: MetricKind::Gauge,
            name: name.to_string(),
            value,
            labels: labels.clone(),
        });
        Ok(())
    }

    fn increment(&self, name: &str, labels: &LabelSet) -> Result<(), SinkError> {
        let value = {
            let mut counters = self.counters.lock();
            let count = counters
                .entry((name.to_string(), labels.to_string()))
                .or_insert(0.0);
            *count += 1.0;
            *count
        };
        self.samples.lock().push(Sample {
            kind: MetricKind::Counter,
            name: name.to_string(),
            value,
            labels: labels.clone(),
        });
        Ok(())
    }
}
