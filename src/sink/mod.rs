pub mod memory;
pub mod prom;

use std::sync::Arc;

use thiserror::Error;

use crate::labels::LabelSet;

pub use self::memory::MemorySink;
pub use self::prom::PrometheusSink;

/// The kind of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

/// Errors raised when recording a metric sample.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("metric {name} registered with labels [{expected}], got [{got}]")]
    LabelSchema {
        name: String,
        expected: String,
        got: String,
    },

    #[error("metric {name} registered as {expected}, used as {got}")]
    KindMismatch {
        name: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("registering metric {name}: {source}")]
    Registry {
        name: String,
        #[source]
        source: prometheus::Error,
    },
}

/// Destination for metric samples.
///
/// Gauges are last-write-wins; counters only ever go up. The label key set
/// used for a given name must not change between calls.
pub trait MetricSink: Send + Sync {
    /// Set gauge `name` under `labels` to `value`.
    fn set(&self, name: &str, value: f64, labels: &LabelSet) -> Result<(), SinkError>;

    /// Increment counter `name` under `labels` by one.
    fn increment(&self, name: &str, labels: &LabelSet) -> Result<(), SinkError>;
}

impl<S: MetricSink + ?Sized> MetricSink for Arc<S> {
    fn set(&self, name: &str, value: f64, labels: &LabelSet) -> Result<(), SinkError> {
        (**self).set(name, value, labels)
    }

    fn increment(&self, name: &str, labels: &LabelSet) -> Result<(), SinkError> {
        (**self).increment(name, labels)
    }
}

impl<S: MetricSink + ?Sized> MetricSink for &S {
    fn set(&self, name: &str, value: f64, labels: &LabelSet) -> Result<(), SinkError> {
        (**self).set(name, value, labels)
    }

    fn increment(&self, name: &str, labels: &LabelSet) -> Result<(), SinkError> {
        (**self).increment(name, labels)
    }
}

/// Joins label keys for error messages.
fn join_keys<'a>(keys: impl Iterator<Item = &'a str>) -> String {
    keys.collect::<Vec<_>>().join(",")
}
