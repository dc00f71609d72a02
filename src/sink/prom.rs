use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::Mutex;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

use super::{join_keys, MetricKind, MetricSink, SinkError};
use crate::labels::LabelSet;

/// A [`MetricSink`] backed by a Prometheus registry.
///
/// Metric families are registered lazily on first use, under the configured
/// namespace. The label keys seen on that first call become the family's
/// schema; later calls with a different key set are rejected.
pub struct PrometheusSink {
    registry: Registry,
    namespace: String,
    families: Mutex<HashMap<String, Family>>,
}

struct Family {
    metric: Metric,
    keys: Vec<String>,
}

enum Metric {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

impl Metric {
    fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }
}

impl PrometheusSink {
    /// Creates a sink with its own registry.
    pub fn new(namespace: &str) -> Self {
        Self::with_registry(Registry::new(), namespace)
    }

    /// Creates a sink registering into an existing registry.
    pub fn with_registry(registry: Registry, namespace: &str) -> Self {
        Self {
            registry,
            namespace: namespace.to_string(),
            families: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the underlying registry, for serving.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of metric families registered so far.
    pub fn family_count(&self) -> usize {
        self.families.lock().len()
    }

    fn record(
        &self,
        name: &str,
        kind: MetricKind,
        labels: &LabelSet,
        apply: impl FnOnce(&Metric, &[&str]),
    ) -> Result<(), SinkError> {
        let mut families = self.families.lock();

        let family = match families.entry(name.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(self.register(name, kind, labels)?),
        };

        if family.metric.kind() != kind {
            return Err(SinkError::KindMismatch {
                name: name.to_string(),
                expected: family.metric.kind().as_str(),
                got: kind.as_str(),
            });
        }

        if !family.keys.iter().map(String::as_str).eq(labels.keys()) {
            return Err(SinkError::LabelSchema {
                name: name.to_string(),
                expected: join_keys(family.keys.iter().map(String::as_str)),
                got: join_keys(labels.keys()),
            });
        }

        let values: Vec<&str> = labels.values().collect();
        apply(&family.metric, &values);

        Ok(())
    }

    fn register(&self, name: &str, kind: MetricKind, labels: &LabelSet) -> Result<Family, SinkError> {
        let keys: Vec<&str> = labels.keys().collect();
        let registry_err = |source| SinkError::Registry {
            name: name.to_string(),
            source,
        };

        let metric = match kind {
            MetricKind::Gauge => {
                let opts = Opts::new(name, format!("PHD2 {name}.")).namespace(self.namespace.as_str());
                Metric::Gauge(GaugeVec::new(opts, &keys).map_err(registry_err)?)
            }
            MetricKind::Counter => {
                let opts = Opts::new(format!("{name}_total"), format!("Total PHD2 {name}."))
                    .namespace(self.namespace.as_str());
                Metric::Counter(CounterVec::new(opts, &keys).map_err(registry_err)?)
            }
        };

        match &metric {
            Metric::Gauge(v) => self.registry.register(Box::new(v.clone())),
            Metric::Counter(v) => self.registry.register(Box::new(v.clone())),
        }
        .map_err(registry_err)?;

        tracing::debug!(name, kind = kind.as_str(), labels = ?keys, "registered metric family");

        Ok(Family {
            metric,
            keys: keys.into_iter().map(str::to_string).collect(),
        })
    }
}

impl MetricSink for PrometheusSink {
    fn set(&self, name: &str, value: f64, labels: &LabelSet) -> Result<(), SinkError> {
        self.record(name, MetricKind::Gauge, labels, |metric, values| {
            if let Metric::Gauge(v) = metric {
                v.with_label_values(values).set(value);
            }
        })
    }

    fn increment(&self, name: &str, labels: &LabelSet) -> Result<(), SinkError> {
        self.record(name, MetricKind::Counter, labels, |metric, values| {
            if let Metric::Counter(v) = metric {
                v.with_label_values(values).inc();
            }
        })
    }
}
