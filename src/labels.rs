use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// An immutable, ordered set of metric labels.
///
/// Keys are kept sorted so the label schema of a metric family is stable no
/// matter the order labels were added in. Extending a set yields a new value;
/// the original is never touched, so a sample recorded with one set cannot be
/// altered by later changes to the session identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this set with `key` set to `value`.
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = self.labels.clone();
        labels.insert(key.into(), value.into());
        Self { labels }
    }

    /// Returns a copy of this set extended with every label in `other`.
    #[must_use]
    pub fn merge(&self, other: &LabelSet) -> Self {
        let mut labels = self.labels.clone();
        for (k, v) in &other.labels {
            labels.insert(k.clone(), v.clone());
        }
        Self { labels }
    }

    /// Builds labels from fields of an event record.
    ///
    /// Every key is always present in the result; a missing field defaults to
    /// `0` so the label schema of the metric never changes between events.
    pub fn from_fields(record: &serde_json::Map<String, Value>, keys: &[&str]) -> Self {
        let mut labels = BTreeMap::new();
        for key in keys {
            let value = record.get(*key).map_or_else(|| "0".to_string(), label_value);
            labels.insert((*key).to_string(), value);
        }
        Self { labels }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Label names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    /// Label values, ordered to match [`LabelSet::keys`].
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.labels.values().map(String::as_str)
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v:?}")?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            labels: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// The (host, instance) pair that tags every metric of a guider session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub host: String,
    pub inst: String,
}

impl Identity {
    /// Creates an identity, lower-casing the host for label stability.
    pub fn new(host: &str, inst: impl Into<String>) -> Self {
        Self {
            host: host.to_lowercase(),
            inst: inst.into(),
        }
    }

    /// Reads the identity from the `Host` and `Inst` fields of a record.
    pub fn from_record(record: &serde_json::Map<String, Value>) -> Option<Self> {
        let host = record.get("Host")?.as_str()?;
        let inst = record.get("Inst").map(label_value)?;
        Some(Self::new(host, inst))
    }

    pub fn labels(&self) -> LabelSet {
        LabelSet::new()
            .with("host", self.host.as_str())
            .with("inst", self.inst.as_str())
    }
}

/// Renders a JSON value as a label value. Booleans become `1`/`0`.
fn label_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
        Value::Null => "0".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn test_with_does_not_mutate_original() {
        let base = LabelSet::new().with("host", "foo");
        let extended = base.with("status", "Guiding");

        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
        assert_eq!(extended.get("status"), Some("Guiding"));
        assert_eq!(base.get("status"), None);
    }

    #[test]
    fn test_keys_are_sorted() {
        let labels = LabelSet::new().with("status", "x").with("host", "h").with("inst", "1");
        let keys: Vec<&str> = labels.keys().collect();
        assert_eq!(keys, vec!["host", "inst", "status"]);
        let values: Vec<&str> = labels.values().collect();
        assert_eq!(values, vec!["h", "1", "x"]);
    }

    #[test]
    fn test_from_fields_defaults_missing_to_zero() {
        let data = record(json!({"RADirection": "West"}));
        let labels = LabelSet::from_fields(&data, &["RADirection", "RALimited"]);

        assert_eq!(labels.get("RADirection"), Some("West"));
        assert_eq!(labels.get("RALimited"), Some("0"));
    }

    #[test]
    fn test_from_fields_renders_booleans_and_numbers() {
        let data = record(json!({"DecLimited": true, "dir": 3}));
        let labels = LabelSet::from_fields(&data, &["DecLimited", "dir"]);

        assert_eq!(labels.get("DecLimited"), Some("1"));
        assert_eq!(labels.get("dir"), Some("3"));
    }

    #[test]
    fn test_from_fields_empty_keys() {
        let data = record(json!({"key1": "value1"}));
        assert!(LabelSet::from_fields(&data, &[]).is_empty());
    }

    #[test]
    fn test_identity_lowercases_host() {
        let data = record(json!({"Event": "Version", "Host": "UPPERCASE", "Inst": 2}));
        let identity = Identity::from_record(&data).expect("identity present");

        assert_eq!(identity.host, "uppercase");
        assert_eq!(identity.inst, "2");
        assert_eq!(
            identity.labels(),
            LabelSet::from_iter([("host", "uppercase"), ("inst", "2")])
        );
    }

    #[test]
    fn test_identity_requires_host_and_inst() {
        assert!(Identity::from_record(&record(json!({"Host": "foo"}))).is_none());
        assert!(Identity::from_record(&record(json!({"Inst": 1}))).is_none());
    }

    #[test]
    fn test_merge() {
        let a = LabelSet::new().with("host", "foo");
        let b = LabelSet::new().with("device", "camera");
        let merged = a.merge(&b);
        assert_eq!(merged.to_string(), r#"{device="camera",host="foo"}"#);
    }
}
