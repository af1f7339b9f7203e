//! Per-cycle sample set and trigger state

use crate::codec::Value;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// Decoded values of one acquisition cycle
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    timestamp: NaiveDateTime,
    values: BTreeMap<String, Value>,
}

impl SampleSet {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_arrays(&self) -> bool {
        self.values.values().any(Value::is_array)
    }

    /// At least one numeric scalar would be written
    pub fn has_scalar_rows(&self) -> bool {
        self.values.values().any(|v| v.as_f64().is_some())
    }

    /// Numeric scalars as `(name, value)` rows; text values are skipped
    pub fn scalar_rows(&self) -> Vec<(String, f64)> {
        self.values
            .iter()
            .filter_map(|(name, value)| value.as_f64().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Array values as `(name, elements)`
    pub fn array_rows(&self) -> Vec<(String, Vec<f64>)> {
        self.values
            .iter()
            .filter_map(|(name, value)| value.as_array().map(|a| (name.clone(), a.to_vec())))
            .collect()
    }
}

/// Latched trigger booleans, shared with other threads
///
/// Valid for one connection session; cleared on reconnect.
#[derive(Debug, Clone, Default)]
pub struct TriggerState {
    inner: Arc<RwLock<HashMap<String, bool>>>,
}

impl TriggerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, value: bool) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(name.to_string(), value);
    }

    /// Latched value; `false` when never observed this session
    pub fn is_active(&self, name: &str) -> bool {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(name).copied().unwrap_or(false)
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(name).copied()
    }

    pub fn clear(&self) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.clear();
    }

    pub fn snapshot(&self) -> HashMap<String, bool> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_scalar_and_array_rows() {
        let mut sample = SampleSet::new(ts());
        sample.insert("StableWeight", Value::Real(12.346));
        sample.insert("Running", Value::Bool(true));
        sample.insert("Recipe", Value::Text("A1".into()));
        sample.insert("Curve", Value::Array(vec![1.0, 2.0]));

        assert!(sample.has_arrays());
        assert_eq!(
            sample.scalar_rows(),
            vec![("Running".to_string(), 1.0), ("StableWeight".to_string(), 12.346)]
        );
        assert_eq!(sample.array_rows(), vec![("Curve".to_string(), vec![1.0, 2.0])]);
    }

    #[test]
    fn test_trigger_state_shared_and_cleared() {
        let triggers = TriggerState::new();
        let other = triggers.clone();

        assert!(!triggers.is_active("Trig"));
        assert_eq!(triggers.get("Trig"), None);
        other.set("Trig", true);
        assert!(triggers.is_active("Trig"));

        triggers.clear();
        assert!(other.snapshot().is_empty());
    }
}
