//! Recording policy
//!
//! Decides once per cycle whether the sample set is persisted (`record`) and
//! whether the arrays it carries are written as a capture (`capture`).
//!
//! - Time mode records at most once per interval; the first sample always records.
//! - Variable mode records whenever the trigger variable changes value.
//! - Independently, a change of the index variable (e.g. `Dose_number`)
//!   captures the arrays present, when enabled.

use crate::acquisition::sample::SampleSet;
use crate::acquisition::clock::seconds_between;
use crate::codec::Value;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest accepted time-mode interval
pub const MIN_RECORD_INTERVAL: Duration = Duration::from_millis(100);

/// Default time-mode interval
pub const DEFAULT_RECORD_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingMode {
    Time { interval: Duration },
    Variable { trigger: String },
}

impl RecordingMode {
    /// Time mode, with the interval raised to the minimum when below it
    pub fn time(interval: Duration) -> Self {
        if interval < MIN_RECORD_INTERVAL {
            tracing::warn!(
                "Record interval {:?} below minimum, using {:?}",
                interval,
                MIN_RECORD_INTERVAL
            );
        }
        RecordingMode::Time {
            interval: interval.max(MIN_RECORD_INTERVAL),
        }
    }

    pub fn variable(trigger: impl Into<String>) -> Self {
        RecordingMode::Variable {
            trigger: trigger.into(),
        }
    }

    /// Index-change captures are on by default in time mode only
    pub fn default_index_capture(&self) -> bool {
        matches!(self, RecordingMode::Time { .. })
    }
}

impl Default for RecordingMode {
    fn default() -> Self {
        RecordingMode::Time {
            interval: DEFAULT_RECORD_INTERVAL,
        }
    }
}

/// Outcome for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordingDecision {
    pub record: bool,
    pub capture: bool,
}

#[derive(Debug, Clone)]
pub struct RecordingPolicy {
    mode: RecordingMode,
    index_variable: Option<String>,
    index_capture: bool,
    last_record: Option<NaiveDateTime>,
    last_trigger: Option<Value>,
    last_index: Option<Value>,
}

impl RecordingPolicy {
    pub fn new(mode: RecordingMode) -> Self {
        let index_capture = mode.default_index_capture();
        Self {
            mode,
            index_variable: None,
            index_capture,
            last_record: None,
            last_trigger: None,
            last_index: None,
        }
    }

    pub fn with_index_variable(mut self, name: Option<String>) -> Self {
        self.index_variable = name;
        self
    }

    /// Override whether an index change captures arrays
    pub fn with_index_capture(mut self, enabled: Option<bool>) -> Self {
        if let Some(enabled) = enabled {
            self.index_capture = enabled;
        }
        self
    }

    pub fn mode(&self) -> &RecordingMode {
        &self.mode
    }

    pub fn index_capture(&self) -> bool {
        self.index_capture
    }

    /// Forget all history; the next sample counts as a first observation
    pub fn reset(&mut self) {
        self.last_record = None;
        self.last_trigger = None;
        self.last_index = None;
    }

    pub fn decide(&mut self, sample: &SampleSet) -> RecordingDecision {
        let record = match &self.mode {
            // A cycle with nothing to write keeps the interval running
            RecordingMode::Time { .. } if !sample.has_scalar_rows() => false,
            RecordingMode::Time { interval } => {
                let due = match self.last_record {
                    None => true,
                    Some(last) => {
                        seconds_between(last, sample.timestamp()) >= interval.as_secs_f64()
                    }
                };
                if due {
                    self.last_record = Some(sample.timestamp());
                }
                due
            }
            RecordingMode::Variable { trigger } => match sample.get(trigger) {
                Some(current) if self.last_trigger.as_ref() != Some(current) => {
                    self.last_trigger = Some(current.clone());
                    true
                }
                _ => false,
            },
        };

        let index_changed = self.observe_index(sample);
        let capture = self.index_capture && index_changed && sample.has_arrays();

        RecordingDecision { record, capture }
    }

    /// Track the index variable; a missing reading is not a change
    fn observe_index(&mut self, sample: &SampleSet) -> bool {
        let Some(name) = &self.index_variable else {
            return false;
        };
        match sample.get(name) {
            Some(current) if self.last_index.as_ref() != Some(current) => {
                self.last_index = Some(current.clone());
                true
            }
            _ => false,
        }
    }

    /// Current index value, used as the capture's batch index
    pub fn batch_index(&self, sample: &SampleSet) -> Option<i64> {
        let name = self.index_variable.as_ref()?;
        match sample.get(name)? {
            Value::Int(i) => Some(*i),
            Value::Real(r) => Some(*r as i64),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at_ms(ms: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
            + chrono::Duration::milliseconds(ms)
    }

    fn sample(ms: i64, values: &[(&str, Value)]) -> SampleSet {
        let mut s = SampleSet::new(at_ms(ms));
        for (name, value) in values {
            s.insert(*name, value.clone());
        }
        s
    }

    #[test]
    fn test_time_mode_interval() {
        let mut policy = RecordingPolicy::new(RecordingMode::time(Duration::from_millis(500)));
        let records: Vec<bool> = [0, 200, 499, 500, 700, 1000, 1100]
            .iter()
            .map(|ms| policy.decide(&sample(*ms, &[("A", Value::Int(1))])).record)
            .collect();
        assert_eq!(records, vec![true, false, false, true, false, true, false]);
    }

    #[test]
    fn test_empty_cycle_keeps_time_slot_open() {
        let mut policy = RecordingPolicy::new(RecordingMode::time(Duration::from_millis(500)));
        let good = [("StableWeight", Value::Real(12.346))];

        assert!(policy.decide(&sample(0, &good)).record);
        // Every read failed at 500 ms
        assert!(!policy.decide(&sample(500, &[])).record);
        // Arrays alone carry no scalar rows
        assert!(!policy.decide(&sample(550, &[("Curve", Value::Array(vec![1.0]))])).record);
        assert!(policy.decide(&sample(600, &good)).record);
        assert!(!policy.decide(&sample(900, &good)).record);
        assert!(policy.decide(&sample(1100, &good)).record);
    }

    #[test]
    fn test_time_mode_minimum_interval() {
        let mode = RecordingMode::time(Duration::from_millis(10));
        assert_eq!(
            mode,
            RecordingMode::Time {
                interval: MIN_RECORD_INTERVAL
            }
        );
    }

    #[test]
    fn test_variable_mode_records_on_change() {
        let mut policy = RecordingPolicy::new(RecordingMode::variable("Recipe_step"));
        let steps = [1, 1, 2, 2, 2, 3, 1];
        let records: Vec<bool> = steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                policy
                    .decide(&sample(i as i64 * 50, &[("Recipe_step", Value::Int(*step))]))
                    .record
            })
            .collect();
        assert_eq!(records, vec![true, false, true, false, false, true, true]);

        // Missing trigger never records
        assert!(!policy.decide(&sample(1000, &[("Other", Value::Int(9))])).record);
    }

    #[test]
    fn test_index_change_captures_arrays_in_time_mode() {
        let mut policy = RecordingPolicy::new(RecordingMode::default())
            .with_index_variable(Some("Dose_number".to_string()));
        let curve = Value::Array(vec![1.0, 2.0]);

        let d = policy.decide(&sample(0, &[("Dose_number", Value::Int(1)), ("Curve", curve.clone())]));
        assert!(d.capture, "first observation counts as a change");

        let d = policy.decide(&sample(50, &[("Dose_number", Value::Int(1)), ("Curve", curve.clone())]));
        assert!(!d.capture);

        // Index read failed this cycle: no change, no capture
        let d = policy.decide(&sample(100, &[("Curve", curve.clone())]));
        assert!(!d.capture);

        let d = policy.decide(&sample(150, &[("Dose_number", Value::Int(2)), ("Curve", curve)]));
        assert!(d.capture);

        // Change without arrays present captures nothing
        let d = policy.decide(&sample(200, &[("Dose_number", Value::Int(3))]));
        assert!(!d.capture);
    }

    #[test]
    fn test_index_capture_off_by_default_in_variable_mode() {
        let arrays = [("Dose_number", Value::Int(1)), ("Curve", Value::Array(vec![0.5]))];

        let mut policy = RecordingPolicy::new(RecordingMode::variable("Step"))
            .with_index_variable(Some("Dose_number".into()));
        assert!(!policy.index_capture());
        assert!(!policy.decide(&sample(0, &arrays)).capture);

        let mut policy = RecordingPolicy::new(RecordingMode::variable("Step"))
            .with_index_variable(Some("Dose_number".into()))
            .with_index_capture(Some(true));
        assert!(policy.decide(&sample(0, &arrays)).capture);
    }

    #[test]
    fn test_batch_index() {
        let policy = RecordingPolicy::new(RecordingMode::default())
            .with_index_variable(Some("Dose_number".into()));
        assert_eq!(policy.batch_index(&sample(0, &[("Dose_number", Value::Int(42))])), Some(42));
        assert_eq!(policy.batch_index(&sample(0, &[])), None);
    }

    #[test]
    fn test_reset_makes_next_sample_first() {
        let mut policy = RecordingPolicy::new(RecordingMode::variable("Step"));
        assert!(policy.decide(&sample(0, &[("Step", Value::Int(1))])).record);
        policy.reset();
        assert!(policy.decide(&sample(10, &[("Step", Value::Int(1))])).record);
    }
}
