//! Acquisition session
//!
//! One pass over the layout per cycle: scalar reads, trigger update, then
//! trigger-gated array reads. Array values survive skipped or failed reads.

use super::clock::seconds_between;
use super::connection::ConnectionManager;
use super::sample::{SampleSet, TriggerState};
use crate::codec::{decode, decode_array, PrecisionPolicy, Value};
use crate::layout::{LayoutMap, TypeSizes, VariableDescriptor};
use crate::transport::TransportError;
use chrono::NaiveDateTime;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Minimum clock time between two reads of the same array
pub const DEFAULT_ARRAY_MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Array variable name -> BOOL trigger variable name
    pub array_triggers: HashMap<String, String>,
    pub array_min_interval: Duration,
    pub precision: PrecisionPolicy,
    pub sizes: TypeSizes,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            array_triggers: HashMap::new(),
            array_min_interval: DEFAULT_ARRAY_MIN_INTERVAL,
            precision: PrecisionPolicy::default(),
            sizes: TypeSizes::default(),
        }
    }
}

/// What happened during one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub sample: SampleSet,
    /// Reads that got an answer from the PLC
    pub successes: usize,
    /// Transport or decode failures, out-of-range excluded
    pub failures: usize,
    pub out_of_range: usize,
    pub arrays_read: usize,
    /// Most recent per-variable failure, `name: error`
    pub last_error: Option<String>,
}

impl CycleReport {
    fn new(now: NaiveDateTime) -> Self {
        Self {
            sample: SampleSet::new(now),
            successes: 0,
            failures: 0,
            out_of_range: 0,
            arrays_read: 0,
            last_error: None,
        }
    }

    /// Failures with no successful exchange at all
    pub fn should_escalate(&self) -> bool {
        self.failures > 0 && self.successes == 0
    }

    fn fail(&mut self, name: &str, error: impl std::fmt::Display) {
        self.failures += 1;
        self.last_error = Some(format!("{}: {}", name, error));
    }

    fn transport_failure(&mut self, name: &str, error: &TransportError) {
        if error.is_out_of_range() {
            tracing::debug!("Read of '{}' skipped: {}", name, error);
            self.out_of_range += 1;
            self.successes += 1;
        } else {
            tracing::warn!("Read of '{}' failed: {}", name, error);
            self.fail(name, error);
        }
    }
}

pub struct AcquisitionSession {
    layout: LayoutMap,
    config: SessionConfig,
    triggers: TriggerState,
    trigger_names: BTreeSet<String>,
    last_array_read: HashMap<String, NaiveDateTime>,
    retained: HashMap<String, Vec<f64>>,
}

impl AcquisitionSession {
    pub fn new(layout: LayoutMap, config: SessionConfig, triggers: TriggerState) -> Self {
        let trigger_names = config.array_triggers.values().cloned().collect();
        Self {
            layout,
            config,
            triggers,
            trigger_names,
            last_array_read: HashMap::new(),
            retained: HashMap::new(),
        }
    }

    pub fn layout(&self) -> &LayoutMap {
        &self.layout
    }

    pub fn trigger_state(&self) -> &TriggerState {
        &self.triggers
    }

    /// Start a new connection session: latched triggers and array timers reset
    pub fn reset(&mut self) {
        self.triggers.clear();
        self.last_array_read.clear();
    }

    pub fn read_cycle(&mut self, conn: &mut ConnectionManager, now: NaiveDateTime) -> CycleReport {
        let mut report = CycleReport::new(now);

        let scalars: Vec<VariableDescriptor> = self.layout.scalars().cloned().collect();
        for var in &scalars {
            self.read_scalar(conn, var, now, &mut report);
        }

        for name in &self.trigger_names {
            if let Some(active) = report.sample.get(name).and_then(Value::as_bool) {
                self.triggers.set(name, active);
            }
        }

        let arrays: Vec<VariableDescriptor> = self.layout.arrays().cloned().collect();
        for var in &arrays {
            if self.array_due(var.name(), now) {
                self.read_array(conn, var, now, &mut report);
            }
            if let Some(values) = self.retained.get(var.name()) {
                report
                    .sample
                    .insert(var.name(), Value::Array(values.clone()));
            }
        }

        report
    }

    fn read_scalar(
        &self,
        conn: &mut ConnectionManager,
        var: &VariableDescriptor,
        now: NaiveDateTime,
        report: &mut CycleReport,
    ) {
        let len = var.byte_len(&self.config.sizes);
        match conn.read(var.db(), var.offset(), len, now) {
            Ok(buf) => {
                report.successes += 1;
                match decode(&buf, 0, var.base_type(), var.name(), &self.config.precision) {
                    Ok(value) => report.sample.insert(var.name(), value),
                    Err(e) => {
                        tracing::warn!("Decode of '{}' failed: {}", var.name(), e);
                        report.fail(var.name(), e);
                    }
                }
            }
            Err(e) => report.transport_failure(var.name(), &e),
        }
    }

    /// Trigger latched (or no trigger) and the minimum interval has passed
    fn array_due(&self, name: &str, now: NaiveDateTime) -> bool {
        let gated_open = match self.config.array_triggers.get(name) {
            Some(trigger) => self.triggers.is_active(trigger),
            None => true,
        };
        if !gated_open {
            return false;
        }
        match self.last_array_read.get(name) {
            Some(last) => {
                seconds_between(*last, now) >= self.config.array_min_interval.as_secs_f64()
            }
            None => true,
        }
    }

    fn read_array(
        &mut self,
        conn: &mut ConnectionManager,
        var: &VariableDescriptor,
        now: NaiveDateTime,
        report: &mut CycleReport,
    ) {
        let count = var.count().unwrap_or(0) as usize;
        let len = var.byte_len(&self.config.sizes);
        match conn.read(var.db(), var.offset(), len, now) {
            Ok(buf) => {
                report.successes += 1;
                match decode_array(&buf, 0, var.base_type(), count, &self.config.precision) {
                    Ok(values) => {
                        self.retained.insert(var.name().to_string(), values);
                        self.last_array_read.insert(var.name().to_string(), now);
                        report.arrays_read += 1;
                    }
                    Err(e) => {
                        tracing::warn!("Decode of array '{}' failed: {}", var.name(), e);
                        report.fail(var.name(), e);
                    }
                }
            }
            Err(e) => report.transport_failure(var.name(), &e),
        }
    }
}
