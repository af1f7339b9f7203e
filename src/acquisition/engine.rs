//! Acquisition engine
//!
//! Owns everything the acquisition thread touches: the connection, the
//! session, the recording policy and the daily store. One cycle is
//!
//! ```text
//! scalar reads -> trigger update -> array reads -> decide -> persist
//!     -> rollover / checkpoint -> sleep(cadence)
//! ```
//!
//! Other threads steer the loop through a [`ControlHandle`] (cadence, stop)
//! and observe it through the [`EventHub`] and the connection status handle.

use super::clock::{seconds_between, Clock};
use super::connection::{ConnectionManager, FailureAction, RetryPolicy, StatusHandle};
use super::events::{EventHub, StatusDetails, StatusKind};
use super::sample::TriggerState;
use super::session::{AcquisitionSession, CycleReport, SessionConfig};
use crate::command::CommandChannel;
use crate::layout::LayoutMap;
use crate::recording::{RecordingDecision, RecordingMode, RecordingPolicy};
use crate::storage::{PartitionConfig, StorageError, StoragePartitioner, StoreStats};
use crate::transport::{lock, shared, Endpoint, PlcTransport, TransportError};
use chrono::NaiveDateTime;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

pub const MIN_CADENCE: Duration = Duration::from_millis(10);
pub const DEFAULT_CADENCE: Duration = Duration::from_millis(50);
pub const DEFAULT_ROLLOVER_CHECK_CYCLES: u64 = 20;
pub const DEFAULT_CHECKPOINT_CYCLES: u64 = 1200;
pub const DEFAULT_STATS_CYCLES: u64 = 100;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    Connection(#[from] TransportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid engine configuration: {0}")]
    Config(String),

    #[error("Failed to spawn acquisition thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Acquisition thread panicked")]
    Panicked,
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub endpoint: Endpoint,
    pub cadence: Duration,
    pub recording: RecordingMode,
    /// Variable whose change captures arrays, e.g. `Dose_number`
    pub index_variable: Option<String>,
    /// `None` keeps the mode's default
    pub flush_arrays_on_index_change: Option<bool>,
    pub session: SessionConfig,
    pub retry: RetryPolicy,
    pub storage: PartitionConfig,
    pub rollover_check_cycles: u64,
    pub checkpoint_cycles: u64,
    pub stats_cycles: u64,
}

impl EngineConfig {
    pub fn new(endpoint: Endpoint, storage: PartitionConfig) -> Self {
        Self {
            endpoint,
            cadence: DEFAULT_CADENCE,
            recording: RecordingMode::default(),
            index_variable: None,
            flush_arrays_on_index_change: None,
            session: SessionConfig::default(),
            retry: RetryPolicy::default(),
            storage,
            rollover_check_cycles: DEFAULT_ROLLOVER_CHECK_CYCLES,
            checkpoint_cycles: DEFAULT_CHECKPOINT_CYCLES,
            stats_cycles: DEFAULT_STATS_CYCLES,
        }
    }

    /// Check the configuration against the layout it will run with
    pub fn validate(&self, layout: &LayoutMap) -> EngineResult<()> {
        if self.cadence < MIN_CADENCE {
            return Err(EngineError::Config(format!(
                "cadence {:?} below minimum {:?}",
                self.cadence, MIN_CADENCE
            )));
        }
        if let RecordingMode::Variable { trigger } = &self.recording {
            if trigger.is_empty() {
                return Err(EngineError::Config(
                    "variable recording mode needs a trigger variable".to_string(),
                ));
            }
            if !layout.contains(trigger) {
                tracing::warn!("Recording trigger '{}' is not in the layout", trigger);
            }
        }
        for (array, trigger) in &self.session.array_triggers {
            match layout.get(array) {
                Some(var) if var.is_array() => {}
                _ => tracing::warn!("Array trigger configured for unknown array '{}'", array),
            }
            if !layout.contains(trigger) {
                tracing::warn!("Trigger '{}' for '{}' is not in the layout", trigger, array);
            }
        }
        if self.rollover_check_cycles == 0 || self.checkpoint_cycles == 0 || self.stats_cycles == 0
        {
            return Err(EngineError::Config(
                "cycle periods must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cadence and stop flag, shared with other threads
#[derive(Debug, Clone)]
pub struct ControlHandle {
    cadence: Arc<Mutex<Duration>>,
    stop: Arc<AtomicBool>,
}

impl ControlHandle {
    fn new(cadence: Duration) -> Self {
        Self {
            cadence: Arc::new(Mutex::new(cadence.max(MIN_CADENCE))),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cadence(&self) -> Duration {
        *lock(&self.cadence)
    }

    /// Change the cycle sleep; returns the applied value (at least 10 ms)
    pub fn set_cadence(&self, cadence: Duration) -> Duration {
        let applied = cadence.max(MIN_CADENCE);
        *lock(&self.cadence) = applied;
        tracing::info!("Cadence set to {:?}", applied);
        applied
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Result of one cycle
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub report: CycleReport,
    pub decision: RecordingDecision,
    /// Set when the cycle was escalated to failure classification
    pub action: Option<FailureAction>,
}

pub struct AcquisitionEngine {
    config: EngineConfig,
    conn: ConnectionManager,
    session: AcquisitionSession,
    policy: RecordingPolicy,
    storage: StoragePartitioner,
    commands: CommandChannel,
    events: EventHub,
    control: ControlHandle,
    clock: Arc<dyn Clock>,
    cycles: u64,
    last_cycle_at: Option<NaiveDateTime>,
    last_interval_ms: Option<f64>,
    last_read_error: Option<String>,
}

impl AcquisitionEngine {
    pub fn new(
        config: EngineConfig,
        layout: LayoutMap,
        transport: Box<dyn PlcTransport>,
        clock: Arc<dyn Clock>,
    ) -> EngineResult<Self> {
        config.validate(&layout)?;

        let events = EventHub::default();
        let transport = shared(transport);
        let conn = ConnectionManager::new(
            config.endpoint.clone(),
            Arc::clone(&transport),
            config.retry,
            events.clone(),
        );
        let commands = CommandChannel::new(Arc::new(layout.clone()), transport);
        let policy = RecordingPolicy::new(config.recording.clone())
            .with_index_variable(config.index_variable.clone())
            .with_index_capture(config.flush_arrays_on_index_change);
        let session = AcquisitionSession::new(layout, config.session.clone(), TriggerState::new());
        let storage = StoragePartitioner::new(config.storage.clone());
        let control = ControlHandle::new(config.cadence);

        Ok(Self {
            config,
            conn,
            session,
            policy,
            storage,
            commands,
            events,
            control,
            clock,
            cycles: 0,
            last_cycle_at: None,
            last_interval_ms: None,
            last_read_error: None,
        })
    }

    pub fn events(&self) -> EventHub {
        self.events.clone()
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn command_channel(&self) -> CommandChannel {
        self.commands.clone()
    }

    pub fn trigger_state(&self) -> TriggerState {
        self.session.trigger_state().clone()
    }

    pub fn status(&self) -> StatusHandle {
        self.conn.status_handle()
    }

    pub fn storage_stats(&self) -> StoreStats {
        self.storage.stats()
    }

    pub fn storage(&self) -> &StoragePartitioner {
        &self.storage
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Connect and open today's store
    ///
    /// A failed connect is fatal; a failed store open is reported and
    /// retried at the next rollover check.
    pub fn start(&mut self) -> EngineResult<()> {
        let now = self.clock.now();
        self.conn.connect(now)?;
        self.session.reset();
        self.policy.reset();

        if let Err(e) = self.storage.open(now.date()) {
            self.storage_error("open", &e);
        }
        self.events.status(
            StatusKind::Info,
            format!(
                "Acquisition started: {} variables, cadence {:?}",
                self.session.layout().len(),
                self.control.cadence()
            ),
        );
        Ok(())
    }

    /// One cycle without the trailing sleep
    pub fn cycle(&mut self) -> CycleOutcome {
        let now = self.clock.now();
        let report = self.session.read_cycle(&mut self.conn, now);

        if let Some(last) = self.last_cycle_at {
            self.last_interval_ms = Some(seconds_between(last, now) * 1000.0);
        }
        self.last_cycle_at = Some(now);
        if report.last_error.is_some() {
            self.last_read_error = report.last_error.clone();
        }

        for (name, value) in report.sample.iter() {
            self.events.value(name, value);
        }

        let mut escalate = report.should_escalate();
        let decision = self.policy.decide(&report.sample);
        if decision.record {
            let rows = report.sample.scalar_rows();
            if let Err(e) = self.storage.append_sample(now, &rows) {
                self.storage_error("sample write", &e);
                escalate = true;
            }
        }
        if decision.capture {
            let batch = self.policy.batch_index(&report.sample);
            let arrays = report.sample.array_rows();
            match self.storage.append_capture(now, batch, &arrays) {
                Ok(()) => tracing::debug!("Captured {} arrays (batch {:?})", arrays.len(), batch),
                Err(e) => {
                    self.storage_error("capture write", &e);
                    escalate = true;
                }
            }
        }

        self.cycles += 1;
        self.conn.record_cycle();

        let action = if escalate {
            let message = report
                .last_error
                .clone()
                .unwrap_or_else(|| "cycle failed".to_string());
            Some(self.handle_failure(now, &message))
        } else {
            None
        };

        if self.cycles % self.config.rollover_check_cycles == 0 {
            let today = self.clock.now().date();
            match self.storage.check_rollover(today) {
                Ok(true) => self
                    .events
                    .status(StatusKind::Info, format!("Switched to daily store for {}", today)),
                Ok(false) => {}
                Err(e) => self.storage_error("rollover", &e),
            }
        }
        if self.cycles % self.config.checkpoint_cycles == 0 && self.storage.is_open() {
            if let Err(e) = self.storage.checkpoint() {
                self.storage_error("checkpoint", &e);
            }
        }
        if self.cycles % self.config.stats_cycles == 0 {
            self.emit_stats();
        }

        CycleOutcome {
            report,
            decision,
            action,
        }
    }

    fn handle_failure(&mut self, now: NaiveDateTime, message: &str) -> FailureAction {
        self.conn.record_failure(message);
        let action = self.conn.classify(now);
        match action {
            FailureAction::Transient => {
                tracing::warn!("Cycle failed: {}", message);
            }
            FailureAction::Stale => {
                tracing::error!("Cycle failed on a stale connection: {}", message);
                self.events
                    .status(StatusKind::Error, format!("Read failed: {}", message));
                if let Err(e) = self.conn.reconnect(self.clock.as_ref()) {
                    tracing::error!("Reconnect failed: {}", e);
                }
                self.session.reset();
            }
        }
        action
    }

    fn storage_error(&self, operation: &str, error: &StorageError) {
        tracing::error!("Storage {} failed: {}", operation, error);
        self.events.status(
            StatusKind::Error,
            format!("Storage {} failed: {}", operation, error),
        );
    }

    fn emit_stats(&self) {
        let status = self.conn.status();
        let details = StatusDetails {
            read_count: Some(status.read_count),
            error_count: Some(status.error_count),
            last_error: status.last_error.clone(),
            last_interval_ms: self.last_interval_ms,
            requested_interval_ms: Some(self.control.cadence().as_secs_f64() * 1000.0),
            read_error: self.last_read_error.clone(),
        };
        tracing::debug!(
            "Stats: {} reads, {} errors",
            status.read_count,
            status.error_count
        );
        self.events.status_with(
            StatusKind::Stats,
            format!("{} reads, {} errors", status.read_count, status.error_count),
            details,
        );
    }

    /// Final checkpoint, close the store and disconnect
    pub fn shutdown(&mut self) {
        if let Err(e) = self.storage.close() {
            self.storage_error("close", &e);
        }
        self.conn.disconnect();
        self.events.status(
            StatusKind::Info,
            format!("Acquisition stopped after {} cycles", self.cycles),
        );
    }

    /// Connect, cycle until stopped, shut down
    pub fn run(&mut self) -> EngineResult<()> {
        self.start()?;
        while !self.control.is_stopped() {
            self.cycle();
            self.clock.sleep(self.control.cadence());
        }
        self.shutdown();
        Ok(())
    }

    /// Run on a dedicated thread
    pub fn spawn(mut self) -> EngineResult<EngineHandle> {
        let control = self.control();
        let thread = std::thread::Builder::new()
            .name("plcdaq-acquisition".to_string())
            .spawn(move || self.run())?;
        Ok(EngineHandle { control, thread })
    }
}

/// Handle on an engine running on its own thread
pub struct EngineHandle {
    control: ControlHandle,
    thread: JoinHandle<EngineResult<()>>,
}

impl EngineHandle {
    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Request a stop and wait for the final checkpoint
    pub fn stop(self) -> EngineResult<()> {
        self.control.stop();
        self.join()
    }

    pub fn join(self) -> EngineResult<()> {
        self.thread.join().map_err(|_| EngineError::Panicked)?
    }
}
