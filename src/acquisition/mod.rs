//! Acquisition loop
//!
//! This module runs the continuous PLC polling loop:
//!
//! - **clock**: wall-clock abstraction (system or manual)
//! - **connection**: connection state machine and failure classification
//! - **session**: per-cycle scalar and trigger-gated array reads
//! - **engine**: the loop itself, persistence, rollover and checkpoints
//! - **events**: broadcast value and status events
//!
//! # Example
//!
//! ```rust,no_run
//! use plcdaq::acquisition::{AcquisitionEngine, EngineConfig, SystemClock};
//! use plcdaq::layout::LayoutArtifact;
//! use plcdaq::storage::PartitionConfig;
//! use plcdaq::transport::{Endpoint, IsoTcpTransport};
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let layout = LayoutArtifact::load(Path::new("layout.json"))?.merged();
//!     let config = EngineConfig::new(
//!         Endpoint::new("192.168.0.10"),
//!         PartitionConfig::new("./data", "FlexPTS"),
//!     );
//!     let engine = AcquisitionEngine::new(
//!         config,
//!         layout,
//!         Box::new(IsoTcpTransport::new(Duration::from_secs(2))),
//!         Arc::new(SystemClock),
//!     )?;
//!     let handle = engine.spawn()?;
//!     std::thread::sleep(Duration::from_secs(10));
//!     handle.stop()?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod connection;
pub mod engine;
pub mod events;
pub mod sample;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{
    classify_failure, ConnectionManager, ConnectionState, ConnectionStatus, FailureAction,
    RetryPolicy, StatusHandle,
};
pub use engine::{
    AcquisitionEngine, ControlHandle, CycleOutcome, EngineConfig, EngineError, EngineHandle,
    EngineResult, DEFAULT_CADENCE, MIN_CADENCE,
};
pub use events::{EngineEvent, EventHub, StatusDetails, StatusKind};
pub use sample::{SampleSet, TriggerState};
pub use session::{AcquisitionSession, CycleReport, SessionConfig};
