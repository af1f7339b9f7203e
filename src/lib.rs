//! # plcdaq
//!
//! Acquisition engine for raw (non-optimized) Siemens S7 data blocks.
//!
//! ## Features
//!
//! - **Layout allocation**: byte-exact offsets with S7 size and alignment rules
//! - **Type codec**: big-endian decode/encode of S7 scalars, strings and REAL arrays
//! - **Acquisition loop**: fixed-cadence polling with trigger-gated array reads
//!   and automatic reconnection of stale connections
//! - **Recording policies**: time-interval or on-change recording, array
//!   captures on index change
//! - **Storage**: one SQLite file per day, WAL mode with periodic checkpoints
//!
//! ## Modules
//!
//! - [`layout`]: types, allocator, layout artifact and variable tables
//! - [`codec`]: raw bytes to typed values and back
//! - [`transport`]: ISO-on-TCP and simulated PLC transports
//! - [`acquisition`]: connection manager, session and engine
//! - [`recording`]: recording decisions
//! - [`storage`]: daily stores and partitioning
//! - [`command`]: bit writes and pulses
//! - [`config`]: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plcdaq::acquisition::{AcquisitionEngine, EngineConfig, ManualClock};
//! use plcdaq::layout::{Allocator, LayoutBuilder, GroupKind, TypeSizes, VariableRow};
//! use plcdaq::storage::PartitionConfig;
//! use plcdaq::transport::{Endpoint, SimulatedPlc};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Allocate offsets
//!     let mut builder = LayoutBuilder::new(Allocator::new(TypeSizes::default()));
//!     builder.add_group(
//!         "exchange",
//!         GroupKind::Exchange,
//!         9,
//!         &[VariableRow::new("Dose_number", "INT"), VariableRow::new("StableWeight", "REAL")],
//!     )?;
//!     let (layout, _recipes) = builder.finish();
//!
//!     // Run a few cycles against the simulated PLC
//!     let plc = SimulatedPlc::for_layout(&layout, &TypeSizes::default());
//!     let config = EngineConfig::new(Endpoint::new("sim"), PartitionConfig::new("./data", "Demo"));
//!     let clock = Arc::new(ManualClock::new(chrono::Local::now().naive_local()));
//!     let mut engine = AcquisitionEngine::new(config, layout, Box::new(plc), clock)?;
//!
//!     engine.start()?;
//!     for _ in 0..10 {
//!         engine.cycle();
//!     }
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

pub mod acquisition;
pub mod codec;
pub mod command;
pub mod config;
pub mod layout;
pub mod recording;
pub mod storage;
pub mod transport;

pub use acquisition::{AcquisitionEngine, EngineConfig, EngineError, EngineEvent, EventHub};
pub use codec::{CodecError, PrecisionPolicy, Value};
pub use command::CommandChannel;
pub use config::{Config, ConfigError};
pub use layout::{LayoutError, LayoutMap, VariableDescriptor};
pub use recording::{RecordingDecision, RecordingMode, RecordingPolicy};
pub use storage::{StorageError, StoragePartitioner};
pub use transport::{Endpoint, PlcTransport, TransportError};
