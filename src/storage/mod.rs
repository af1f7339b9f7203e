//! Day-partitioned sample storage
//!
//! This module persists recorded samples and array captures:
//!
//! - **store**: one SQLite file per calendar date (WAL mode)
//! - **partitioner**: picks the file for the current date, handles rollover
//!   and periodic checkpoints
//! - **error**: Error types
//!
//! # Layout on disk
//!
//! ```text
//! {data_dir}/
//!   FlexPTS_2024-03-01.db
//!   FlexPTS_2024-03-02.db
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use plcdaq::storage::{PartitionConfig, StoragePartitioner};
//! use chrono::Local;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut storage = StoragePartitioner::new(PartitionConfig::new("./data", "FlexPTS"));
//!     let now = Local::now().naive_local();
//!     storage.open(now.date())?;
//!     storage.append_sample(now, &[("StableWeight".to_string(), 12.346)])?;
//!     storage.close()?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod partitioner;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use partitioner::{PartitionConfig, StoragePartitioner, StoreStats};
pub use store::{DailyStore, StoredCapture, StoredValue, TIMESTAMP_FORMAT};
