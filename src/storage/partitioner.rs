//! Storage partitioner
//!
//! Routes samples into one `DailyStore` per calendar date, named
//! `{data_dir}/{base}_{YYYY-MM-DD}.db`. The acquisition loop asks it to check
//! for a date change and to checkpoint at fixed cycle intervals.

use super::error::{StorageError, StorageResult};
use super::store::DailyStore;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Where daily stores live and how they are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionConfig {
    pub data_dir: PathBuf,
    /// File name prefix; the source label unless overridden
    pub base_name: String,
    /// Value written to the `name_system` column
    pub source_label: String,
}

impl PartitionConfig {
    pub fn new(data_dir: impl Into<PathBuf>, source_label: impl Into<String>) -> Self {
        let source_label = source_label.into();
        Self {
            data_dir: data_dir.into(),
            base_name: source_label.clone(),
            source_label,
        }
    }

    pub fn with_base_override(mut self, base: Option<String>) -> Self {
        if let Some(base) = base.filter(|b| !b.trim().is_empty()) {
            self.base_name = base;
        }
        self
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}.db", self.base_name, date.format("%Y-%m-%d")))
    }
}

/// Counters kept for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub samples: u64,
    pub rows: u64,
    pub captures: u64,
    pub checkpoints: u64,
    pub rollovers: u64,
    pub opens: u64,
}

/// Day-partitioned append-only storage
#[derive(Debug)]
pub struct StoragePartitioner {
    config: PartitionConfig,
    current: Option<DailyStore>,
    stats: StoreStats,
}

impl StoragePartitioner {
    pub fn new(config: PartitionConfig) -> Self {
        Self {
            config,
            current: None,
            stats: StoreStats::default(),
        }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.current.as_ref().map(DailyStore::date)
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(DailyStore::path)
    }

    /// Read access to the open store
    pub fn current(&self) -> Option<&DailyStore> {
        self.current.as_ref()
    }

    /// Open (or create) the store for `date`, closing any other open store
    pub fn open(&mut self, date: NaiveDate) -> StorageResult<()> {
        if self.current_date() == Some(date) {
            return Ok(());
        }
        let closed = self.close();

        let path = self.config.path_for(date);
        let store = DailyStore::open(&path, date, &self.config.source_label)?;
        self.current = Some(store);
        self.stats.opens += 1;
        closed
    }

    fn store_mut(&mut self) -> StorageResult<&mut DailyStore> {
        self.current.as_mut().ok_or(StorageError::Closed)
    }

    /// Persist one recorded sample
    pub fn append_sample(
        &mut self,
        timestamp: NaiveDateTime,
        values: &[(String, f64)],
    ) -> StorageResult<usize> {
        let written = self.store_mut()?.append_sample(timestamp, values)?;
        if written > 0 {
            self.stats.samples += 1;
            self.stats.rows += written as u64;
        }
        Ok(written)
    }

    /// Persist one array capture
    pub fn append_capture(
        &mut self,
        timestamp: NaiveDateTime,
        batch_index: Option<i64>,
        arrays: &[(String, Vec<f64>)],
    ) -> StorageResult<()> {
        self.store_mut()?
            .append_capture(timestamp, batch_index, arrays)?;
        self.stats.captures += 1;
        Ok(())
    }

    /// Switch stores when `today` is past the open store's date
    ///
    /// Returns `true` when a rollover happened. With no open store (an earlier
    /// open failed) this retries opening today's store.
    pub fn check_rollover(&mut self, today: NaiveDate) -> StorageResult<bool> {
        match self.current_date() {
            None => {
                self.open(today)?;
                Ok(false)
            }
            Some(date) if today > date => {
                tracing::info!("Day rollover {} -> {}", date, today);
                let closed = self.close();
                self.open(today)?;
                self.stats.rollovers += 1;
                closed.map(|_| true)
            }
            Some(_) => Ok(false),
        }
    }

    pub fn checkpoint(&mut self) -> StorageResult<()> {
        self.store_mut()?.checkpoint()?;
        self.stats.checkpoints += 1;
        Ok(())
    }

    /// Final checkpoint and close; a no-op when nothing is open
    pub fn close(&mut self) -> StorageResult<()> {
        match self.current.take() {
            Some(store) => {
                store.close()?;
                self.stats.checkpoints += 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for StoragePartitioner {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Failed to close daily store: {}", e);
        }
    }
}
