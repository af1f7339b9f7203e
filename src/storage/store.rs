//! Daily store - one SQLite file per calendar date
//!
//! Two append-only tables:
//! - `exchange_variables`: one row per recorded scalar
//! - `exchange_captures`: one row per array capture, arrays as a JSON object
//!
//! The file runs in WAL mode; `checkpoint` folds the WAL back into the main
//! database and truncates it. `export_csv` dumps one variable's history.

use super::error::{StorageError, StorageResult};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OpenFlags};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS exchange_variables (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        name_system TEXT NOT NULL,
        variable_name TEXT NOT NULL,
        value REAL
    );
    CREATE INDEX IF NOT EXISTS idx_exchange_variables_ts
        ON exchange_variables(timestamp);
    CREATE TABLE IF NOT EXISTS exchange_captures (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        batch_index INTEGER,
        arrays TEXT NOT NULL
    );
";

/// One persisted scalar row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub timestamp: String,
    pub name_system: String,
    pub variable_name: String,
    pub value: Option<f64>,
}

/// One persisted array capture
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCapture {
    pub timestamp: String,
    pub batch_index: Option<i64>,
    pub arrays: JsonValue,
}

/// Store for a single calendar date
pub struct DailyStore {
    conn: Connection,
    path: PathBuf,
    date: NaiveDate,
    name_system: String,
}

impl std::fmt::Debug for DailyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DailyStore")
            .field("path", &self.path)
            .field("date", &self.date)
            .finish()
    }
}

impl DailyStore {
    /// Create or open the store at `path`
    pub fn open(path: &Path, date: NaiveDate, name_system: &str) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Opened daily store {:?}", path);
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            date,
            name_system: name_system.to_string(),
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one sample's scalars in a single transaction; returns rows written
    pub fn append_sample(
        &mut self,
        timestamp: NaiveDateTime,
        values: &[(String, f64)],
    ) -> StorageResult<usize> {
        if values.is_empty() {
            return Ok(0);
        }
        let ts = timestamp.format(TIMESTAMP_FORMAT).to_string();

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO exchange_variables (timestamp, name_system, variable_name, value)
                 VALUES (?, ?, ?, ?)",
            )?;
            for (name, value) in values {
                stmt.execute(params![ts, self.name_system, name, value])?;
            }
        }
        tx.commit()?;

        Ok(values.len())
    }

    /// Append one capture of parallel arrays as a single row
    pub fn append_capture(
        &mut self,
        timestamp: NaiveDateTime,
        batch_index: Option<i64>,
        arrays: &[(String, Vec<f64>)],
    ) -> StorageResult<()> {
        let ts = timestamp.format(TIMESTAMP_FORMAT).to_string();
        let object: Map<String, JsonValue> = arrays
            .iter()
            .map(|(name, values)| (name.clone(), JsonValue::from(values.clone())))
            .collect();
        let payload = serde_json::to_string(&JsonValue::Object(object))?;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO exchange_captures (timestamp, batch_index, arrays) VALUES (?, ?, ?)",
            params![ts, batch_index, payload],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Fold the WAL into the database file and truncate it
    pub fn checkpoint(&self) -> StorageResult<()> {
        let (busy, log, checkpointed): (i64, i64, i64) = self.conn.query_row(
            "PRAGMA wal_checkpoint(TRUNCATE)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        if busy != 0 {
            tracing::warn!(
                "WAL checkpoint of {:?} incomplete ({} of {} frames)",
                self.path,
                checkpointed,
                log
            );
        } else {
            tracing::debug!("Checkpointed {:?}", self.path);
        }
        Ok(())
    }

    /// Checkpoint and close
    pub fn close(self) -> StorageResult<()> {
        self.checkpoint()?;
        let path = self.path.clone();
        self.conn
            .close()
            .map_err(|(_, e)| StorageError::Sqlite(e))?;
        tracing::info!("Closed daily store {:?}", path);
        Ok(())
    }

    pub fn row_count(&self) -> StorageResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM exchange_variables", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    pub fn capture_count(&self) -> StorageResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM exchange_captures", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// All scalar rows in insertion order
    pub fn values(&self) -> StorageResult<Vec<StoredValue>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, name_system, variable_name, value
             FROM exchange_variables ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredValue {
                timestamp: row.get(0)?,
                name_system: row.get(1)?,
                variable_name: row.get(2)?,
                value: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    /// Write every row of `variable` to a CSV file; returns rows exported
    pub fn export_csv(&self, variable: &str, output: &Path) -> StorageResult<usize> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, name_system, variable_name, value
             FROM exchange_variables WHERE variable_name = ? ORDER BY id",
        )?;
        let rows = stmt.query_map([variable], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
            ))
        })?;

        let mut writer = csv::Writer::from_path(output)?;
        writer.write_record(["timestamp", "name_system", "variable_name", "value"])?;
        let mut exported = 0;
        for row in rows {
            let (timestamp, name_system, variable_name, value) = row?;
            let value = value.map(|v| v.to_string()).unwrap_or_default();
            writer.write_record([timestamp, name_system, variable_name, value])?;
            exported += 1;
        }
        writer.flush()?;

        tracing::info!("Exported {} rows of '{}' to {:?}", exported, variable, output);
        Ok(exported)
    }

    /// All captures in insertion order
    pub fn captures(&self) -> StorageResult<Vec<StoredCapture>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, batch_index, arrays FROM exchange_captures ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut captures = Vec::new();
        for row in rows {
            let (timestamp, batch_index, arrays) = row?;
            captures.push(StoredCapture {
                timestamp,
                batch_index,
                arrays: serde_json::from_str(&arrays)?,
            });
        }
        Ok(captures)
    }
}
