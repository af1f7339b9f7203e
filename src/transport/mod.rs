//! PLC transport
//!
//! A `PlcTransport` reads and writes raw byte ranges of data blocks.
//! Two implementations are provided:
//! - `IsoTcpTransport`: ISO-on-TCP (RFC 1006) S7 client built on snap7
//! - `SimulatedPlc`: in-memory data blocks for tests and hardware-free runs

pub mod iso_tcp;
pub mod simulated;

pub use iso_tcp::IsoTcpTransport;
pub use simulated::SimulatedPlc;

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Where to reach a PLC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host or `host:port`; port 102 when omitted
    pub address: String,
    pub rack: u16,
    pub slot: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            rack: 0,
            slot: 1,
        }
    }

    pub fn with_rack_slot(mut self, rack: u16, slot: u16) -> Self {
        self.rack = rack;
        self.slot = slot;
        self
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (rack {}, slot {})", self.address, self.rack, self.slot)
    }
}

/// Transport errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(String),

    #[error("address out of range: DB{db} bytes {start}..{end}")]
    AddressOutOfRange { db: u16, start: u32, end: u32 },

    #[error("PLC rejected request: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// The requested range does not exist in the PLC; the connection is fine
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, TransportError::AddressOutOfRange { .. })
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => TransportError::Timeout,
            _ => TransportError::Io(err.to_string()),
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Raw data block access
pub trait PlcTransport: Send {
    fn connect(&mut self, endpoint: &Endpoint) -> TransportResult<()>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Read `len` bytes of DB `db` starting at byte `start`
    fn db_read(&mut self, db: u16, start: u32, len: usize) -> TransportResult<Vec<u8>>;

    /// Write `data` into DB `db` starting at byte `start`
    fn db_write(&mut self, db: u16, start: u32, data: &[u8]) -> TransportResult<()>;
}

/// Transport shared between the acquisition loop and the command channel;
/// the mutex is held for one request at a time
pub type SharedTransport = Arc<Mutex<Box<dyn PlcTransport>>>;

pub fn shared(transport: Box<dyn PlcTransport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

/// Lock a mutex, recovering the guard if a holder panicked
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_classification() {
        let err = TransportError::AddressOutOfRange {
            db: 9,
            start: 100,
            end: 104,
        };
        assert!(err.is_out_of_range());
        assert_eq!(err.to_string(), "address out of range: DB9 bytes 100..104");
        assert!(!TransportError::Timeout.is_out_of_range());
        assert!(!TransportError::Io("broken pipe".into()).is_out_of_range());
    }

    #[test]
    fn test_io_error_mapping() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(TransportError::from(timeout), TransportError::Timeout);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(TransportError::from(reset), TransportError::Io(_)));
    }

    #[test]
    fn test_endpoint_defaults() {
        let endpoint = Endpoint::new("192.168.0.20");
        assert_eq!(endpoint.rack, 0);
        assert_eq!(endpoint.slot, 1);
        assert_eq!(endpoint.to_string(), "192.168.0.20 (rack 0, slot 1)");
    }
}
