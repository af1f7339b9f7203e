//! ISO-on-TCP transport
//!
//! Adapts the snap7 S7 client to `PlcTransport`. snap7 handles the COTP
//! connection, PDU negotiation and chunking of large DB reads and writes;
//! this module maps its errors onto `TransportError`.

use super::{Endpoint, PlcTransport, TransportError, TransportResult};
use snap7_rs::{InternalParam, InternalParamValue, S7Client};
use std::time::Duration;

/// PDU size requested from the PLC
const REQUESTED_PDU: i32 = 960;

// snap7 texts for S7 return codes 0x05 and 0x0A
const ADDRESS_OUT_OF_RANGE: &str = "address out of range";
const ITEM_NOT_AVAILABLE: &str = "item not available";

/// Blocking S7 client over ISO-on-TCP
pub struct IsoTcpTransport {
    client: S7Client,
    timeout: Duration,
    connected: bool,
}

impl std::fmt::Debug for IsoTcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsoTcpTransport")
            .field("timeout", &self.timeout)
            .field("connected", &self.connected)
            .finish()
    }
}

impl IsoTcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: S7Client::create(),
            timeout,
            connected: false,
        }
    }

    fn configure(&self, port: Option<u16>) -> TransportResult<()> {
        let timeout_ms = i32::try_from(self.timeout.as_millis()).unwrap_or(i32::MAX);
        let params = [
            (InternalParam::PingTimeout, InternalParamValue::I32(timeout_ms)),
            (InternalParam::SendTimeout, InternalParamValue::I32(timeout_ms)),
            (InternalParam::RecvTimeout, InternalParamValue::I32(timeout_ms)),
            (InternalParam::PDURequest, InternalParamValue::I32(REQUESTED_PDU)),
        ];
        for (param, value) in params {
            self.client
                .set_param(param, value)
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }
        if let Some(port) = port {
            self.client
                .set_param(InternalParam::RemotePort, InternalParamValue::U16(port))
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }
        Ok(())
    }

    /// Map a failed request; link-level failures drop the connection
    fn request_failed(&mut self, message: String, db: u16, start: u32, len: usize) -> TransportError {
        let err = classify_error(&message, db, start, len);
        if matches!(err, TransportError::Io(_) | TransportError::Timeout) {
            self.disconnect();
        }
        err
    }
}

impl PlcTransport for IsoTcpTransport {
    fn connect(&mut self, endpoint: &Endpoint) -> TransportResult<()> {
        self.disconnect();

        let (host, port) = split_address(&endpoint.address);
        self.configure(port)?;
        self.client
            .connect_to(host, i32::from(endpoint.rack), i32::from(endpoint.slot))
            .map_err(|e| TransportError::Connect(format!("{}: {}", endpoint, e)))?;
        self.connected = true;

        tracing::debug!("Connected to {}", endpoint);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            if let Err(e) = self.client.disconnect() {
                tracing::debug!("Disconnect failed: {}", e);
            }
            self.connected = false;
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn db_read(&mut self, db: u16, start: u32, len: usize) -> TransportResult<Vec<u8>> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let (start_i, len_i) = request_range(start, len)?;

        let mut buf = vec![0u8; len];
        match self.client.db_read(i32::from(db), start_i, len_i, &mut buf) {
            Ok(()) => Ok(buf),
            Err(e) => Err(self.request_failed(e.to_string(), db, start, len)),
        }
    }

    fn db_write(&mut self, db: u16, start: u32, data: &[u8]) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let (start_i, len_i) = request_range(start, data.len())?;

        let mut buf = data.to_vec();
        match self.client.db_write(i32::from(db), start_i, len_i, &mut buf) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.request_failed(e.to_string(), db, start, data.len())),
        }
    }
}

impl Drop for IsoTcpTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// `host` or `host:port`
fn split_address(address: &str) -> (&str, Option<u16>) {
    match address.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (address, None),
        },
        None => (address, None),
    }
}

fn request_range(start: u32, len: usize) -> TransportResult<(i32, i32)> {
    let start = i32::try_from(start)
        .map_err(|_| TransportError::Protocol(format!("start offset {} too large", start)))?;
    let len = i32::try_from(len)
        .map_err(|_| TransportError::Protocol(format!("request length {} too large", len)))?;
    Ok((start, len))
}

/// Classify a snap7 error text
fn classify_error(message: &str, db: u16, start: u32, len: usize) -> TransportError {
    let lower = message.to_lowercase();
    if lower.contains(ADDRESS_OUT_OF_RANGE) || lower.contains(ITEM_NOT_AVAILABLE) {
        TransportError::AddressOutOfRange {
            db,
            start,
            end: start + len as u32,
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        TransportError::Timeout
    } else if lower.contains("tcp :") || lower.contains("iso :") {
        TransportError::Io(message.to_string())
    } else {
        TransportError::Rejected(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_return_codes_map_to_out_of_range() {
        let err = classify_error("CPU : Address out of range", 9, 296, 8);
        assert_eq!(
            err,
            TransportError::AddressOutOfRange {
                db: 9,
                start: 296,
                end: 304
            }
        );
        assert!(classify_error("CPU : Item not available", 40, 0, 4).is_out_of_range());
        assert!(!classify_error("CPU : Function not available", 9, 0, 4).is_out_of_range());
    }

    #[test]
    fn test_link_errors() {
        assert_eq!(
            classify_error("TCP : Connection timed out", 9, 0, 2),
            TransportError::Timeout
        );
        assert_eq!(classify_error("CLI : Job Timeout", 9, 0, 2), TransportError::Timeout);
        assert!(matches!(
            classify_error("TCP : Connection reset", 9, 0, 2),
            TransportError::Io(_)
        ));
        assert!(matches!(
            classify_error("ISO : Invalid PDU received", 9, 0, 2),
            TransportError::Io(_)
        ));
        assert!(matches!(
            classify_error("CPU : Function not available", 9, 0, 2),
            TransportError::Rejected(_)
        ));
    }

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("192.168.0.20"), ("192.168.0.20", None));
        assert_eq!(split_address("127.0.0.1:1102"), ("127.0.0.1", Some(1102)));
        assert_eq!(split_address("plc-line2"), ("plc-line2", None));
    }

    #[test]
    fn test_read_without_connection() {
        let mut transport = IsoTcpTransport::new(Duration::from_millis(100));
        assert_eq!(
            transport.db_read(1, 0, 4).unwrap_err(),
            TransportError::NotConnected
        );
        assert_eq!(
            transport.db_write(1, 0, &[1]).unwrap_err(),
            TransportError::NotConnected
        );
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut transport = IsoTcpTransport::new(Duration::from_millis(500));
        let err = transport
            .connect(&Endpoint::new(format!("127.0.0.1:{}", port)))
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
        assert!(!transport.is_connected());
    }
}
