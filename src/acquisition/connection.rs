//! Connection manager
//!
//! Owns the PLC connection lifecycle for the acquisition loop:
//! - blocking connect with `connected` / `error` + `disconnected` events
//! - tracks the last successful exchange for staleness classification
//! - forced disconnect, fixed delay and reconnect when the link is stale
//! - status snapshot readable from any thread

use super::clock::{seconds_between, Clock};
use super::events::{EventHub, StatusKind};
use crate::transport::{lock, Endpoint, SharedTransport, TransportResult};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Snapshot of the connection state and counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    /// Completed acquisition cycles
    pub read_count: u64,
    /// Escalated cycle failures
    pub error_count: u64,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
            read_count: 0,
            error_count: 0,
        }
    }
}

/// Cloneable read handle on the connection status
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<ConnectionStatus>>,
}

impl StatusHandle {
    pub fn snapshot(&self) -> ConnectionStatus {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionStatus)) {
        let mut status = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut status);
    }
}

/// What to do after a failed cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Log and keep polling
    Transient,
    /// Drop the connection and reconnect
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub stale_after: Duration,
    pub reconnect_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Transient while the last successful exchange is at most `stale_after` old
pub fn classify_failure(
    last_success: Option<NaiveDateTime>,
    now: NaiveDateTime,
    stale_after: Duration,
) -> FailureAction {
    match last_success {
        Some(last) if seconds_between(last, now) <= stale_after.as_secs_f64() => {
            FailureAction::Transient
        }
        _ => FailureAction::Stale,
    }
}

pub struct ConnectionManager {
    endpoint: Endpoint,
    transport: SharedTransport,
    status: StatusHandle,
    last_success: Option<NaiveDateTime>,
    policy: RetryPolicy,
    events: EventHub,
}

impl ConnectionManager {
    pub fn new(
        endpoint: Endpoint,
        transport: SharedTransport,
        policy: RetryPolicy,
        events: EventHub,
    ) -> Self {
        Self {
            endpoint,
            transport,
            status: StatusHandle::default(),
            last_success: None,
            policy,
            events,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Shared transport, for the command channel
    pub fn transport(&self) -> SharedTransport {
        Arc::clone(&self.transport)
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.snapshot()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.snapshot().state
    }

    pub fn last_success(&self) -> Option<NaiveDateTime> {
        self.last_success
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Blocking connect
    pub fn connect(&mut self, now: NaiveDateTime) -> TransportResult<()> {
        self.status.update(|s| s.state = ConnectionState::Connecting);
        tracing::info!("Connecting to PLC {}", self.endpoint);
        self.establish(now)
    }

    fn establish(&mut self, now: NaiveDateTime) -> TransportResult<()> {
        let result = lock(&self.transport).connect(&self.endpoint);
        match result {
            Ok(()) => {
                self.last_success = Some(now);
                self.status.update(|s| s.state = ConnectionState::Connected);
                tracing::info!("Connected to PLC {}", self.endpoint);
                self.events.status(
                    StatusKind::Connected,
                    format!("Connected to PLC {}", self.endpoint),
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.status.update(|s| {
                    s.state = ConnectionState::Disconnected;
                    s.last_error = Some(message.clone());
                });
                tracing::error!("Connection to PLC {} failed: {}", self.endpoint, e);
                self.events.status(
                    StatusKind::Error,
                    format!("Connection to PLC {} failed: {}", self.endpoint, e),
                );
                self.events
                    .status(StatusKind::Disconnected, "Disconnected from PLC");
                Err(e)
            }
        }
    }

    pub fn disconnect(&mut self) {
        lock(&self.transport).disconnect();
        let was = self.state();
        self.status.update(|s| s.state = ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            tracing::info!("Disconnected from PLC {}", self.endpoint);
            self.events
                .status(StatusKind::Disconnected, "Disconnected from PLC");
        }
    }

    /// One DB read under the transport lock
    ///
    /// Any answer from the PLC, including "address out of range", counts as a
    /// successful exchange.
    pub fn read(
        &mut self,
        db: u16,
        start: u32,
        len: usize,
        now: NaiveDateTime,
    ) -> TransportResult<Vec<u8>> {
        let result = lock(&self.transport).db_read(db, start, len);
        match &result {
            Ok(_) => self.last_success = Some(now),
            Err(e) if e.is_out_of_range() => self.last_success = Some(now),
            Err(_) => {}
        }
        result
    }

    pub fn classify(&self, now: NaiveDateTime) -> FailureAction {
        classify_failure(self.last_success, now, self.policy.stale_after)
    }

    /// Count one completed cycle; returns the new count
    pub fn record_cycle(&self) -> u64 {
        let mut count = 0;
        self.status.update(|s| {
            s.read_count += 1;
            count = s.read_count;
        });
        count
    }

    /// Count one escalated failure
    pub fn record_failure(&self, message: &str) {
        self.status.update(|s| {
            s.error_count += 1;
            s.last_error = Some(message.to_string());
        });
    }

    /// Forced disconnect, fixed delay, reconnect
    pub fn reconnect(&mut self, clock: &dyn Clock) -> TransportResult<()> {
        self.status
            .update(|s| s.state = ConnectionState::Reconnecting);
        lock(&self.transport).disconnect();
        tracing::warn!(
            "PLC connection stale, reconnecting in {:?}",
            self.policy.reconnect_delay
        );
        self.events.status(
            StatusKind::Info,
            format!(
                "Connection stale, reconnecting in {:.1}s",
                self.policy.reconnect_delay.as_secs_f64()
            ),
        );

        clock.sleep(self.policy.reconnect_delay);
        self.establish(clock.now())
    }
}
