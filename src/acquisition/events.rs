//! Engine events
//!
//! The acquisition thread publishes value and status events on a tokio
//! broadcast channel. Any number of consumers (CLI logger, a UI bridge)
//! subscribe; a slow consumer lags and skips events instead of blocking the
//! loop.

use crate::codec::Value;
use serde::Serialize;
use tokio::sync::broadcast;

/// Status event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Info,
    Connected,
    Disconnected,
    Error,
    Stats,
}

/// Structured fields attached to a status event
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_interval_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_interval_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
}

/// Events emitted by the acquisition engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// One decoded variable value from the current cycle
    Value {
        name: String,
        value: Value,
    },
    /// Connection or engine status change
    Status {
        kind: StatusKind,
        message: String,
        #[serde(skip_serializing_if = "is_default_details")]
        details: StatusDetails,
    },
}

fn is_default_details(details: &StatusDetails) -> bool {
    *details == StatusDetails::default()
}

impl EngineEvent {
    pub fn status(kind: StatusKind, message: impl Into<String>) -> Self {
        EngineEvent::Status {
            kind,
            message: message.into(),
            details: StatusDetails::default(),
        }
    }

    pub fn status_kind(&self) -> Option<StatusKind> {
        match self {
            EngineEvent::Status { kind, .. } => Some(*kind),
            EngineEvent::Value { .. } => None,
        }
    }
}

/// Broadcast hub for engine events
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn value(&self, name: &str, value: &Value) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        self.publish(EngineEvent::Value {
            name: name.to_string(),
            value: value.clone(),
        });
    }

    pub fn status(&self, kind: StatusKind, message: impl Into<String>) {
        self.publish(EngineEvent::status(kind, message));
    }

    pub fn status_with(&self, kind: StatusKind, message: impl Into<String>, details: StatusDetails) {
        self.publish(EngineEvent::Status {
            kind,
            message: message.into(),
            details,
        });
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::Value {
            name: "StableWeight".to_string(),
            value: Value::Real(12.346),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"value","name":"StableWeight","value":12.346}"#);

        let event = EngineEvent::status(StatusKind::Connected, "Connected to PLC");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"type":"status","kind":"connected","message":"Connected to PLC"}"#
        );
    }

    #[test]
    fn test_stats_details_serialization() {
        let details = StatusDetails {
            read_count: Some(100),
            error_count: Some(2),
            ..Default::default()
        };
        let event = EngineEvent::Status {
            kind: StatusKind::Stats,
            message: "stats".into(),
            details,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["details"]["read_count"], 100);
        assert!(json["details"].get("last_error").is_none());
    }

    #[test]
    fn test_hub_delivers_to_all_subscribers() {
        let hub = EventHub::new(16);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.status(StatusKind::Info, "hello");
        hub.value("Dose_number", &Value::Int(3));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.try_recv().unwrap().status_kind(), Some(StatusKind::Info));
            assert!(matches!(rx.try_recv().unwrap(), EngineEvent::Value { .. }));
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::default();
        hub.status(StatusKind::Error, "nobody listens");
        assert_eq!(hub.receiver_count(), 0);
    }
}
