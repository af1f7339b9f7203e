//! Command channel
//!
//! Bit writes from outside the acquisition loop (HMI buttons, tests). Shares
//! the loop's transport but serializes command operations behind its own
//! write lock, so a pulse never interleaves with another command.

use crate::codec::encode_bit;
use crate::layout::{BaseType, LayoutMap, BOOL_BIT};
use crate::transport::{lock, SharedTransport};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Clone)]
pub struct CommandChannel {
    layout: Arc<LayoutMap>,
    transport: SharedTransport,
    write_lock: Arc<Mutex<()>>,
}

impl CommandChannel {
    pub fn new(layout: Arc<LayoutMap>, transport: SharedTransport) -> Self {
        Self {
            layout,
            transport,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Set or clear a BOOL variable
    ///
    /// Reads the containing byte, flips bit 0 and writes the byte back, so
    /// neighbouring bits are untouched. Returns `false` on any failure.
    pub fn write_bit(&self, name: &str, value: bool) -> bool {
        let Some(var) = self.layout.get(name) else {
            tracing::warn!("Write rejected: unknown variable '{}'", name);
            return false;
        };
        if var.is_array() || var.base_type() != BaseType::Bool {
            tracing::warn!(
                "Write rejected: '{}' is {} not BOOL",
                name,
                var.base_type()
            );
            return false;
        }

        let _guard = lock(&self.write_lock);
        let (db, offset) = (var.db(), var.offset());

        let current = match lock(&self.transport).db_read(db, offset, 1) {
            Ok(bytes) => match bytes.first() {
                Some(byte) => *byte,
                None => {
                    tracing::warn!("Write of '{}' failed: empty read", name);
                    return false;
                }
            },
            Err(e) => {
                tracing::warn!("Write of '{}' failed reading DB{}.{}: {}", name, db, offset, e);
                return false;
            }
        };

        let updated = match encode_bit(current, BOOL_BIT, value) {
            Ok(byte) => byte,
            Err(e) => {
                tracing::warn!("Write of '{}' failed: {}", name, e);
                return false;
            }
        };

        if let Err(e) = lock(&self.transport).db_write(db, offset, &[updated]) {
            tracing::warn!("Write of '{}' failed writing DB{}.{}: {}", name, db, offset, e);
            return false;
        }

        tracing::info!("{} = {}", name, value);
        true
    }

    /// Set `name`, wait `duration`, clear it; runs on a background thread
    pub fn pulse(&self, name: &str, duration: Duration) -> JoinHandle<bool> {
        let channel = self.clone();
        let name = name.to_string();
        std::thread::spawn(move || {
            if !channel.write_bit(&name, true) {
                return false;
            }
            std::thread::sleep(duration);
            channel.write_bit(&name, false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::VariableDescriptor;
    use crate::transport::{shared, Endpoint, PlcTransport, SimulatedPlc};

    fn channel() -> (SimulatedPlc, CommandChannel) {
        let layout: LayoutMap = [
            VariableDescriptor::scalar("Start", 9, 0, BaseType::Bool),
            VariableDescriptor::scalar("Speed", 9, 2, BaseType::Int),
            VariableDescriptor::array("Curve", 9, 4, BaseType::Real, 2),
        ]
        .into_iter()
        .collect();
        let plc = SimulatedPlc::new().with_block(9, 12);
        let mut transport = plc.clone();
        transport.connect(&Endpoint::new("sim")).unwrap();
        let channel = CommandChannel::new(Arc::new(layout), shared(Box::new(transport)));
        (plc, channel)
    }

    #[test]
    fn test_write_bit_preserves_sibling_bits() {
        let (plc, channel) = channel();
        plc.set_bytes(9, 0, &[0b1010_1010]);

        assert!(channel.write_bit("Start", true));
        assert_eq!(plc.bytes(9, 0, 1), vec![0b1010_1011]);

        assert!(channel.write_bit("Start", false));
        assert_eq!(plc.bytes(9, 0, 1), vec![0b1010_1010]);
    }

    #[test]
    fn test_write_bit_rejects_unknown_and_non_bool() {
        let (plc, channel) = channel();
        assert!(!channel.write_bit("Nope", true));
        assert!(!channel.write_bit("Speed", true));
        assert!(!channel.write_bit("Curve", true));
        assert_eq!(plc.write_count(), 0);
    }

    #[test]
    fn test_write_bit_transport_failure_returns_false() {
        let (plc, channel) = channel();
        plc.set_offline(true);
        assert!(!channel.write_bit("Start", true));
    }

    #[test]
    fn test_pulse_sets_then_clears() {
        let (plc, channel) = channel();
        let handle = channel.pulse("Start", Duration::from_millis(20));
        assert!(handle.join().unwrap());
        assert_eq!(plc.bytes(9, 0, 1), vec![0]);
        assert_eq!(plc.write_count(), 2);
    }

    #[test]
    fn test_pulse_unknown_variable() {
        let (_plc, channel) = channel();
        assert!(!channel.pulse("Nope", Duration::from_millis(1)).join().unwrap());
    }
}
