//! Simulated PLC
//!
//! In-memory data blocks behind a cloneable handle. Every clone sees the same
//! memory, so a test can keep one handle to poke values and inject failures
//! while the engine owns another.

use super::{lock, Endpoint, PlcTransport, TransportError, TransportResult};
use crate::codec::{encode_into, Value};
use crate::layout::{BaseType, LayoutMap, TypeSizes, VariableDescriptor};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Default)]
struct SimState {
    blocks: HashMap<u16, Vec<u8>>,
    connected: bool,
    refuse_connect: bool,
    offline: bool,
    fail_reads: u32,
    connects: u32,
    reads: u64,
    writes: u64,
    generator: Option<SignalGenerator>,
}

/// Animates layout variables from wall-clock time
#[derive(Debug, Clone)]
struct SignalGenerator {
    variables: Vec<VariableDescriptor>,
    sizes: TypeSizes,
    started: Instant,
}

impl SignalGenerator {
    /// Write the current signal values into the blocks
    fn apply(&self, blocks: &mut HashMap<u16, Vec<u8>>) {
        let t = self.started.elapsed().as_secs_f64();
        for (i, var) in self.variables.iter().enumerate() {
            let phase = i as f64 * 0.7;
            let value = match var {
                VariableDescriptor::Array { count, .. } => Value::Array(
                    (0..*count)
                        .map(|k| 10.0 * (2.0 * PI * k as f64 / *count as f64 + t).sin())
                        .collect(),
                ),
                VariableDescriptor::Scalar { base_type, .. } => match base_type {
                    BaseType::Real => Value::Real(50.0 + 25.0 * (0.2 * t + phase).sin()),
                    // Slow counter, e.g. a dose index
                    BaseType::Int | BaseType::Dint | BaseType::Word | BaseType::Dword => {
                        Value::Int((t / 10.0) as i64)
                    }
                    BaseType::Bool => Value::Bool((0.2 * t + phase).sin() > 0.0),
                    _ => continue,
                },
            };

            let Some(block) = blocks.get_mut(&var.db()) else {
                continue;
            };
            let offset = var.offset() as usize;
            let written = match &value {
                Value::Array(values) => values.iter().enumerate().try_for_each(|(k, v)| {
                    encode_into(block, offset + k * 4, &Value::Real(*v), BaseType::Real, &self.sizes)
                }),
                scalar => encode_into(block, offset, scalar, var.base_type(), &self.sizes),
            };
            if let Err(e) = written {
                tracing::trace!("Signal generator skipped '{}': {}", var.name(), e);
            }
        }
    }
}

/// In-memory PLC
#[derive(Debug, Clone, Default)]
pub struct SimulatedPlc {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPlc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a zeroed data block of `size` bytes
    pub fn with_block(self, db: u16, size: usize) -> Self {
        lock(&self.state).blocks.insert(db, vec![0; size]);
        self
    }

    /// Create every data block a layout needs, sized to its end offset
    pub fn for_layout(layout: &LayoutMap, sizes: &TypeSizes) -> Self {
        let plc = Self::new();
        {
            let mut state = lock(&plc.state);
            for block in layout.data_blocks(sizes) {
                state.blocks.insert(block.db, vec![0; block.end_offset as usize]);
            }
        }
        plc
    }

    /// Animate the layout's variables: REAL scalars follow sine waves, integer
    /// scalars count up every 10 s, BOOL scalars toggle and REAL arrays carry
    /// a moving waveform
    pub fn with_signal_generator(self, layout: &LayoutMap, sizes: &TypeSizes) -> Self {
        lock(&self.state).generator = Some(SignalGenerator {
            variables: layout.iter().cloned().collect(),
            sizes: *sizes,
            started: Instant::now(),
        });
        self
    }

    pub fn set_bytes(&self, db: u16, offset: u32, bytes: &[u8]) {
        let mut state = lock(&self.state);
        let block = state.blocks.entry(db).or_default();
        let end = offset as usize + bytes.len();
        if block.len() < end {
            block.resize(end, 0);
        }
        block[offset as usize..end].copy_from_slice(bytes);
    }

    pub fn bytes(&self, db: u16, offset: u32, len: usize) -> Vec<u8> {
        let state = lock(&self.state);
        state
            .blocks
            .get(&db)
            .and_then(|b| b.get(offset as usize..offset as usize + len))
            .map(|b| b.to_vec())
            .unwrap_or_default()
    }

    /// Encode `value` at a variable's location
    pub fn set_value(&self, descriptor: &VariableDescriptor, value: &Value) {
        let sizes = TypeSizes::default();
        let mut state = lock(&self.state);
        let block = state.blocks.entry(descriptor.db()).or_default();
        let end = descriptor.byte_range(&sizes).end as usize;
        if block.len() < end {
            block.resize(end, 0);
        }
        let offset = descriptor.offset() as usize;
        let result = match value {
            Value::Array(values) => values.iter().enumerate().try_for_each(|(k, v)| {
                encode_into(block, offset + k * 4, &Value::Real(*v), BaseType::Real, &sizes)
            }),
            scalar => encode_into(block, offset, scalar, descriptor.base_type(), &sizes),
        };
        if let Err(e) = result {
            tracing::warn!("Simulated write of '{}' failed: {}", descriptor.name(), e);
        }
    }

    pub fn refuse_connections(&self, refuse: bool) {
        lock(&self.state).refuse_connect = refuse;
    }

    /// While offline, every read and write fails with an IO error
    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    /// Fail the next `n` reads with a timeout
    pub fn fail_next_reads(&self, n: u32) {
        lock(&self.state).fail_reads = n;
    }

    pub fn read_count(&self) -> u64 {
        lock(&self.state).reads
    }

    pub fn write_count(&self) -> u64 {
        lock(&self.state).writes
    }

    pub fn connect_count(&self) -> u32 {
        lock(&self.state).connects
    }

    fn range_check(block: &[u8], db: u16, start: u32, len: usize) -> TransportResult<()> {
        let end = start as usize + len;
        if end > block.len() {
            return Err(TransportError::AddressOutOfRange {
                db,
                start,
                end: end as u32,
            });
        }
        Ok(())
    }
}

impl PlcTransport for SimulatedPlc {
    fn connect(&mut self, endpoint: &Endpoint) -> TransportResult<()> {
        let mut state = lock(&self.state);
        if state.refuse_connect {
            return Err(TransportError::Connect(format!(
                "{}: connection refused",
                endpoint.address
            )));
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    fn disconnect(&mut self) {
        lock(&self.state).connected = false;
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn db_read(&mut self, db: u16, start: u32, len: usize) -> TransportResult<Vec<u8>> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.offline {
            return Err(TransportError::Io("connection reset by peer".to_string()));
        }
        if state.fail_reads > 0 {
            state.fail_reads -= 1;
            return Err(TransportError::Timeout);
        }
        state.reads += 1;

        let SimState {
            blocks, generator, ..
        } = &mut *state;
        if let Some(generator) = generator {
            generator.apply(blocks);
        }

        let block = blocks
            .get(&db)
            .ok_or(TransportError::AddressOutOfRange {
                db,
                start,
                end: start + len as u32,
            })?;
        Self::range_check(block, db, start, len)?;
        Ok(block[start as usize..start as usize + len].to_vec())
    }

    fn db_write(&mut self, db: u16, start: u32, data: &[u8]) -> TransportResult<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.offline {
            return Err(TransportError::Io("connection reset by peer".to_string()));
        }
        state.writes += 1;

        let block = state
            .blocks
            .get_mut(&db)
            .ok_or(TransportError::AddressOutOfRange {
                db,
                start,
                end: start + data.len() as u32,
            })?;
        Self::range_check(block, db, start, data.len())?;
        block[start as usize..start as usize + data.len()].copy_from_slice(data);
        Ok(())
    }
}
