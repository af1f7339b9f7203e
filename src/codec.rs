//! Type codec
//!
//! Converts raw data block bytes to typed values and back. All multi-byte
//! fields are big-endian. REAL values are rounded on decode according to a
//! `PrecisionPolicy` keyed by variable name.

use crate::layout::{BaseType, TypeSizes, BOOL_BIT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A decoded variable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Array(Vec<f64>),
}

impl Value {
    /// Numeric view used for persistence; BOOL maps to 0/1
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Text(_) | Value::Array(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[f64]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(*b as i64),
            Value::Int(i) => Some(*i),
            Value::Real(r) if r.fract() == 0.0 => Some(*r as i64),
            _ => None,
        }
    }
}

/// Codec errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    #[error("unsupported type {base_type} for {operation}")]
    UnsupportedType {
        base_type: BaseType,
        operation: &'static str,
    },

    #[error("value {value} out of range for {base_type}")]
    ValueOutOfRange { base_type: BaseType, value: String },

    #[error("cannot encode {value:?} as {base_type}")]
    TypeMismatch { base_type: BaseType, value: Value },

    #[error("bit index {0} out of range (0..=7)")]
    InvalidBit(u8),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Decimal places for one name-substring match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionRule {
    pub contains: String,
    pub decimals: u32,
}

/// Rounding applied to decoded REAL values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionPolicy {
    /// First matching rule wins
    #[serde(default = "default_rules")]
    pub rules: Vec<PrecisionRule>,

    #[serde(default = "default_scalar_decimals")]
    pub scalar_decimals: u32,

    #[serde(default = "default_array_decimals")]
    pub array_decimals: u32,
}

fn default_rules() -> Vec<PrecisionRule> {
    vec![PrecisionRule {
        contains: "Density".to_string(),
        decimals: 4,
    }]
}

fn default_scalar_decimals() -> u32 {
    3
}

fn default_array_decimals() -> u32 {
    3
}

impl Default for PrecisionPolicy {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            scalar_decimals: default_scalar_decimals(),
            array_decimals: default_array_decimals(),
        }
    }
}

impl PrecisionPolicy {
    /// Decimal places for a scalar REAL named `name`
    pub fn decimals_for(&self, name: &str) -> u32 {
        self.rules
            .iter()
            .find(|rule| name.contains(&rule.contains))
            .map(|rule| rule.decimals)
            .unwrap_or(self.scalar_decimals)
    }
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn slice(buffer: &[u8], offset: usize, len: usize) -> CodecResult<&[u8]> {
    let end = offset + len;
    buffer
        .get(offset..end)
        .ok_or(CodecError::BufferTooShort {
            needed: end,
            available: buffer.len(),
        })
}

fn array4(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// Read one bit of the byte at `offset`
pub fn decode_bit(buffer: &[u8], offset: usize, bit: u8) -> CodecResult<bool> {
    if bit > 7 {
        return Err(CodecError::InvalidBit(bit));
    }
    let byte = slice(buffer, offset, 1)?[0];
    Ok(byte & (1 << bit) != 0)
}

/// Set or clear `bit` in `byte`, leaving the other bits untouched
pub fn encode_bit(byte: u8, bit: u8, value: bool) -> CodecResult<u8> {
    if bit > 7 {
        return Err(CodecError::InvalidBit(bit));
    }
    Ok(if value {
        byte | (1 << bit)
    } else {
        byte & !(1 << bit)
    })
}

/// Decode a scalar at `offset`
pub fn decode(
    buffer: &[u8],
    offset: usize,
    base_type: BaseType,
    name: &str,
    policy: &PrecisionPolicy,
) -> CodecResult<Value> {
    let value = match base_type {
        BaseType::Bool => Value::Bool(decode_bit(buffer, offset, BOOL_BIT)?),
        BaseType::Byte => Value::Int(slice(buffer, offset, 1)?[0] as i64),
        BaseType::Int => {
            let b = slice(buffer, offset, 2)?;
            Value::Int(i16::from_be_bytes([b[0], b[1]]) as i64)
        }
        BaseType::Word => {
            let b = slice(buffer, offset, 2)?;
            Value::Int(u16::from_be_bytes([b[0], b[1]]) as i64)
        }
        BaseType::Dint => Value::Int(i32::from_be_bytes(array4(slice(buffer, offset, 4)?)) as i64),
        BaseType::Dword => {
            Value::Int(u32::from_be_bytes(array4(slice(buffer, offset, 4)?)) as i64)
        }
        BaseType::Real => {
            let raw = f32::from_be_bytes(array4(slice(buffer, offset, 4)?)) as f64;
            Value::Real(round_to(raw, policy.decimals_for(name)))
        }
        BaseType::String => Value::Text(decode_string(buffer, offset)?),
    };
    Ok(value)
}

fn decode_string(buffer: &[u8], offset: usize) -> CodecResult<String> {
    let header = slice(buffer, offset, 2)?;
    let max_len = header[0] as usize;
    let actual = header[1] as usize;
    let available = buffer.len().saturating_sub(offset + 2);
    let len = actual.min(max_len).min(available);
    Ok(buffer[offset + 2..offset + 2 + len]
        .iter()
        .map(|&b| b as char)
        .collect())
}

/// Decode `count` contiguous elements at `offset`; REAL only
pub fn decode_array(
    buffer: &[u8],
    offset: usize,
    base_type: BaseType,
    count: usize,
    policy: &PrecisionPolicy,
) -> CodecResult<Vec<f64>> {
    if base_type != BaseType::Real {
        return Err(CodecError::UnsupportedType {
            base_type,
            operation: "array decode",
        });
    }
    let bytes = slice(buffer, offset, count * 4)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| round_to(f32::from_be_bytes(array4(chunk)) as f64, policy.array_decimals))
        .collect())
}

/// Encode a scalar to its big-endian byte representation
///
/// BOOL values live in a shared byte and go through [`encode_bit`] or
/// [`encode_into`] instead.
pub fn encode(value: &Value, base_type: BaseType, sizes: &TypeSizes) -> CodecResult<Vec<u8>> {
    let out_of_range = |v: i64| CodecError::ValueOutOfRange {
        base_type,
        value: v.to_string(),
    };
    let mismatch = || CodecError::TypeMismatch {
        base_type,
        value: value.clone(),
    };

    match base_type {
        BaseType::Bool => Err(CodecError::UnsupportedType {
            base_type,
            operation: "byte encode",
        }),
        BaseType::Byte => {
            let v = value.as_integer().ok_or_else(mismatch)?;
            let b = u8::try_from(v).map_err(|_| out_of_range(v))?;
            Ok(vec![b])
        }
        BaseType::Int => {
            let v = value.as_integer().ok_or_else(mismatch)?;
            let n = i16::try_from(v).map_err(|_| out_of_range(v))?;
            Ok(n.to_be_bytes().to_vec())
        }
        BaseType::Word => {
            let v = value.as_integer().ok_or_else(mismatch)?;
            let n = u16::try_from(v).map_err(|_| out_of_range(v))?;
            Ok(n.to_be_bytes().to_vec())
        }
        BaseType::Dint => {
            let v = value.as_integer().ok_or_else(mismatch)?;
            let n = i32::try_from(v).map_err(|_| out_of_range(v))?;
            Ok(n.to_be_bytes().to_vec())
        }
        BaseType::Dword => {
            let v = value.as_integer().ok_or_else(mismatch)?;
            let n = u32::try_from(v).map_err(|_| out_of_range(v))?;
            Ok(n.to_be_bytes().to_vec())
        }
        BaseType::Real => {
            let v = match value {
                Value::Real(r) => *r,
                Value::Int(i) => *i as f64,
                _ => return Err(mismatch()),
            };
            Ok((v as f32).to_be_bytes().to_vec())
        }
        BaseType::String => {
            let Value::Text(text) = value else {
                return Err(mismatch());
            };
            let capacity = sizes.of(BaseType::String).saturating_sub(2).min(254);
            let chars: Vec<u8> = text
                .chars()
                .take(capacity)
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect();
            let mut out = vec![0u8; capacity + 2];
            out[0] = capacity as u8;
            out[1] = chars.len() as u8;
            out[2..2 + chars.len()].copy_from_slice(&chars);
            Ok(out)
        }
    }
}

/// Write `value` into `buffer` at `offset`; BOOL is a read-modify-write of bit 0
pub fn encode_into(
    buffer: &mut [u8],
    offset: usize,
    value: &Value,
    base_type: BaseType,
    sizes: &TypeSizes,
) -> CodecResult<()> {
    let available = buffer.len();
    if base_type == BaseType::Bool {
        let flag = value.as_bool().ok_or_else(|| CodecError::TypeMismatch {
            base_type,
            value: value.clone(),
        })?;
        let byte = buffer.get_mut(offset).ok_or(CodecError::BufferTooShort {
            needed: offset + 1,
            available,
        })?;
        *byte = encode_bit(*byte, BOOL_BIT, flag)?;
        return Ok(());
    }

    let bytes = encode(value, base_type, sizes)?;
    let target = buffer
        .get_mut(offset..offset + bytes.len())
        .ok_or(CodecError::BufferTooShort {
            needed: offset + bytes.len(),
            available,
        })?;
    target.copy_from_slice(&bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real_bytes(v: f32) -> Vec<u8> {
        v.to_be_bytes().to_vec()
    }

    #[test]
    fn test_density_precision() {
        let policy = PrecisionPolicy::default();
        let buf = real_bytes(12.345678);

        let density = decode(&buf, 0, BaseType::Real, "InstantDensity", &policy).unwrap();
        assert_eq!(density, Value::Real(12.3457));

        let weight = decode(&buf, 0, BaseType::Real, "StableWeight", &policy).unwrap();
        assert_eq!(weight, Value::Real(12.346));
    }

    #[test]
    fn test_decode_integers_big_endian() {
        let policy = PrecisionPolicy::default();
        let buf = [0xFF, 0xFE, 0x12, 0x34, 0x80, 0x00, 0x00, 0x01, 0xAB];

        assert_eq!(decode(&buf, 0, BaseType::Int, "i", &policy).unwrap(), Value::Int(-2));
        assert_eq!(decode(&buf, 0, BaseType::Word, "w", &policy).unwrap(), Value::Int(65534));
        assert_eq!(
            decode(&buf, 4, BaseType::Dint, "d", &policy).unwrap(),
            Value::Int(i32::MIN as i64 + 1)
        );
        assert_eq!(
            decode(&buf, 4, BaseType::Dword, "dw", &policy).unwrap(),
            Value::Int(0x8000_0001)
        );
        assert_eq!(decode(&buf, 8, BaseType::Byte, "b", &policy).unwrap(), Value::Int(0xAB));
    }

    #[test]
    fn test_decode_bool_uses_bit_zero() {
        let policy = PrecisionPolicy::default();
        assert_eq!(
            decode(&[0b0000_0001], 0, BaseType::Bool, "t", &policy).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            decode(&[0b1111_1110], 0, BaseType::Bool, "t", &policy).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_decode_string_header() {
        let policy = PrecisionPolicy::default();
        let mut buf = vec![10u8, 5];
        buf.extend_from_slice(b"HELLO-JUNK");
        assert_eq!(
            decode(&buf, 0, BaseType::String, "s", &policy).unwrap(),
            Value::Text("HELLO".to_string())
        );

        // Actual length larger than max length is clamped
        let buf = [2u8, 9, b'O', b'K', b'X'];
        assert_eq!(
            decode(&buf, 0, BaseType::String, "s", &policy).unwrap(),
            Value::Text("OK".to_string())
        );
    }

    #[test]
    fn test_decode_array_real_only() {
        let policy = PrecisionPolicy::default();
        let mut buf = Vec::new();
        for v in [1.23456f32, -2.5, 0.0004] {
            buf.extend(real_bytes(v));
        }

        let values = decode_array(&buf, 0, BaseType::Real, 3, &policy).unwrap();
        assert_eq!(values, vec![1.235, -2.5, 0.0]);

        let err = decode_array(&buf, 0, BaseType::Int, 3, &policy).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedType { .. }));
    }

    #[test]
    fn test_buffer_too_short() {
        let policy = PrecisionPolicy::default();
        let err = decode(&[0, 0, 0], 0, BaseType::Real, "x", &policy).unwrap_err();
        assert_eq!(
            err,
            CodecError::BufferTooShort {
                needed: 4,
                available: 3
            }
        );
        assert!(decode_array(&[0; 8], 4, BaseType::Real, 2, &policy).is_err());
    }

    #[test]
    fn test_encode_bit_preserves_siblings() {
        for byte in [0x00u8, 0xFF, 0b1010_1010, 0b0101_0101] {
            for bit in 0..8u8 {
                for value in [true, false] {
                    let out = encode_bit(byte, bit, value).unwrap();
                    assert_eq!(out & !(1 << bit), byte & !(1 << bit));
                    assert_eq!(out & (1 << bit) != 0, value);
                    // Writing the same value twice is idempotent
                    assert_eq!(encode_bit(out, bit, value).unwrap(), out);
                }
            }
        }
        assert_eq!(encode_bit(0, 8, true), Err(CodecError::InvalidBit(8)));
    }

    #[test]
    fn test_encode_ranges() {
        let sizes = TypeSizes::default();
        assert_eq!(
            encode(&Value::Int(-2), BaseType::Int, &sizes).unwrap(),
            vec![0xFF, 0xFE]
        );
        assert_eq!(
            encode(&Value::Int(0xFFFF_FFFF), BaseType::Dword, &sizes).unwrap(),
            vec![0xFF; 4]
        );
        assert!(matches!(
            encode(&Value::Int(40_000), BaseType::Int, &sizes),
            Err(CodecError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            encode(&Value::Text("x".into()), BaseType::Real, &sizes),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_into_then_decode() {
        let sizes = TypeSizes::with_string_size(12);
        let policy = PrecisionPolicy::default();
        let mut buf = vec![0b1000_0000u8; 32];

        encode_into(&mut buf, 0, &Value::Bool(true), BaseType::Bool, &sizes).unwrap();
        assert_eq!(buf[0], 0b1000_0001);

        encode_into(&mut buf, 2, &Value::Real(42.125), BaseType::Real, &sizes).unwrap();
        assert_eq!(
            decode(&buf, 2, BaseType::Real, "StableWeight", &policy).unwrap(),
            Value::Real(42.125)
        );

        encode_into(&mut buf, 6, &Value::Text("ABC".into()), BaseType::String, &sizes).unwrap();
        assert_eq!(&buf[6..11], &[10, 3, b'A', b'B', b'C']);
        assert_eq!(
            decode(&buf, 6, BaseType::String, "s", &policy).unwrap(),
            Value::Text("ABC".into())
        );
    }

    #[test]
    fn test_value_serializes_untagged() {
        let json = serde_json::to_string(&Value::Array(vec![1.0, 2.5])).unwrap();
        assert_eq!(json, "[1.0,2.5]");
        assert_eq!(serde_json::to_string(&Value::Bool(true)).unwrap(), "true");
    }
}
