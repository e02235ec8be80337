//! Decoder for the firmware engine's tagged data values.
//!
//! All functions in this module are pure and safe to call from the
//! notification-delivery task.
//!
//! # Wire layout
//!
//! ```text
//! byte 0   : type tag (DataTypeId)
//! bytes 1+ : value region, size fixed by the tag
//! ```
//!
//! | Tag | Type | Value region |
//! |---|---|---|
//! | `0` | `UInt32` | u32 LE |
//! | `1` | `Float` | f32 LE |
//! | `2` | `CartesianFloat` | 3 × f32 LE (x, y, z) |
//! | `3` | `Int32` | i32 LE |
//! | `4` | `ByteArray` | u8 length, then `length` bytes |
//! | `5` | `BatteryState` | u8 voltage, u8 charge |
//! | `6` | `ColorAdc` | 4 × u16 LE (clear, red, green, blue) |
//!
//! Unknown tags are rejected with [`MetaWearError::UnrecognizedDataType`];
//! they mean the client and firmware disagree on the protocol version.
//! Bytes after the value region are ignored.

use crate::error::{MetaWearError, Result};
use crate::types::{BatteryState, CartesianFloat, ColorAdc, TaggedValue};

/// Type tags, numerically identical to the firmware header's data type ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataTypeId {
    UInt32 = 0,
    Float = 1,
    CartesianFloat = 2,
    Int32 = 3,
    ByteArray = 4,
    BatteryState = 5,
    ColorAdc = 6,
}

impl DataTypeId {
    /// Size of the value region for fixed-size tags; `None` for `ByteArray`.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            DataTypeId::UInt32 | DataTypeId::Float | DataTypeId::Int32 => Some(4),
            DataTypeId::CartesianFloat => Some(12),
            DataTypeId::ByteArray => None,
            DataTypeId::BatteryState => Some(2),
            DataTypeId::ColorAdc => Some(8),
        }
    }

    fn name(self) -> &'static str {
        match self {
            DataTypeId::UInt32 => "uint32",
            DataTypeId::Float => "float",
            DataTypeId::CartesianFloat => "cartesian float",
            DataTypeId::Int32 => "int32",
            DataTypeId::ByteArray => "byte array",
            DataTypeId::BatteryState => "battery state",
            DataTypeId::ColorAdc => "color adc",
        }
    }
}

impl TryFrom<u8> for DataTypeId {
    type Error = MetaWearError;

    fn try_from(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => DataTypeId::UInt32,
            1 => DataTypeId::Float,
            2 => DataTypeId::CartesianFloat,
            3 => DataTypeId::Int32,
            4 => DataTypeId::ByteArray,
            5 => DataTypeId::BatteryState,
            6 => DataTypeId::ColorAdc,
            other => return Err(MetaWearError::UnrecognizedDataType(other)),
        })
    }
}

impl TaggedValue {
    pub fn type_id(&self) -> DataTypeId {
        match self {
            TaggedValue::UInt32(_) => DataTypeId::UInt32,
            TaggedValue::Float(_) => DataTypeId::Float,
            TaggedValue::CartesianFloat(_) => DataTypeId::CartesianFloat,
            TaggedValue::Int32(_) => DataTypeId::Int32,
            TaggedValue::ByteArray(_) => DataTypeId::ByteArray,
            TaggedValue::BatteryState(_) => DataTypeId::BatteryState,
            TaggedValue::ColorAdc(_) => DataTypeId::ColorAdc,
        }
    }
}

// ── Little-endian readers ────────────────────────────────────────────────────

fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_f32_le(data: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32_le(data, offset))
}

fn truncated(type_id: DataTypeId, expected: usize, actual: usize) -> MetaWearError {
    MetaWearError::Truncated {
        data_type: type_id.name(),
        expected,
        actual,
    }
}

// ── Decode ───────────────────────────────────────────────────────────────────

/// Decode one tagged value: a type tag followed by its value region.
///
/// Fails with [`MetaWearError::UnrecognizedDataType`] for an unmapped tag and
/// [`MetaWearError::Truncated`] when the region is shorter than the tag
/// requires.  No partial value is ever produced.
///
/// ```
/// # use metawear_rs::parse::decode_tagged;
/// # use metawear_rs::types::TaggedValue;
/// assert_eq!(decode_tagged(&[0, 1, 0, 0, 0]).unwrap(), TaggedValue::UInt32(1));
/// assert!(decode_tagged(&[0xff]).is_err());
/// ```
pub fn decode_tagged(bytes: &[u8]) -> Result<TaggedValue> {
    let (&tag, region) = bytes
        .split_first()
        .ok_or(MetaWearError::Truncated {
            data_type: "tagged value",
            expected: 1,
            actual: 0,
        })?;
    let type_id = DataTypeId::try_from(tag)?;

    if let Some(len) = type_id.fixed_len() {
        if region.len() < len {
            return Err(truncated(type_id, len, region.len()));
        }
    }

    Ok(match type_id {
        DataTypeId::UInt32 => TaggedValue::UInt32(read_u32_le(region, 0)),
        DataTypeId::Float => TaggedValue::Float(read_f32_le(region, 0)),
        DataTypeId::Int32 => TaggedValue::Int32(read_u32_le(region, 0) as i32),
        DataTypeId::CartesianFloat => TaggedValue::CartesianFloat(CartesianFloat {
            x: read_f32_le(region, 0),
            y: read_f32_le(region, 4),
            z: read_f32_le(region, 8),
        }),
        DataTypeId::BatteryState => TaggedValue::BatteryState(BatteryState {
            voltage: region[0],
            charge: region[1],
        }),
        DataTypeId::ColorAdc => TaggedValue::ColorAdc(ColorAdc {
            clear: read_u16_le(region, 0),
            red: read_u16_le(region, 2),
            green: read_u16_le(region, 4),
            blue: read_u16_le(region, 6),
        }),
        DataTypeId::ByteArray => {
            let (&len, body) = region
                .split_first()
                .ok_or_else(|| truncated(type_id, 1, 0))?;
            let len = len as usize;
            if body.len() < len {
                return Err(truncated(type_id, len + 1, region.len()));
            }
            TaggedValue::ByteArray(body[..len].to_vec())
        }
    })
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Encode a value as tag + value region, the inverse of [`decode_tagged`].
///
/// Fails with [`MetaWearError::PayloadTooLarge`] for byte arrays longer than
/// 255 bytes.
pub fn encode_tagged(value: &TaggedValue) -> Result<Vec<u8>> {
    let mut out = vec![value.type_id() as u8];
    match value {
        TaggedValue::UInt32(v) => out.extend_from_slice(&v.to_le_bytes()),
        TaggedValue::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
        TaggedValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        TaggedValue::CartesianFloat(c) => {
            for axis in [c.x, c.y, c.z] {
                out.extend_from_slice(&axis.to_le_bytes());
            }
        }
        TaggedValue::BatteryState(b) => out.extend_from_slice(&[b.voltage, b.charge]),
        TaggedValue::ColorAdc(c) => {
            for channel in [c.clear, c.red, c.green, c.blue] {
                out.extend_from_slice(&channel.to_le_bytes());
            }
        }
        TaggedValue::ByteArray(bytes) => {
            let len =
                u8::try_from(bytes.len()).map_err(|_| MetaWearError::PayloadTooLarge(bytes.len()))?;
            out.push(len);
            out.extend_from_slice(bytes);
        }
    }
    Ok(out)
}
