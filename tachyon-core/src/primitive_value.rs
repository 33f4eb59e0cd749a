use crate::error::{err, ErrorKind, Result};
use crate::primitive::PrimitiveTag;

/// A single typed primitive value, as appended to a sub-stream container.
/// `Struct` values are not representable here: struct-typed containers are
/// populated through `Container::append_bytes` directly since their layout
/// is caller-defined (spec C1: "primitive tag... struct").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Char(u8),
    Boolean(bool),
}

impl Value {
    pub fn tag(&self) -> PrimitiveTag {
        match self {
            Value::U8(_) => PrimitiveTag::U8,
            Value::U16(_) => PrimitiveTag::U16,
            Value::U32(_) => PrimitiveTag::U32,
            Value::U64(_) => PrimitiveTag::U64,
            Value::I8(_) => PrimitiveTag::I8,
            Value::I16(_) => PrimitiveTag::I16,
            Value::I32(_) => PrimitiveTag::I32,
            Value::I64(_) => PrimitiveTag::I64,
            Value::F32(_) => PrimitiveTag::F32,
            Value::F64(_) => PrimitiveTag::F64,
            Value::Char(_) => PrimitiveTag::Char,
            Value::Boolean(_) => PrimitiveTag::Boolean,
        }
    }

    pub fn to_le_bytes(self) -> Vec<u8> {
        match self {
            Value::U8(v) => vec![v],
            Value::U16(v) => v.to_le_bytes().to_vec(),
            Value::U32(v) => v.to_le_bytes().to_vec(),
            Value::U64(v) => v.to_le_bytes().to_vec(),
            Value::I8(v) => vec![v as u8],
            Value::I16(v) => v.to_le_bytes().to_vec(),
            Value::I32(v) => v.to_le_bytes().to_vec(),
            Value::I64(v) => v.to_le_bytes().to_vec(),
            Value::F32(v) => v.to_le_bytes().to_vec(),
            Value::F64(v) => v.to_le_bytes().to_vec(),
            Value::Char(v) => vec![v],
            Value::Boolean(v) => vec![v as u8],
        }
    }

    pub fn from_le_bytes(tag: PrimitiveTag, bytes: &[u8]) -> Result<Self> {
        fn need(bytes: &[u8], n: usize) -> Result<()> {
            if bytes.len() != n {
                return Err(err(
                    ErrorKind::TypeViolation,
                    format!("expected {n} bytes, got {}", bytes.len()),
                ));
            }
            Ok(())
        }
        Ok(match tag {
            PrimitiveTag::U8 => {
                need(bytes, 1)?;
                Value::U8(bytes[0])
            }
            PrimitiveTag::U16 => {
                need(bytes, 2)?;
                Value::U16(u16::from_le_bytes(bytes.try_into().unwrap()))
            }
            PrimitiveTag::U32 => {
                need(bytes, 4)?;
                Value::U32(u32::from_le_bytes(bytes.try_into().unwrap()))
            }
            PrimitiveTag::U64 => {
                need(bytes, 8)?;
                Value::U64(u64::from_le_bytes(bytes.try_into().unwrap()))
            }
            PrimitiveTag::I8 => {
                need(bytes, 1)?;
                Value::I8(bytes[0] as i8)
            }
            PrimitiveTag::I16 => {
                need(bytes, 2)?;
                Value::I16(i16::from_le_bytes(bytes.try_into().unwrap()))
            }
            PrimitiveTag::I32 => {
                need(bytes, 4)?;
                Value::I32(i32::from_le_bytes(bytes.try_into().unwrap()))
            }
            PrimitiveTag::I64 => {
                need(bytes, 8)?;
                Value::I64(i64::from_le_bytes(bytes.try_into().unwrap()))
            }
            PrimitiveTag::F32 => {
                need(bytes, 4)?;
                Value::F32(f32::from_le_bytes(bytes.try_into().unwrap()))
            }
            PrimitiveTag::F64 => {
                need(bytes, 8)?;
                Value::F64(f64::from_le_bytes(bytes.try_into().unwrap()))
            }
            PrimitiveTag::Char => {
                need(bytes, 1)?;
                Value::Char(bytes[0])
            }
            PrimitiveTag::Boolean => {
                need(bytes, 1)?;
                Value::Boolean(bytes[0] != 0)
            }
            PrimitiveTag::Struct => {
                return Err(err(
                    ErrorKind::TypeViolation,
                    "Struct has no scalar Value representation",
                ))
            }
        })
    }

    /// The value as a signed 64-bit integer, for containers whose tag is one
    /// of the signed integer widths. Used by signed-narrowing and by the
    /// genotype encoder's allele-code bookkeeping.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Value::I8(v) => v as i64,
            Value::I16(v) => v as i64,
            Value::I32(v) => v as i64,
            Value::I64(v) => v,
            Value::U8(v) => v as i64,
            Value::U16(v) => v as i64,
            Value::U32(v) => v as i64,
            Value::U64(v) => v as i64,
            _ => return None,
        })
    }
}
