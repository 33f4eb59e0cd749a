//! Primitive type tags and their "missing"/"end-of-vector" sentinels
//! (spec §3 "Primitive type tag").
//!
//! Sentinel convention follows BCF/htslib exactly (the external VCF library
//! spec §6 delegates to uses the same convention, so no translation is
//! needed at the VCF boundary): for a signed integer width, missing and eov
//! are the two lexicographically smallest representable values of that
//! width (e.g. i8: missing=-128, eov=-127); for floats, designated
//! NaN-with-payload bit patterns.

use crate::error::{err, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrimitiveTag {
    U8 = 0,
    U16 = 1,
    U32 = 2,
    U64 = 3,
    I8 = 4,
    I16 = 5,
    I32 = 6,
    I64 = 7,
    F32 = 8,
    F64 = 9,
    Char = 10,
    Boolean = 11,
    Struct = 12,
}

impl PrimitiveTag {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => PrimitiveTag::U8,
            1 => PrimitiveTag::U16,
            2 => PrimitiveTag::U32,
            3 => PrimitiveTag::U64,
            4 => PrimitiveTag::I8,
            5 => PrimitiveTag::I16,
            6 => PrimitiveTag::I32,
            7 => PrimitiveTag::I64,
            8 => PrimitiveTag::F32,
            9 => PrimitiveTag::F64,
            10 => PrimitiveTag::Char,
            11 => PrimitiveTag::Boolean,
            12 => PrimitiveTag::Struct,
            // Spec §9 resolves the "unknown primitive tag" open question as
            // a hard error, never a silent skip.
            other => {
                return Err(err(
                    ErrorKind::Unsupported,
                    format!("unknown primitive tag {other}"),
                ))
            }
        })
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            PrimitiveTag::I8
                | PrimitiveTag::I16
                | PrimitiveTag::I32
                | PrimitiveTag::I64
                | PrimitiveTag::F32
                | PrimitiveTag::F64
        )
    }

    /// Byte width of one element, or `None` for variable-width `Struct`.
    pub fn width(&self) -> Option<usize> {
        Some(match self {
            PrimitiveTag::U8 | PrimitiveTag::I8 | PrimitiveTag::Char | PrimitiveTag::Boolean => 1,
            PrimitiveTag::U16 | PrimitiveTag::I16 => 2,
            PrimitiveTag::U32 | PrimitiveTag::I32 | PrimitiveTag::F32 => 4,
            PrimitiveTag::U64 | PrimitiveTag::I64 | PrimitiveTag::F64 => 8,
            PrimitiveTag::Struct => return None,
        })
    }
}

/// The two sentinel bit patterns for a signed/float primitive, as raw
/// little-endian bytes of the primitive's own width. Unsigned, Char,
/// Boolean, and Struct tags carry no sentinel (spec: "Reserved sentinels in
/// each signed/float width").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentinels {
    pub missing: i64,
    pub eov: i64,
}

pub fn sentinels_for(tag: PrimitiveTag) -> Option<Sentinels> {
    Some(match tag {
        PrimitiveTag::I8 => Sentinels {
            missing: i8::MIN as i64,
            eov: (i8::MIN as i64) + 1,
        },
        PrimitiveTag::I16 => Sentinels {
            missing: i16::MIN as i64,
            eov: (i16::MIN as i64) + 1,
        },
        PrimitiveTag::I32 => Sentinels {
            missing: i32::MIN as i64,
            eov: (i32::MIN as i64) + 1,
        },
        PrimitiveTag::I64 => Sentinels {
            missing: i64::MIN,
            eov: i64::MIN + 1,
        },
        // f32 missing/eov per htslib: 0x7F800001 / 0x7F800002 bit patterns.
        PrimitiveTag::F32 => Sentinels {
            missing: 0x7F80_0001_i64,
            eov: 0x7F80_0002_i64,
        },
        // f64 equivalents, widened the same way.
        PrimitiveTag::F64 => Sentinels {
            missing: 0x7FF0_0000_0000_0001_u64 as i64,
            eov: 0x7FF0_0000_0000_0002_u64 as i64,
        },
        _ => return None,
    })
}

pub fn f32_missing() -> f32 {
    f32::from_bits(0x7F80_0001)
}
pub fn f32_eov() -> f32 {
    f32::from_bits(0x7F80_0002)
}
pub fn f32_is_missing(v: f32) -> bool {
    v.to_bits() == 0x7F80_0001
}
pub fn f32_is_eov(v: f32) -> bool {
    v.to_bits() == 0x7F80_0002
}
