//! The numeric conversion matrix used by `ValueView::write_from` and, through
//! [`crate::migrate`], by field reschemes.

use crate::value::type_tag::ValueType;

/// Whether a `src -> dst` conversion is always allowed, allowed only with
/// `explicit=true`, or never allowed through the numeric matrix at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Implicit,
    ExplicitOnly,
    Disallowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    UInt,
    SInt,
    Float,
}

fn classify_tag(tag: ValueType) -> Option<(Kind, u32)> {
    match tag {
        ValueType::Bool => Some((Kind::UInt, 8)),
        ValueType::UInt8 => Some((Kind::UInt, 8)),
        ValueType::Int8 => Some((Kind::SInt, 8)),
        ValueType::UInt16 => Some((Kind::UInt, 16)),
        ValueType::Int16 => Some((Kind::SInt, 16)),
        ValueType::Char16 => Some((Kind::UInt, 16)),
        ValueType::UInt32 => Some((Kind::UInt, 32)),
        ValueType::Int32 => Some((Kind::SInt, 32)),
        ValueType::UInt64 => Some((Kind::UInt, 64)),
        ValueType::Int64 => Some((Kind::SInt, 64)),
        ValueType::Float32 => Some((Kind::Float, 32)),
        ValueType::Float64 => Some((Kind::Float, 64)),
        ValueType::Ref | ValueType::Blob | ValueType::Unknown => None,
    }
}

/// Classifies a `src -> dst` conversion per the rules in spec §4.2:
/// widening within a family is implicit, narrowing is explicit-only, any
/// float-to-non-float conversion (including to `Char16`) is explicit-only,
/// and anything not in the numeric matrix (`Ref`, `Blob`, `Unknown`) is
/// disallowed outright.
pub fn classify(src: ValueType, dst: ValueType) -> Conversion {
    let (Some((sk, sb)), Some((dk, db))) = (classify_tag(src), classify_tag(dst)) else {
        return Conversion::Disallowed;
    };

    if sk == Kind::Float && dk != Kind::Float {
        return Conversion::ExplicitOnly;
    }
    if sk != Kind::Float && dk == Kind::Float {
        return if db > sb {
            Conversion::Implicit
        } else {
            Conversion::ExplicitOnly
        };
    }
    if sk == Kind::Float && dk == Kind::Float {
        return if db >= sb {
            Conversion::Implicit
        } else {
            Conversion::ExplicitOnly
        };
    }
    if sk == dk && db > sb {
        Conversion::Implicit
    } else {
        Conversion::ExplicitOnly
    }
}

/// A type-erased numeric value, used as the pivot between the source and
/// destination native Rust types during a conversion.
#[derive(Debug, Clone, Copy)]
pub enum DynNum {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl DynNum {
    pub fn read(bytes: &[u8], tag: ValueType) -> Option<DynNum> {
        let size = tag.elem_size() as usize;
        if bytes.len() < size {
            return None;
        }
        Some(match tag {
            ValueType::Bool | ValueType::UInt8 => DynNum::U8(bytes[0]),
            ValueType::Int8 => DynNum::I8(bytes[0] as i8),
            ValueType::UInt16 | ValueType::Char16 => {
                DynNum::U16(u16::from_le_bytes(bytes[..2].try_into().ok()?))
            }
            ValueType::Int16 => DynNum::I16(i16::from_le_bytes(bytes[..2].try_into().ok()?)),
            ValueType::UInt32 => DynNum::U32(u32::from_le_bytes(bytes[..4].try_into().ok()?)),
            ValueType::Int32 => DynNum::I32(i32::from_le_bytes(bytes[..4].try_into().ok()?)),
            ValueType::UInt64 => DynNum::U64(u64::from_le_bytes(bytes[..8].try_into().ok()?)),
            ValueType::Int64 => DynNum::I64(i64::from_le_bytes(bytes[..8].try_into().ok()?)),
            ValueType::Float32 => DynNum::F32(f32::from_le_bytes(bytes[..4].try_into().ok()?)),
            ValueType::Float64 => DynNum::F64(f64::from_le_bytes(bytes[..8].try_into().ok()?)),
            ValueType::Ref | ValueType::Blob | ValueType::Unknown => return None,
        })
    }

    pub fn write(self, tag: ValueType, out: &mut [u8]) {
        match tag {
            ValueType::Bool | ValueType::UInt8 => out[0] = self.as_u8(),
            ValueType::Int8 => out[0] = self.as_i8() as u8,
            ValueType::UInt16 | ValueType::Char16 => out[..2].copy_from_slice(&self.as_u16().to_le_bytes()),
            ValueType::Int16 => out[..2].copy_from_slice(&self.as_i16().to_le_bytes()),
            ValueType::UInt32 => out[..4].copy_from_slice(&self.as_u32().to_le_bytes()),
            ValueType::Int32 => out[..4].copy_from_slice(&self.as_i32().to_le_bytes()),
            ValueType::UInt64 => out[..8].copy_from_slice(&self.as_u64().to_le_bytes()),
            ValueType::Int64 => out[..8].copy_from_slice(&self.as_i64().to_le_bytes()),
            ValueType::Float32 => out[..4].copy_from_slice(&self.as_f32().to_le_bytes()),
            ValueType::Float64 => out[..8].copy_from_slice(&self.as_f64().to_le_bytes()),
            ValueType::Ref | ValueType::Blob | ValueType::Unknown => {}
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            DynNum::U8(v) => v,
            DynNum::I8(v) => v as u8,
            DynNum::U16(v) => v as u8,
            DynNum::I16(v) => v as u8,
            DynNum::U32(v) => v as u8,
            DynNum::I32(v) => v as u8,
            DynNum::U64(v) => v as u8,
            DynNum::I64(v) => v as u8,
            DynNum::F32(v) => v as u8,
            DynNum::F64(v) => v as u8,
        }
    }

    pub fn as_i8(self) -> i8 {
        match self {
            DynNum::U8(v) => v as i8,
            DynNum::I8(v) => v,
            DynNum::U16(v) => v as i8,
            DynNum::I16(v) => v as i8,
            DynNum::U32(v) => v as i8,
            DynNum::I32(v) => v as i8,
            DynNum::U64(v) => v as i8,
            DynNum::I64(v) => v as i8,
            DynNum::F32(v) => v as i8,
            DynNum::F64(v) => v as i8,
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            DynNum::U8(v) => v as u16,
            DynNum::I8(v) => v as u16,
            DynNum::U16(v) => v,
            DynNum::I16(v) => v as u16,
            DynNum::U32(v) => v as u16,
            DynNum::I32(v) => v as u16,
            DynNum::U64(v) => v as u16,
            DynNum::I64(v) => v as u16,
            DynNum::F32(v) => v as u16,
            DynNum::F64(v) => v as u16,
        }
    }

    pub fn as_i16(self) -> i16 {
        match self {
            DynNum::U8(v) => v as i16,
            DynNum::I8(v) => v as i16,
            DynNum::U16(v) => v as i16,
            DynNum::I16(v) => v,
            DynNum::U32(v) => v as i16,
            DynNum::I32(v) => v as i16,
            DynNum::U64(v) => v as i16,
            DynNum::I64(v) => v as i16,
            DynNum::F32(v) => v as i16,
            DynNum::F64(v) => v as i16,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            DynNum::U8(v) => v as u32,
            DynNum::I8(v) => v as u32,
            DynNum::U16(v) => v as u32,
            DynNum::I16(v) => v as u32,
            DynNum::U32(v) => v,
            DynNum::I32(v) => v as u32,
            DynNum::U64(v) => v as u32,
            DynNum::I64(v) => v as u32,
            DynNum::F32(v) => v as u32,
            DynNum::F64(v) => v as u32,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            DynNum::U8(v) => v as i32,
            DynNum::I8(v) => v as i32,
            DynNum::U16(v) => v as i32,
            DynNum::I16(v) => v as i32,
            DynNum::U32(v) => v as i32,
            DynNum::I32(v) => v,
            DynNum::U64(v) => v as i32,
            DynNum::I64(v) => v as i32,
            DynNum::F32(v) => v as i32,
            DynNum::F64(v) => v as i32,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            DynNum::U8(v) => v as u64,
            DynNum::I8(v) => v as u64,
            DynNum::U16(v) => v as u64,
            DynNum::I16(v) => v as u64,
            DynNum::U32(v) => v as u64,
            DynNum::I32(v) => v as u64,
            DynNum::U64(v) => v,
            DynNum::I64(v) => v as u64,
            DynNum::F32(v) => v as u64,
            DynNum::F64(v) => v as u64,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            DynNum::U8(v) => v as i64,
            DynNum::I8(v) => v as i64,
            DynNum::U16(v) => v as i64,
            DynNum::I16(v) => v as i64,
            DynNum::U32(v) => v as i64,
            DynNum::I32(v) => v as i64,
            DynNum::U64(v) => v as i64,
            DynNum::I64(v) => v,
            DynNum::F32(v) => v as i64,
            DynNum::F64(v) => v as i64,
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            DynNum::U8(v) => v as f32,
            DynNum::I8(v) => v as f32,
            DynNum::U16(v) => v as f32,
            DynNum::I16(v) => v as f32,
            DynNum::U32(v) => v as f32,
            DynNum::I32(v) => v as f32,
            DynNum::U64(v) => v as f32,
            DynNum::I64(v) => v as f32,
            DynNum::F32(v) => v,
            DynNum::F64(v) => v as f32,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            DynNum::U8(v) => v as f64,
            DynNum::I8(v) => v as f64,
            DynNum::U16(v) => v as f64,
            DynNum::I16(v) => v as f64,
            DynNum::U32(v) => v as f64,
            DynNum::I32(v) => v as f64,
            DynNum::U64(v) => v as f64,
            DynNum::I64(v) => v as f64,
            DynNum::F32(v) => v as f64,
            DynNum::F64(v) => v,
        }
    }

    pub fn is_nan(self) -> bool {
        match self {
            DynNum::F32(v) => v.is_nan(),
            DynNum::F64(v) => v.is_nan(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widening_is_implicit() {
        assert_eq!(classify(ValueType::Int16, ValueType::Int32), Conversion::Implicit);
        assert_eq!(classify(ValueType::Int32, ValueType::Int64), Conversion::Implicit);
        assert_eq!(classify(ValueType::Int32, ValueType::Float64), Conversion::Implicit);
    }

    #[test]
    fn narrowing_is_explicit_only() {
        assert_eq!(classify(ValueType::Int64, ValueType::Int32), Conversion::ExplicitOnly);
        assert_eq!(classify(ValueType::Float64, ValueType::Float32), Conversion::ExplicitOnly);
    }

    #[test]
    fn float_to_int_is_explicit_only() {
        assert_eq!(classify(ValueType::Float64, ValueType::Int32), Conversion::ExplicitOnly);
        assert_eq!(classify(ValueType::Float32, ValueType::Char16), Conversion::ExplicitOnly);
    }

    #[test]
    fn ref_and_blob_are_disallowed() {
        assert_eq!(classify(ValueType::Ref, ValueType::Int64), Conversion::Disallowed);
        assert_eq!(classify(ValueType::Blob, ValueType::UInt8), Conversion::Disallowed);
    }

    #[test]
    fn overflowing_double_to_float_saturates_to_infinity() {
        let big = DynNum::F64(1e40);
        assert_eq!(big.as_f32(), f32::INFINITY);
    }
}
