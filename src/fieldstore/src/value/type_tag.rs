use std::fmt;

use crate::error::FieldStoreError;

/// Primitive value tags, one byte on the wire.
///
/// | Tag | Value | Element size |
/// | --- | ----- | ------------ |
/// | `Unknown` | 0  | 1 (treated as raw bytes) |
/// | `Bool`    | 1  | 1 |
/// | `UInt8`   | 2  | 1 |
/// | `Int8`    | 3  | 1 |
/// | `UInt16`  | 4  | 2 |
/// | `Int16`   | 5  | 2 |
/// | `UInt32`  | 6  | 4 |
/// | `Int32`   | 7  | 4 |
/// | `UInt64`  | 8  | 8 |
/// | `Int64`   | 9  | 8 |
/// | `Float32` | 10 | 4 |
/// | `Float64` | 11 | 8 |
/// | `Char16`  | 12 | 2 (UTF-16 code unit) |
/// | `Ref`     | 13 | 8 (container id) |
/// | `Blob`    | 14 | 1 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    Unknown = 0,
    Bool = 1,
    UInt8 = 2,
    Int8 = 3,
    UInt16 = 4,
    Int16 = 5,
    UInt32 = 6,
    Int32 = 7,
    UInt64 = 8,
    Int64 = 9,
    Float32 = 10,
    Float64 = 11,
    Char16 = 12,
    Ref = 13,
    Blob = 14,
}

impl ValueType {
    /// Canonical byte size of a single element of this tag.
    pub fn elem_size(self) -> u8 {
        match self {
            ValueType::Unknown => 1,
            ValueType::Bool => 1,
            ValueType::UInt8 => 1,
            ValueType::Int8 => 1,
            ValueType::UInt16 => 2,
            ValueType::Int16 => 2,
            ValueType::UInt32 => 4,
            ValueType::Int32 => 4,
            ValueType::UInt64 => 8,
            ValueType::Int64 => 8,
            ValueType::Float32 => 4,
            ValueType::Float64 => 8,
            ValueType::Char16 => 2,
            ValueType::Ref => 8,
            ValueType::Blob => 1,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ValueType::Float32 | ValueType::Float64)
    }
}

impl TryFrom<u8> for ValueType {
    type Error = FieldStoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ValueType::Unknown),
            1 => Ok(ValueType::Bool),
            2 => Ok(ValueType::UInt8),
            3 => Ok(ValueType::Int8),
            4 => Ok(ValueType::UInt16),
            5 => Ok(ValueType::Int16),
            6 => Ok(ValueType::UInt32),
            7 => Ok(ValueType::Int32),
            8 => Ok(ValueType::UInt64),
            9 => Ok(ValueType::Int64),
            10 => Ok(ValueType::Float32),
            11 => Ok(ValueType::Float64),
            12 => Ok(ValueType::Char16),
            13 => Ok(ValueType::Ref),
            14 => Ok(ValueType::Blob),
            other => Err(FieldStoreError::ArgumentError(format!(
                "unrecognized value tag 0x{other:02x}"
            ))),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Unknown => "Unknown",
            ValueType::Bool => "Bool",
            ValueType::UInt8 => "UInt8",
            ValueType::Int8 => "Int8",
            ValueType::UInt16 => "UInt16",
            ValueType::Int16 => "Int16",
            ValueType::UInt32 => "UInt32",
            ValueType::Int32 => "Int32",
            ValueType::UInt64 => "UInt64",
            ValueType::Int64 => "Int64",
            ValueType::Float32 => "Float32",
            ValueType::Float64 => "Float64",
            ValueType::Char16 => "Char16",
            ValueType::Ref => "Ref",
            ValueType::Blob => "Blob",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elem_sizes_match_table() {
        assert_eq!(ValueType::Ref.elem_size(), 8);
        assert_eq!(ValueType::Blob.elem_size(), 1);
        assert_eq!(ValueType::Char16.elem_size(), 2);
        assert_eq!(ValueType::Float64.elem_size(), 8);
    }

    #[test]
    fn round_trips_through_u8() {
        for raw in 0u8..=14 {
            let tag = ValueType::try_from(raw).unwrap();
            assert_eq!(tag as u8, raw);
        }
        assert!(ValueType::try_from(200).is_err());
    }
}
