use crate::error::FieldStoreError;
use crate::value::convert::{classify, Conversion, DynNum};
use crate::value::type_tag::ValueType;

/// A primitive type that can be read from / written to a little-endian byte
/// slice. Mirrors the `BufReaderExtension` read helpers in the teacher crate,
/// generalized over the fixed set of wire primitives instead of a single
/// stream type.
pub trait LePrimitive: Copy + 'static {
    const SIZE: usize;
    const TAG: ValueType;

    fn from_le(bytes: &[u8]) -> Self;
    fn to_le(self, out: &mut [u8]);
}

macro_rules! impl_le_primitive {
    ($t:ty, $tag:expr) => {
        impl LePrimitive for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            const TAG: ValueType = $tag;

            fn from_le(bytes: &[u8]) -> Self {
                <$t>::from_le_bytes(bytes[..Self::SIZE].try_into().unwrap())
            }

            fn to_le(self, out: &mut [u8]) {
                out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_le_primitive!(u8, ValueType::UInt8);
impl_le_primitive!(i8, ValueType::Int8);
impl_le_primitive!(u16, ValueType::UInt16);
impl_le_primitive!(i16, ValueType::Int16);
impl_le_primitive!(u32, ValueType::UInt32);
impl_le_primitive!(i32, ValueType::Int32);
impl_le_primitive!(u64, ValueType::UInt64);
impl_le_primitive!(i64, ValueType::Int64);
impl_le_primitive!(f32, ValueType::Float32);
impl_le_primitive!(f64, ValueType::Float64);

/// A non-owning, read-only typed window over a field's bytes.
#[derive(Debug, Clone, Copy)]
pub struct ReadOnlyValueView<'a> {
    bytes: &'a [u8],
    tag: ValueType,
}

impl<'a> ReadOnlyValueView<'a> {
    pub fn new(bytes: &'a [u8], tag: ValueType) -> Self {
        ReadOnlyValueView { bytes, tag }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn tag(&self) -> ValueType {
        self.tag
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Reinterprets the slice as `T`, ignoring any excess trailing bytes.
    pub fn try_read<T: LePrimitive>(&self) -> Option<T> {
        if self.bytes.len() >= T::SIZE {
            Some(T::from_le(self.bytes))
        } else {
            None
        }
    }

    pub fn read<T: LePrimitive>(&self) -> Result<T, FieldStoreError> {
        self.try_read().ok_or(FieldStoreError::IndexOutOfRange {
            index: T::SIZE,
            len: self.bytes.len(),
        })
    }

    fn as_float_dyn(&self) -> Option<DynNum> {
        match self.tag {
            ValueType::Float32 | ValueType::Float64 => DynNum::read(self.bytes, self.tag),
            _ => None,
        }
    }

    pub fn is_nan(&self) -> bool {
        self.as_float_dyn().map(|v| v.is_nan()).unwrap_or(false)
    }

    pub fn is_finite(&self) -> bool {
        match self.tag {
            ValueType::Float32 => self.try_read::<f32>().map(|v| v.is_finite()).unwrap_or(false),
            ValueType::Float64 => self.try_read::<f64>().map(|v| v.is_finite()).unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_infinity(&self) -> bool {
        match self.tag {
            ValueType::Float32 => self.try_read::<f32>().map(|v| v.is_infinite()).unwrap_or(false),
            ValueType::Float64 => self.try_read::<f64>().map(|v| v.is_infinite()).unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_positive_infinity(&self) -> bool {
        match self.tag {
            ValueType::Float32 => self
                .try_read::<f32>()
                .map(|v| v == f32::INFINITY)
                .unwrap_or(false),
            ValueType::Float64 => self
                .try_read::<f64>()
                .map(|v| v == f64::INFINITY)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// `Char16` interprets the whole slice as UTF-16; `Ref` of the wrong
    /// length reports `"null"`; malformed numeric lengths fall back to a hex
    /// dump, matching spec §4.2.
    pub fn to_display_string(&self) -> String {
        match self.tag {
            ValueType::Char16 => {
                let units: Vec<u16> = self
                    .bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            ValueType::Ref => match self.try_read::<u64>() {
                Some(id) => id.to_string(),
                None => "null".to_string(),
            },
            ValueType::Bool => self.try_read::<u8>().map(|v| (v != 0).to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::UInt8 => self.try_read::<u8>().map(|v| v.to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::Int8 => self.try_read::<i8>().map(|v| v.to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::UInt16 => self.try_read::<u16>().map(|v| v.to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::Int16 => self.try_read::<i16>().map(|v| v.to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::UInt32 => self.try_read::<u32>().map(|v| v.to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::Int32 => self.try_read::<i32>().map(|v| v.to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::UInt64 => self.try_read::<u64>().map(|v| v.to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::Int64 => self.try_read::<i64>().map(|v| v.to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::Float32 => self.try_read::<f32>().map(|v| v.to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::Float64 => self.try_read::<f64>().map(|v| v.to_string()).unwrap_or_else(|| hex_dump(self.bytes)),
            ValueType::Blob | ValueType::Unknown => hex_dump(self.bytes),
        }
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("Raw: {hex}")
}

/// A non-owning, mutable typed window over a field's bytes.
pub struct ValueView<'a> {
    bytes: &'a mut [u8],
    tag: ValueType,
}

impl<'a> ValueView<'a> {
    pub fn new(bytes: &'a mut [u8], tag: ValueType) -> Self {
        ValueView { bytes, tag }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn tag(&self) -> ValueType {
        self.tag
    }

    pub fn as_read_only(&self) -> ReadOnlyValueView<'_> {
        ReadOnlyValueView::new(self.bytes, self.tag)
    }

    /// Writes `sizeof(T)` bytes little-endian and zeroes any trailing bytes
    /// in the slice — the zero-extension invariant tested by spec §8.4.
    pub fn try_write<T: LePrimitive>(&mut self, value: T) -> bool {
        if self.bytes.len() < T::SIZE {
            return false;
        }
        value.to_le(self.bytes);
        for b in &mut self.bytes[T::SIZE..] {
            *b = 0;
        }
        true
    }

    pub fn write<T: LePrimitive>(&mut self, value: T) -> Result<(), FieldStoreError> {
        if self.try_write(value) {
            Ok(())
        } else {
            Err(FieldStoreError::IndexOutOfRange {
                index: T::SIZE,
                len: self.bytes.len(),
            })
        }
    }

    /// Type-directed assignment from `source`. Equal tags copy bytes
    /// (truncating or zero-padding to fit); otherwise the conversion matrix
    /// decides whether the assignment is allowed.
    pub fn write_from(&mut self, source: ReadOnlyValueView<'_>, explicit: bool) -> Result<(), FieldStoreError> {
        if source.tag() == self.tag {
            let n = source.bytes().len().min(self.bytes.len());
            self.bytes[..n].copy_from_slice(&source.bytes()[..n]);
            for b in &mut self.bytes[n..] {
                *b = 0;
            }
            return Ok(());
        }

        match classify(source.tag(), self.tag) {
            Conversion::Disallowed => Err(FieldStoreError::InvalidCast {
                from: source.tag().to_string(),
                to: self.tag.to_string(),
            }),
            Conversion::ExplicitOnly if !explicit => Err(FieldStoreError::InvalidCast {
                from: source.tag().to_string(),
                to: self.tag.to_string(),
            }),
            Conversion::Implicit | Conversion::ExplicitOnly => {
                let value = DynNum::read(source.bytes(), source.tag()).ok_or(
                    FieldStoreError::IndexOutOfRange {
                        index: source.tag().elem_size() as usize,
                        len: source.bytes().len(),
                    },
                )?;
                value.write(self.tag, self.bytes);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_zero_extends() {
        let mut buf = [0u8; 4];
        {
            let mut view = ValueView::new(&mut buf, ValueType::Int16);
            view.write::<i16>(0xABCDu16 as i16).unwrap();
        }
        let read_back = ReadOnlyValueView::new(&buf, ValueType::Int32).read::<i32>().unwrap();
        assert_eq!(read_back, 0x0000_00CDu32 as i32);
    }

    #[test]
    fn write_from_matching_tag_truncates_and_pads() {
        let src_bytes = 42u32.to_le_bytes();
        let src = ReadOnlyValueView::new(&src_bytes, ValueType::UInt32);
        let mut dst_bytes = [0xffu8; 8];
        let mut dst = ValueView::new(&mut dst_bytes, ValueType::UInt32);
        dst.write_from(src, false).unwrap();
        assert_eq!(u32::from_le_bytes(dst_bytes[..4].try_into().unwrap()), 42);
        assert_eq!(&dst_bytes[4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn write_from_rejects_narrowing_without_explicit() {
        let src_bytes = 1.5f64.to_le_bytes();
        let src = ReadOnlyValueView::new(&src_bytes, ValueType::Float64);
        let mut dst_bytes = [0u8; 4];
        let mut dst = ValueView::new(&mut dst_bytes, ValueType::Float32);
        assert!(dst.write_from(src, false).is_err());
        assert!(dst.write_from(src, true).is_ok());
    }

    #[test]
    fn to_display_string_handles_ref_and_char16() {
        let bad_ref = [0u8; 3];
        assert_eq!(ReadOnlyValueView::new(&bad_ref, ValueType::Ref).to_display_string(), "null");

        let hi: Vec<u8> = "hi".encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(ReadOnlyValueView::new(&hi, ValueType::Char16).to_display_string(), "hi");
    }
}
