//! Bytes-to-bytes conversion of a field's payload when its declared value
//! type changes (`Container::retype_field`).

use crate::error::FieldStoreError;
use crate::value::{classify, Conversion, DynNum, FieldType, ValueType};

/// Converts `src` into a freshly allocated buffer of `dst_len` bytes shaped
/// like `dst_field_type`.
///
/// Unknown source tags, or element sizes that do not evenly divide the
/// source length, always degrade to a raw prefix copy — this is the only
/// fallback that silently reinterprets bytes, and it exists to keep layout
/// evolution safe across untyped blobs (spec §4.3). A known-type pair that
/// `classify` marks `Disallowed` (e.g. `Ref` <-> a numeric tag) fails with
/// `InvalidCast` instead, matching `ValueView::write_from`.
pub fn convert(
    src: &[u8],
    src_field_type: FieldType,
    dst_field_type: FieldType,
    dst_len: usize,
    explicit: bool,
) -> Result<Vec<u8>, FieldStoreError> {
    let mut dst = vec![0u8; dst_len];

    let src_elem = src_field_type.elem_size() as usize;
    let raw_fallback = src_field_type.tag() == ValueType::Unknown
        || dst_field_type.tag() == ValueType::Unknown
        || src_elem == 0
        || src.len() % src_elem != 0;

    if raw_fallback {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        return Ok(dst);
    }

    if src_field_type.is_array() || dst_field_type.is_array() {
        elementwise(src, src_field_type, &mut dst, dst_field_type, explicit)?;
    } else {
        scalar_into(src, src_field_type.tag(), &mut dst, dst_field_type.tag(), explicit)?;
    }

    Ok(dst)
}

fn elementwise(
    src: &[u8],
    src_field_type: FieldType,
    dst: &mut [u8],
    dst_field_type: FieldType,
    explicit: bool,
) -> Result<(), FieldStoreError> {
    let src_elem = src_field_type.elem_size() as usize;
    let dst_elem = dst_field_type.elem_size() as usize;
    if src_elem == 0 || dst_elem == 0 {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        return Ok(());
    }

    let src_count = src.len() / src_elem;
    let dst_count = dst.len() / dst_elem;
    let shared = src_count.min(dst_count);

    for i in 0..shared {
        let s = &src[i * src_elem..(i + 1) * src_elem];
        let d = &mut dst[i * dst_elem..(i + 1) * dst_elem];
        scalar_into(s, src_field_type.tag(), d, dst_field_type.tag(), explicit)?;
    }
    // Trailing destination elements beyond `shared` are already zero.
    Ok(())
}

fn scalar_into(src: &[u8], src_tag: ValueType, dst: &mut [u8], dst_tag: ValueType, explicit: bool) -> Result<(), FieldStoreError> {
    if src_tag == dst_tag {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
        for b in &mut dst[n..] {
            *b = 0;
        }
        return Ok(());
    }

    match classify(src_tag, dst_tag) {
        Conversion::Disallowed => Err(FieldStoreError::InvalidCast {
            from: src_tag.to_string(),
            to: dst_tag.to_string(),
        }),
        Conversion::ExplicitOnly if !explicit => Err(FieldStoreError::InvalidCast {
            from: src_tag.to_string(),
            to: dst_tag.to_string(),
        }),
        Conversion::Implicit | Conversion::ExplicitOnly => {
            if let Some(value) = DynNum::read(src, src_tag) {
                value.write(dst_tag, dst);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_source_falls_back_to_raw_copy() {
        let src = vec![1u8, 2, 3, 4, 5];
        let src_ft = FieldType::from_raw(ValueType::Unknown as u8).unwrap();
        let dst_ft = FieldType::pack(ValueType::Int32, false);
        let out = convert(&src, src_ft, dst_ft, 8, false).unwrap();
        assert_eq!(&out[..5], &src[..]);
        assert_eq!(&out[5..], &[0, 0, 0]);
    }

    #[test]
    fn float_array_migration_explicit_saturates_to_infinity() {
        let values: [f64; 3] = [1.234_567_890_123_45, -2.5, 1e40];
        let mut src = Vec::new();
        for v in values {
            src.extend_from_slice(&v.to_le_bytes());
        }
        let src_ft = FieldType::pack(ValueType::Float64, true);
        let dst_ft = FieldType::pack(ValueType::Float32, true);
        let out = convert(&src, src_ft, dst_ft, 4 * 3, true).unwrap();

        let read_f32 = |i: usize| f32::from_le_bytes(out[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(read_f32(0), 1.234_567_890_123_45f64 as f32);
        assert_eq!(read_f32(1), -2.5f32);
        assert_eq!(read_f32(2), f32::INFINITY);
    }

    #[test]
    fn elementwise_zero_fills_trailing_destination_elements() {
        let src: Vec<u8> = vec![7i32, 8].into_iter().flat_map(i32::to_le_bytes).collect();
        let src_ft = FieldType::pack(ValueType::Int32, true);
        let dst_ft = FieldType::pack(ValueType::Int32, true);
        let out = convert(&src, src_ft, dst_ft, 4 * 4, false).unwrap();
        assert_eq!(i32::from_le_bytes(out[0..4].try_into().unwrap()), 7);
        assert_eq!(i32::from_le_bytes(out[4..8].try_into().unwrap()), 8);
        assert_eq!(&out[8..], &[0u8; 8]);
    }

    #[test]
    fn disallowed_pair_fails_instead_of_reinterpreting_bytes() {
        let id = 7u64.to_le_bytes();
        let src_ft = FieldType::pack(ValueType::Ref, false);
        let dst_ft = FieldType::pack(ValueType::Int32, false);
        assert!(matches!(convert(&id, src_ft, dst_ft, 4, true), Err(FieldStoreError::InvalidCast { .. })));
    }
}
