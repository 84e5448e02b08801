//! Owns a contiguous byte buffer; typed field access, reschemes, and bulk
//! operations (spec §4.5). Grounded on the teacher's `PeImage`, which owns a
//! parsed image and exposes typed accessors over its sections, combined with
//! the scratch-buffer rebuild strategy DESIGN NOTES §9 mandates for
//! reschemes.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::trace;

use crate::error::FieldStoreError;
use crate::layout::{assemble, ContainerHeader, FieldHeader, PlannedField};
use crate::migrate;
use crate::pool::BufferPool;
use crate::subscription::{StorageEvent, SubscriptionBus};
use crate::value::{FieldType, LePrimitive, ReadOnlyValueView, ValueType, ValueView};

pub struct Container {
    buffer: Vec<u8>,
    disposed: bool,
    pool: Option<Rc<RefCell<BufferPool>>>,
    subs: SubscriptionBus,
}

impl Container {
    pub(crate) fn from_raw(buffer: Vec<u8>, pool: Option<Rc<RefCell<BufferPool>>>) -> Container {
        Container {
            buffer,
            disposed: false,
            pool,
            subs: SubscriptionBus::new(),
        }
    }

    fn ensure_live(&self) -> Result<(), FieldStoreError> {
        if self.disposed {
            Err(FieldStoreError::ObjectDisposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn dispatch_event(&mut self, field: &str, event: StorageEvent, path: &str) {
        self.subs.dispatch(field, event, path);
    }

    fn raw_header(&self) -> ContainerHeader {
        ContainerHeader::from(self.buffer[..ContainerHeader::SIZE].try_into().unwrap())
    }

    pub fn header(&self) -> Result<ContainerHeader, FieldStoreError> {
        self.ensure_live()?;
        Ok(self.raw_header())
    }

    pub fn id(&self) -> Result<u64, FieldStoreError> {
        Ok(self.header()?.id)
    }

    pub(crate) fn set_id(&mut self, id: u64) {
        let mut header = self.raw_header();
        header.id = id;
        header.write_into(&mut self.buffer[..ContainerHeader::SIZE]);
    }

    pub fn total_length(&self) -> Result<u32, FieldStoreError> {
        Ok(self.header()?.total_length)
    }

    pub fn field_count(&self) -> Result<u16, FieldStoreError> {
        Ok(self.header()?.field_count)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn field_header(&self, index: usize) -> FieldHeader {
        let start = ContainerHeader::SIZE + index * FieldHeader::SIZE;
        FieldHeader::from(self.buffer[start..start + FieldHeader::SIZE].try_into().unwrap()).expect("validated directory entry")
    }

    fn field_name_units(&self, fh: &FieldHeader) -> Vec<u16> {
        let start = fh.name_offset as usize;
        let len = fh.name_length as usize;
        (0..len)
            .map(|i| u16::from_le_bytes([self.buffer[start + i * 2], self.buffer[start + i * 2 + 1]]))
            .collect()
    }

    pub fn field_name(&self, index: usize) -> String {
        let fh = self.field_header(index);
        String::from_utf16_lossy(&self.field_name_units(&fh))
    }

    pub fn field_header_tag(&self, index: usize) -> ValueType {
        self.field_header(index).field_type.tag()
    }

    pub fn field_header_elem_size(&self, index: usize) -> u8 {
        self.field_header(index).elem_size
    }

    fn raw_field_count(&self) -> u16 {
        self.raw_header().field_count
    }

    /// Binary-searches the sorted directory for `name` (spec §4.5).
    pub fn index_of(&self, name: &str) -> Option<usize> {
        if self.disposed {
            return None;
        }
        let target: Vec<u16> = name.encode_utf16().collect();
        let count = self.raw_field_count() as usize;
        let mut lo = 0usize;
        let mut hi = count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let fh = self.field_header(mid);
            match self.field_name_units(&fh).cmp(&target) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    fn field_bytes(&self, index: usize) -> &[u8] {
        let fh = self.field_header(index);
        let start = fh.data_offset as usize;
        &self.buffer[start..start + fh.length as usize]
    }

    fn field_bytes_mut(&mut self, index: usize) -> &mut [u8] {
        let fh = self.field_header(index);
        let start = fh.data_offset as usize;
        &mut self.buffer[start..start + fh.length as usize]
    }

    pub fn get_field_bytes(&self, name: &str) -> Result<&[u8], FieldStoreError> {
        self.ensure_live()?;
        let idx = self.index_of(name).ok_or_else(|| FieldStoreError::KeyNotFound(name.to_string()))?;
        Ok(self.field_bytes(idx))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn try_read<T: LePrimitive>(&self, name: &str) -> Option<T> {
        if self.disposed {
            return None;
        }
        let idx = self.index_of(name)?;
        ReadOnlyValueView::new(self.field_bytes(idx), T::TAG).try_read()
    }

    pub fn read<T: LePrimitive>(&self, name: &str) -> Result<T, FieldStoreError> {
        self.ensure_live()?;
        let idx = self.index_of(name).ok_or_else(|| FieldStoreError::KeyNotFound(name.to_string()))?;
        ReadOnlyValueView::new(self.field_bytes(idx), T::TAG).read()
    }

    /// Writes `value` into `name`. If the field is too small, `allow_rescheme`
    /// decides whether it is grown in place (a resize rescheme) or the write
    /// fails with `IndexOutOfRange`.
    pub fn write<T: LePrimitive>(&mut self, name: &str, value: T, allow_rescheme: bool) -> Result<(), FieldStoreError> {
        self.ensure_live()?;
        let idx = self.index_of(name).ok_or_else(|| FieldStoreError::KeyNotFound(name.to_string()))?;
        let fh = self.field_header(idx);

        if (T::SIZE as u32) > fh.length {
            if !allow_rescheme {
                return Err(FieldStoreError::IndexOutOfRange {
                    index: T::SIZE,
                    len: fh.length as usize,
                });
            }
            self.resize_field(name, T::SIZE as u32)?;
        }

        let idx = self.index_of(name).expect("field still present after resize");
        let tag = self.field_header(idx).field_type.tag();
        ValueView::new(self.field_bytes_mut(idx), tag).write(value)?;
        self.dispatch_event(name, StorageEvent::Write, name);
        Ok(())
    }

    pub fn try_write<T: LePrimitive>(&mut self, name: &str, value: T) -> bool {
        if self.disposed {
            return false;
        }
        let Some(idx) = self.index_of(name) else { return false };
        let fh = self.field_header(idx);
        if (T::SIZE as u32) > fh.length {
            return false;
        }
        let tag = fh.field_type.tag();
        let ok = ValueView::new(self.field_bytes_mut(idx), tag).try_write(value);
        if ok {
            self.dispatch_event(name, StorageEvent::Write, name);
        }
        ok
    }

    pub fn write_bytes(&mut self, name: &str, payload: &[u8]) -> Result<(), FieldStoreError> {
        self.ensure_live()?;
        let idx = self.index_of(name).ok_or_else(|| FieldStoreError::KeyNotFound(name.to_string()))?;
        let fh = self.field_header(idx);
        if payload.len() as u32 != fh.length {
            return Err(FieldStoreError::ArgumentError(format!(
                "payload length {} does not match field length {}",
                payload.len(),
                fh.length
            )));
        }
        self.field_bytes_mut(idx).copy_from_slice(payload);
        self.dispatch_event(name, StorageEvent::Write, name);
        Ok(())
    }

    pub fn try_write_bytes(&mut self, name: &str, payload: &[u8]) -> bool {
        if self.disposed {
            return false;
        }
        let Some(idx) = self.index_of(name) else { return false };
        let fh = self.field_header(idx);
        if payload.len() as u32 != fh.length {
            return false;
        }
        self.field_bytes_mut(idx).copy_from_slice(payload);
        self.dispatch_event(name, StorageEvent::Write, name);
        true
    }

    pub fn get_ref(&self, name: &str) -> Result<u64, FieldStoreError> {
        self.ensure_live()?;
        let idx = self.index_of(name).ok_or_else(|| FieldStoreError::KeyNotFound(name.to_string()))?;
        ReadOnlyValueView::new(self.field_bytes(idx), ValueType::Ref).read::<u64>()
    }

    pub fn set_ref(&mut self, name: &str, id: u64) -> Result<(), FieldStoreError> {
        self.write_bytes(name, &id.to_le_bytes())
    }

    pub fn write_object(&mut self, name: &str, other: &Container) -> Result<(), FieldStoreError> {
        self.set_ref(name, other.id()?)
    }

    fn snapshot_fields(&self) -> Vec<PlannedField> {
        (0..self.raw_field_count() as usize)
            .map(|i| PlannedField {
                name: self.field_name(i),
                field_type: self.field_header(i).field_type,
                payload: self.field_bytes(i).to_vec(),
            })
            .collect()
    }

    /// Assumes the caller already checked `ensure_live()`; every call site
    /// does (rename/set/delete/resize/retype all guard on entry).
    fn rebuild(&mut self, fields: Vec<PlannedField>) {
        let header = self.raw_header();
        let old = std::mem::take(&mut self.buffer);
        self.buffer = assemble(old, header.id, header.version, fields);
    }

    /// Renames a field, re-sorting the directory and shifting name/data
    /// offsets while preserving every field's payload bytes.
    pub fn rename_field(&mut self, old_name: &str, new_name: &str) -> Result<(), FieldStoreError> {
        self.ensure_live()?;
        if old_name == new_name {
            return Ok(());
        }
        let idx = self.index_of(old_name).ok_or_else(|| FieldStoreError::KeyNotFound(old_name.to_string()))?;
        if self.index_of(new_name).is_some() {
            return Err(FieldStoreError::ArgumentError(format!("field {new_name:?} already exists")));
        }
        let mut fields = self.snapshot_fields();
        fields[idx].name = new_name.to_string();
        trace!(old_name, new_name, "rename_field");
        self.rebuild(fields);
        // Old subscribers hear about the rename; they are not migrated to
        // the new name (spec §4.9 rule 2).
        self.dispatch_event(old_name, StorageEvent::Rename, new_name);
        Ok(())
    }

    /// Inserts a field that does not yet exist, or replaces one whose shape
    /// (type or length) no longer matches — the operation path auto-creation
    /// and reshaping build on. If the field already matches `field_type` and
    /// `payload.len()`, this is just a byte copy.
    pub fn set_field(&mut self, name: &str, field_type: FieldType, payload: Vec<u8>) -> Result<(), FieldStoreError> {
        self.ensure_live()?;
        if let Some(idx) = self.index_of(name) {
            let fh = self.field_header(idx);
            if fh.field_type == field_type && fh.length as usize == payload.len() {
                self.field_bytes_mut(idx).copy_from_slice(&payload);
                self.dispatch_event(name, StorageEvent::Write, name);
                return Ok(());
            }
        }
        let mut fields = self.snapshot_fields();
        match fields.iter().position(|f| f.name == name) {
            Some(pos) => {
                fields[pos] = PlannedField {
                    name: name.to_string(),
                    field_type,
                    payload,
                };
            }
            None => fields.push(PlannedField {
                name: name.to_string(),
                field_type,
                payload,
            }),
        }
        self.rebuild(fields);
        Ok(())
    }

    /// Removes a field entirely, re-sorting the directory and shifting
    /// offsets; fires one `Delete` event.
    pub fn delete_field(&mut self, name: &str) -> Result<(), FieldStoreError> {
        self.ensure_live()?;
        if self.index_of(name).is_none() {
            return Err(FieldStoreError::KeyNotFound(name.to_string()));
        }
        let mut fields = self.snapshot_fields();
        fields.retain(|f| f.name != name);
        self.rebuild(fields);
        self.dispatch_event(name, StorageEvent::Delete, name);
        Ok(())
    }

    /// Grows or shrinks a field in place. Growth zero-fills new bytes
    /// (invariant 5); shrinking truncates.
    pub fn resize_field(&mut self, name: &str, new_byte_length: u32) -> Result<(), FieldStoreError> {
        self.ensure_live()?;
        let idx = self.index_of(name).ok_or_else(|| FieldStoreError::KeyNotFound(name.to_string()))?;
        let mut fields = self.snapshot_fields();
        let elem = fields[idx].field_type.elem_size() as u32;
        if elem != 0 && new_byte_length % elem != 0 {
            return Err(FieldStoreError::ArgumentError(format!(
                "new length {new_byte_length} is not a multiple of element size {elem}"
            )));
        }
        fields[idx].payload.resize(new_byte_length as usize, 0);
        trace!(name, new_byte_length, "resize_field");
        self.rebuild(fields);
        Ok(())
    }

    /// Converts a field's bytes to a new value type via `MigrationConverter`,
    /// preserving element count for arrays.
    pub fn retype_field(&mut self, name: &str, new_field_type: FieldType, explicit: bool) -> Result<(), FieldStoreError> {
        self.ensure_live()?;
        let idx = self.index_of(name).ok_or_else(|| FieldStoreError::KeyNotFound(name.to_string()))?;
        let mut fields = self.snapshot_fields();
        let old_type = fields[idx].field_type;
        let old_elem = old_type.elem_size() as usize;
        let count = if old_type.is_array() && old_elem != 0 {
            fields[idx].payload.len() / old_elem
        } else {
            1
        };
        let new_elem = new_field_type.elem_size() as usize;
        let dst_len = if new_field_type.is_array() { count * new_elem } else { new_elem };

        let converted = migrate::convert(&fields[idx].payload, old_type, new_field_type, dst_len, explicit)?;
        fields[idx].field_type = new_field_type;
        fields[idx].payload = converted;
        trace!(name, "retype_field");
        self.rebuild(fields);
        Ok(())
    }

    /// Produces an independent wild (`id = 0`) copy; mutating it never
    /// affects `self` (spec §8.5).
    pub fn clone_container(&self) -> Result<Container, FieldStoreError> {
        self.ensure_live()?;
        let mut buf = self.buffer.clone();
        let mut header = self.raw_header();
        header.id = 0;
        header.write_into(&mut buf[..ContainerHeader::SIZE]);
        Ok(Container::from_raw(buf, self.pool.clone()))
    }

    pub fn copy_to(&self, dst: &mut [u8]) -> Result<(), FieldStoreError> {
        self.ensure_live()?;
        if dst.len() < self.buffer.len() {
            return Err(FieldStoreError::ArgumentError(format!(
                "destination length {} is smaller than container length {}",
                dst.len(),
                self.buffer.len()
            )));
        }
        dst[..self.buffer.len()].copy_from_slice(&self.buffer);
        Ok(())
    }

    /// Copies `src`'s full buffer into `self`, preserving `self`'s own id so
    /// the registry mapping stays consistent (invariant 6).
    pub fn copy_from(&mut self, src: &Container) -> Result<(), FieldStoreError> {
        self.ensure_live()?;
        src.ensure_live()?;
        if src.buffer.len() != self.buffer.len() {
            return Err(FieldStoreError::ArgumentError(
                "destination length does not match source length".to_string(),
            ));
        }
        let id = self.raw_header().id;
        self.buffer.copy_from_slice(&src.buffer);
        self.set_id(id);
        Ok(())
    }

    /// Zeroes the data segment; header, directory, and names are untouched.
    pub fn clear(&mut self) -> Result<(), FieldStoreError> {
        self.ensure_live()?;
        let start = self.raw_header().data_offset as usize;
        for b in &mut self.buffer[start..] {
            *b = 0;
        }
        Ok(())
    }

    /// Idempotent: disposing an already-disposed container is a no-op.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let buf = std::mem::take(&mut self.buffer);
        if let Some(pool) = &self.pool {
            pool.borrow_mut().release(buf);
        }
    }

    pub fn subscribe_container<F>(&mut self, handler: F) -> u64
    where
        F: FnMut(&crate::subscription::StorageEventArgs) + 'static,
    {
        self.subs.subscribe_container(Box::new(handler))
    }

    pub fn subscribe_field<F>(&mut self, field: &str, handler: F) -> u64
    where
        F: FnMut(&crate::subscription::StorageEventArgs) + 'static,
    {
        self.subs.subscribe_field(field, Box::new(handler))
    }

    pub fn unsubscribe_container(&mut self, token: u64) {
        self.subs.unsubscribe_container(token);
    }

    pub fn unsubscribe_field(&mut self, field: &str, token: u64) {
        self.subs.unsubscribe_field(field, token);
    }

    /// Iterates over the `Ref`-typed (scalar or inline array) fields that
    /// carry non-zero ids, for recursive unregister.
    pub(crate) fn referenced_ids(&self) -> Vec<u64> {
        let mut ids = Vec::new();
        for i in 0..self.raw_field_count() as usize {
            let fh = self.field_header(i);
            if fh.field_type.tag() != ValueType::Ref {
                continue;
            }
            let bytes = self.field_bytes(i);
            for chunk in bytes.chunks_exact(8) {
                let id = u64::from_le_bytes(chunk.try_into().unwrap());
                if id != 0 {
                    ids.push(id);
                }
            }
        }
        ids
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ObjectBuilder;

    fn build_hp_spd() -> Container {
        let mut b = ObjectBuilder::new();
        b.set_scalar::<i32>("hp").unwrap();
        b.set_scalar::<f32>("spd").unwrap();
        b.build_container()
    }

    #[test]
    fn round_trip_primitives() {
        let mut c = build_hp_spd();
        c.write::<i32>("hp", 123_456_789, false).unwrap();
        c.write::<f32>("spd", 3.5, false).unwrap();
        assert_eq!(c.read::<i32>("hp").unwrap(), 123_456_789);
        assert_eq!(c.read::<f32>("spd").unwrap(), 3.5);
    }

    #[test]
    fn narrow_write_zero_extends_on_wider_read() {
        let mut b = ObjectBuilder::new();
        b.set_array::<u8>("word", 4).unwrap();
        let mut c = b.build_container();
        c.write::<i16>("word", 0xABCDu16 as i16, false).unwrap();
        assert_eq!(c.read::<i32>("word").unwrap(), 0x0000_00CDu32 as i32);
    }

    #[test]
    fn consecutive_data_offsets_are_cumulative() {
        let mut b = ObjectBuilder::new();
        b.set_scalar::<i32>("a").unwrap();
        b.set_scalar::<i64>("b").unwrap();
        b.set_scalar::<i16>("c").unwrap();
        let c = b.build_container();
        let d = c.header().unwrap().data_offset;
        assert_eq!(c.field_header_for_test("a").data_offset, d);
        assert_eq!(c.field_header_for_test("b").data_offset, d + 4);
        assert_eq!(c.field_header_for_test("c").data_offset, d + 12);
    }

    impl Container {
        fn field_header_for_test(&self, name: &str) -> FieldHeader {
            self.field_header(self.index_of(name).unwrap())
        }
    }

    #[test]
    fn clone_is_independent() {
        let mut c = build_hp_spd();
        c.write::<i32>("hp", 7, false).unwrap();
        let mut c2 = c.clone_container().unwrap();
        c2.write::<i32>("hp", 99, false).unwrap();
        assert_eq!(c.read::<i32>("hp").unwrap(), 7);
        assert_eq!(c2.read::<i32>("hp").unwrap(), 99);
        assert_eq!(c2.id().unwrap(), 0);
    }

    #[test]
    fn write_too_large_without_rescheme_fails() {
        let mut c = build_hp_spd();
        assert!(c.write::<i64>("hp", 1, false).is_err());
        assert!(c.write::<i64>("hp", 1, true).is_ok());
        assert_eq!(c.read::<i64>("hp").unwrap(), 1);
    }

    #[test]
    fn dispose_is_idempotent_and_blocks_further_access() {
        let mut c = build_hp_spd();
        c.dispose();
        c.dispose();
        assert!(c.read::<i32>("hp").is_err());
    }

    #[test]
    fn disposed_container_reports_object_disposed_instead_of_panicking() {
        let mut c = build_hp_spd();
        c.dispose();
        assert!(matches!(c.header(), Err(FieldStoreError::ObjectDisposed)));
        assert!(matches!(c.id(), Err(FieldStoreError::ObjectDisposed)));
        assert!(matches!(c.total_length(), Err(FieldStoreError::ObjectDisposed)));
        assert!(matches!(c.field_count(), Err(FieldStoreError::ObjectDisposed)));
        assert!(matches!(c.clear(), Err(FieldStoreError::ObjectDisposed)));
        assert_eq!(c.index_of("hp"), None);
        assert!(!c.has_field("hp"));
    }

    #[test]
    fn clear_zeros_the_data_segment_but_keeps_the_directory() {
        let mut c = build_hp_spd();
        c.write::<i32>("hp", 7, false).unwrap();
        c.clear().unwrap();
        assert_eq!(c.read::<i32>("hp").unwrap(), 0);
        assert!(c.has_field("hp"));
    }
}
