//! `Storage` / `StorageObject` / `StorageArray`: an ergonomic façade over a
//! container graph with path auto-creation (spec §4.8). Grounded on the
//! teacher's `Storage`/registry-backed API (`registry.rs`'s `getContainer`
//! pattern, generalized with a path resolver).

use std::cell::RefCell;
use std::rc::Rc;

use crate::container::Container;
use crate::error::FieldStoreError;
use crate::layout::ObjectBuilder;
use crate::path::{self, PathSegment, DEFAULT_SEPARATOR};
use crate::registry::Registry;
use crate::subscription::{StorageEvent, StorageEventArgs};
use crate::value::{FieldType, LePrimitive, ValueType};

/// Owns a root container and the registry backing its whole reachable
/// subgraph.
pub struct Storage {
    registry: Rc<RefCell<Registry>>,
    root_id: u64,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage {
    pub fn new() -> Storage {
        let mut registry = Registry::new();
        let root_id = registry.create_wild(ObjectBuilder::new().build_container());
        Storage {
            registry: Rc::new(RefCell::new(registry)),
            root_id,
        }
    }

    pub fn root(&self) -> StorageObject {
        StorageObject {
            registry: self.registry.clone(),
            container_id: self.root_id,
        }
    }

    /// Deep-clones every container reachable from the root, re-registers
    /// each with a fresh id, and rewrites `Ref`/`Ref[]` fields to point at
    /// the new ids (spec §4.8 "Clone").
    pub fn clone_storage(&self) -> Storage {
        let mut source = self.registry.borrow_mut();
        let mut dest = Registry::new();
        let mut remap = std::collections::HashMap::new();
        clone_reachable(&mut source, self.root_id, &mut dest, &mut remap);
        let new_root = *remap.get(&self.root_id).expect("root was just cloned");
        Storage {
            registry: Rc::new(RefCell::new(dest)),
            root_id: new_root,
        }
    }
}

/// Recursively clones `id` from `source` into `dest`, memoizing old→new id
/// mapping so shared/cyclic references are rewritten exactly once.
fn clone_reachable(source: &mut Registry, id: u64, dest: &mut Registry, remap: &mut std::collections::HashMap<u64, u64>) {
    if id == 0 || remap.contains_key(&id) {
        return;
    }
    let Some(src_rc) = source.get_container(id) else { return };
    let cloned = src_rc.borrow().clone_container().expect("live container");
    let new_id = dest.create_wild(cloned);
    remap.insert(id, new_id);

    let children = src_rc.borrow().referenced_ids();
    for child in &children {
        clone_reachable(source, *child, dest, remap);
    }

    let dest_rc = dest.get_container(new_id).expect("just registered");
    let mut container = dest_rc.borrow_mut();
    for i in 0..container.field_count().expect("just cloned container is live") as usize {
        if container.field_header_tag(i) != ValueType::Ref {
            continue;
        }
        let name = container.field_name(i);
        if let Ok(old_ref) = container.get_ref(&name) {
            if old_ref != 0 {
                let new_ref = *remap.get(&old_ref).unwrap_or(&old_ref);
                let _ = container.set_ref(&name, new_ref);
            }
        }
    }
}

/// A lightweight `(registry, container id)` handle. Cheap to clone; does not
/// own the container.
#[derive(Clone)]
pub struct StorageObject {
    registry: Rc<RefCell<Registry>>,
    container_id: u64,
}

impl StorageObject {
    pub fn container_id(&self) -> u64 {
        self.container_id
    }

    fn container(&self) -> Result<Rc<RefCell<Container>>, FieldStoreError> {
        self.registry.borrow().get_container(self.container_id).ok_or(FieldStoreError::ObjectDisposed)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.container().map(|c| c.borrow().has_field(name)).unwrap_or(false)
    }

    /// Resolves every segment but the last, auto-creating missing `Ref`
    /// fields as new wild containers registered in the shared registry. An
    /// indexed intermediate segment must name a `Ref[]` field and chases
    /// into the referenced child at that index (spec §4.7), growing the
    /// array on demand when `create_missing`. Returns the owner container of
    /// the final segment.
    fn resolve_owner(&self, segments: &[PathSegment], create_missing: bool) -> Result<Rc<RefCell<Container>>, FieldStoreError> {
        let mut current = self.container()?;
        for segment in &segments[..segments.len() - 1] {
            if segment.indices.len() > 1 {
                return Err(FieldStoreError::ArgumentError(
                    "at most one index is supported on an intermediate path segment".to_string(),
                ));
            }
            let next_id = {
                let mut container = current.borrow_mut();
                if let Some(&index) = segment.indices.first() {
                    resolve_ref_array_element(&mut container, &segment.name, index, create_missing, &self.registry)?
                } else {
                    let existing = container.index_of(&segment.name).map(|idx| container.field_header_tag(idx));
                    match existing {
                        Some(ValueType::Ref) => {
                            let id = container.get_ref(&segment.name)?;
                            if id != 0 {
                                id
                            } else if create_missing {
                                let new_id = self.registry.borrow_mut().create_wild(ObjectBuilder::new().build_container());
                                container.set_ref(&segment.name, new_id)?;
                                new_id
                            } else {
                                return Err(FieldStoreError::NotFound(segment.name.clone()));
                            }
                        }
                        Some(_) if create_missing => {
                            let new_id = self.registry.borrow_mut().create_wild(ObjectBuilder::new().build_container());
                            container.set_field(&segment.name, FieldType::pack(ValueType::Ref, false), new_id.to_le_bytes().to_vec())?;
                            new_id
                        }
                        Some(_) => {
                            return Err(FieldStoreError::ArgumentError(format!(
                                "field {:?} is not an object reference",
                                segment.name
                            )))
                        }
                        None if create_missing => {
                            let new_id = self.registry.borrow_mut().create_wild(ObjectBuilder::new().build_container());
                            container.set_field(&segment.name, FieldType::pack(ValueType::Ref, false), new_id.to_le_bytes().to_vec())?;
                            new_id
                        }
                        None => return Err(FieldStoreError::NotFound(segment.name.clone())),
                    }
                }
            };
            current = self
                .registry
                .borrow()
                .get_container(next_id)
                .ok_or_else(|| FieldStoreError::NotFound(segment.name.clone()))?;
        }
        Ok(current)
    }

    pub fn write_path<T: LePrimitive>(&self, path: &str, value: T) -> Result<(), FieldStoreError> {
        let segments = path::parse(path, DEFAULT_SEPARATOR)?;
        let owner = self.resolve_owner(&segments, true)?;
        let last = segments.last().expect("parse rejects empty paths");
        let mut container = owner.borrow_mut();

        if !last.indices.is_empty() {
            write_array_element(&mut container, &last.name, &last.indices, value)?;
        } else {
            if !container.has_field(&last.name) {
                container.set_field(&last.name, FieldType::pack(T::TAG, false), vec![0u8; T::SIZE])?;
            }
            container.write::<T>(&last.name, value, true)?;
        }
        drop(container);

        if segments.len() > 1 {
            self.container()?.borrow_mut().dispatch_event(path, StorageEvent::Write, path);
        }
        Ok(())
    }

    pub fn read_path<T: LePrimitive>(&self, path: &str) -> Result<T, FieldStoreError> {
        self.try_read_path(path).ok_or_else(|| FieldStoreError::NotFound(path.to_string()))
    }

    pub fn try_read_path<T: LePrimitive>(&self, path: &str) -> Option<T> {
        let segments = path::parse(path, DEFAULT_SEPARATOR).ok()?;
        let owner = self.resolve_owner(&segments, false).ok()?;
        let last = segments.last()?;
        let container = owner.borrow();
        if !last.indices.is_empty() {
            read_array_element(&container, &last.name, &last.indices)
        } else {
            container.try_read::<T>(&last.name)
        }
    }

    pub fn read_string_path(&self, path: &str) -> Result<String, FieldStoreError> {
        let segments = path::parse(path, DEFAULT_SEPARATOR)?;
        let owner = self.resolve_owner(&segments, false)?;
        let last = segments.last().expect("parse rejects empty paths");
        let container = owner.borrow();
        let idx = container
            .index_of(&last.name)
            .ok_or_else(|| FieldStoreError::NotFound(path.to_string()))?;
        let bytes = container.get_field_bytes(&last.name)?;
        let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        let _ = idx;
        Ok(String::from_utf16_lossy(&units))
    }

    pub fn write_string_path(&self, path: &str, value: &str) -> Result<(), FieldStoreError> {
        let segments = path::parse(path, DEFAULT_SEPARATOR)?;
        let owner = self.resolve_owner(&segments, true)?;
        let last = segments.last().expect("parse rejects empty paths");
        let bytes: Vec<u8> = value.encode_utf16().flat_map(u16::to_le_bytes).collect();
        owner
            .borrow_mut()
            .set_field(&last.name, FieldType::pack(ValueType::Char16, true), bytes)?;
        Ok(())
    }

    pub fn write_array_path<T: LePrimitive>(&self, path: &str, values: &[T]) -> Result<(), FieldStoreError> {
        let segments = path::parse(path, DEFAULT_SEPARATOR)?;
        let owner = self.resolve_owner(&segments, true)?;
        let last = segments.last().expect("parse rejects empty paths");
        let mut bytes = vec![0u8; values.len() * T::SIZE];
        for (i, v) in values.iter().enumerate() {
            v.to_le(&mut bytes[i * T::SIZE..(i + 1) * T::SIZE]);
        }
        owner.borrow_mut().set_field(&last.name, FieldType::pack(T::TAG, true), bytes)?;
        Ok(())
    }

    pub fn read_array_path<T: LePrimitive>(&self, path: &str) -> Result<Vec<T>, FieldStoreError> {
        let segments = path::parse(path, DEFAULT_SEPARATOR)?;
        let owner = self.resolve_owner(&segments, false)?;
        let last = segments.last().expect("parse rejects empty paths");
        let container = owner.borrow();
        let bytes = container.get_field_bytes(&last.name)?;
        let n = bytes.len() / T::SIZE;
        Ok((0..n).map(|i| T::from_le(&bytes[i * T::SIZE..])).collect())
    }

    /// Renames a field within its owning container. `src` and `dst` must
    /// resolve to the same owner; same-name is a no-op with no event.
    pub fn move_field(&self, src: &str, dst: &str) -> Result<(), FieldStoreError> {
        let src_segments = path::parse(src, DEFAULT_SEPARATOR)?;
        let dst_segments = path::parse(dst, DEFAULT_SEPARATOR)?;
        let src_owner = self.resolve_owner(&src_segments, false)?;
        let dst_owner = self.resolve_owner(&dst_segments, false)?;
        if !Rc::ptr_eq(&src_owner, &dst_owner) {
            return Err(FieldStoreError::ArgumentError(
                "move requires src and dst to share the same owning container".to_string(),
            ));
        }
        let src_name = &src_segments.last().expect("non-empty").name;
        let dst_name = &dst_segments.last().expect("non-empty").name;
        src_owner.borrow_mut().rename_field(src_name, dst_name)
    }

    pub fn try_move(&self, src: &str, dst: &str) -> bool {
        let Ok(dst_segments) = path::parse(dst, DEFAULT_SEPARATOR) else {
            return false;
        };
        let Ok(dst_owner) = self.resolve_owner(&dst_segments, false) else {
            return false;
        };
        let dst_name = &dst_segments.last().expect("non-empty").name;
        if dst_owner.borrow().has_field(dst_name) {
            return false;
        }
        self.move_field(src, dst).is_ok()
    }

    pub fn delete(&self, name: &str) -> Result<(), FieldStoreError> {
        let segments = path::parse(name, DEFAULT_SEPARATOR)?;
        let owner = self.resolve_owner(&segments, false)?;
        let last = segments.last().expect("non-empty");
        owner.borrow_mut().delete_field(&last.name)
    }

    /// Gets the `Ref`-valued field `name` as a child `StorageObject`.
    pub fn get_object(&self, name: &str) -> Result<StorageObject, FieldStoreError> {
        let id = self.container()?.borrow().get_ref(name)?;
        if id == 0 {
            return Err(FieldStoreError::NotFound(name.to_string()));
        }
        Ok(StorageObject {
            registry: self.registry.clone(),
            container_id: id,
        })
    }

    pub fn get_array(&self, name: &str) -> Result<StorageArray, FieldStoreError> {
        let container = self.container()?;
        let container = container.borrow();
        if !container.has_field(name) {
            return Err(FieldStoreError::KeyNotFound(name.to_string()));
        }
        Ok(StorageArray {
            registry: self.registry.clone(),
            owner_id: self.container_id,
            field_name: name.to_string(),
        })
    }

    pub fn get_object_by_path(&self, path: &str) -> Result<StorageObject, FieldStoreError> {
        let segments = path::parse(path, DEFAULT_SEPARATOR)?;
        let owner = self.resolve_owner(&segments, false)?;
        let last = segments.last().expect("non-empty");
        let container = owner.borrow();
        let id = if let Some(&index) = last.indices.first() {
            let bytes = container.get_field_bytes(&last.name)?;
            let start = index * 8;
            if start + 8 > bytes.len() {
                return Err(FieldStoreError::IndexOutOfRange {
                    index,
                    len: bytes.len() / 8,
                });
            }
            u64::from_le_bytes(bytes[start..start + 8].try_into().unwrap())
        } else {
            container.get_ref(&last.name)?
        };
        if id == 0 {
            return Err(FieldStoreError::NotFound(path.to_string()));
        }
        Ok(StorageObject {
            registry: self.registry.clone(),
            container_id: id,
        })
    }

    pub fn subscribe_field<F>(&self, field: &str, handler: F) -> Result<u64, FieldStoreError>
    where
        F: FnMut(&StorageEventArgs) + 'static,
    {
        Ok(self.container()?.borrow_mut().subscribe_field(field, handler))
    }

    pub fn subscribe_container<F>(&self, handler: F) -> Result<u64, FieldStoreError>
    where
        F: FnMut(&StorageEventArgs) + 'static,
    {
        Ok(self.container()?.borrow_mut().subscribe_container(handler))
    }

    pub fn unsubscribe_field(&self, field: &str, token: u64) -> Result<(), FieldStoreError> {
        self.container()?.borrow_mut().unsubscribe_field(field, token);
        Ok(())
    }

    pub fn unsubscribe_container(&self, token: u64) -> Result<(), FieldStoreError> {
        self.container()?.borrow_mut().unsubscribe_container(token);
        Ok(())
    }
}

/// A handle onto an array-valued field: either `Ref[]` (elements are child
/// objects) or a typed primitive array.
#[derive(Clone)]
pub struct StorageArray {
    registry: Rc<RefCell<Registry>>,
    owner_id: u64,
    field_name: String,
}

impl StorageArray {
    fn owner(&self) -> Result<Rc<RefCell<Container>>, FieldStoreError> {
        self.registry.borrow().get_container(self.owner_id).ok_or(FieldStoreError::ObjectDisposed)
    }

    pub fn len(&self) -> Result<usize, FieldStoreError> {
        let owner = self.owner()?;
        let owner = owner.borrow();
        let bytes = owner.get_field_bytes(&self.field_name)?;
        let idx = owner.index_of(&self.field_name).expect("field exists");
        let elem = owner.field_header_elem_size(idx) as usize;
        Ok(if elem == 0 { 0 } else { bytes.len() / elem })
    }

    pub fn is_empty(&self) -> Result<bool, FieldStoreError> {
        Ok(self.len()? == 0)
    }

    /// Treats the array as `Ref[]` and returns element `index` as a
    /// `StorageObject`.
    pub fn get_object(&self, index: usize) -> Result<StorageObject, FieldStoreError> {
        let owner = self.owner()?;
        let owner = owner.borrow();
        let bytes = owner.get_field_bytes(&self.field_name)?;
        let start = index * 8;
        if start + 8 > bytes.len() {
            return Err(FieldStoreError::IndexOutOfRange {
                index,
                len: bytes.len() / 8,
            });
        }
        let id = u64::from_le_bytes(bytes[start..start + 8].try_into().unwrap());
        if id == 0 {
            return Err(FieldStoreError::NotFound(format!("{}[{index}]", self.field_name)));
        }
        Ok(StorageObject {
            registry: self.registry.clone(),
            container_id: id,
        })
    }

    pub fn get<T: LePrimitive>(&self, index: usize) -> Result<T, FieldStoreError> {
        let owner = self.owner()?;
        let owner = owner.borrow();
        let bytes = owner.get_field_bytes(&self.field_name)?;
        let start = index * T::SIZE;
        if start + T::SIZE > bytes.len() {
            return Err(FieldStoreError::IndexOutOfRange {
                index,
                len: bytes.len() / T::SIZE.max(1),
            });
        }
        Ok(T::from_le(&bytes[start..]))
    }
}

/// Resolves element `index` of a `Ref[]` field to a child container id,
/// growing the array and/or allocating a fresh wild child when
/// `create_missing` and the slot doesn't exist yet.
fn resolve_ref_array_element(
    container: &mut Container,
    name: &str,
    index: usize,
    create_missing: bool,
    registry: &Rc<RefCell<Registry>>,
) -> Result<u64, FieldStoreError> {
    match container.index_of(name).map(|idx| container.field_header_tag(idx)) {
        Some(ValueType::Ref) => {}
        Some(_) => {
            return Err(FieldStoreError::ArgumentError(format!("field {name:?} is not a Ref[] array")));
        }
        None if create_missing => {
            container.set_field(name, FieldType::pack(ValueType::Ref, true), Vec::new())?;
        }
        None => return Err(FieldStoreError::NotFound(name.to_string())),
    }

    let current_len = container.get_field_bytes(name)?.len();
    let needed = (index + 1) * 8;
    if needed > current_len {
        if !create_missing {
            return Err(FieldStoreError::IndexOutOfRange {
                index,
                len: current_len / 8,
            });
        }
        container.resize_field(name, needed as u32)?;
    }

    let mut bytes = container.get_field_bytes(name)?.to_vec();
    let start = index * 8;
    let id = u64::from_le_bytes(bytes[start..start + 8].try_into().unwrap());
    if id != 0 {
        return Ok(id);
    }
    if !create_missing {
        return Err(FieldStoreError::NotFound(format!("{name}[{index}]")));
    }
    let new_id = registry.borrow_mut().create_wild(ObjectBuilder::new().build_container());
    bytes[start..start + 8].copy_from_slice(&new_id.to_le_bytes());
    container.write_bytes(name, &bytes)?;
    Ok(new_id)
}

fn write_array_element<T: LePrimitive>(container: &mut Container, name: &str, indices: &[usize], value: T) -> Result<(), FieldStoreError> {
    let index = *indices.first().ok_or_else(|| FieldStoreError::ArgumentError("missing array index".to_string()))?;
    if !container.has_field(name) {
        let needed = (index + 1) * T::SIZE;
        container.set_field(name, FieldType::pack(T::TAG, true), vec![0u8; needed])?;
    } else {
        let idx = container.index_of(name).expect("checked above");
        let current_len = container.get_field_bytes(name)?.len();
        let needed = (index + 1) * T::SIZE;
        if needed > current_len {
            container.resize_field(name, needed as u32)?;
        }
        let _ = idx;
    }
    let bytes = container.get_field_bytes(name)?.to_vec();
    let mut updated = bytes;
    let start = index * T::SIZE;
    value.to_le(&mut updated[start..start + T::SIZE]);
    container.write_bytes(name, &updated)
}

fn read_array_element<T: LePrimitive>(container: &Container, name: &str, indices: &[usize]) -> Option<T> {
    let index = *indices.first()?;
    let bytes = container.get_field_bytes(name).ok()?;
    let start = index * T::SIZE;
    if start + T::SIZE > bytes.len() {
        return None;
    }
    Some(T::from_le(&bytes[start..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_path_auto_creates_intermediates() {
        let storage = Storage::new();
        storage.root().write_path::<i32>("a.b.c", 42).unwrap();
        assert_eq!(storage.root().read_path::<i32>("a.b.c").unwrap(), 42);
    }

    #[test]
    fn move_emits_one_rename_and_no_further_writes_to_old_subscriber() {
        let storage = Storage::new();
        let root = storage.root();
        root.write_path::<i32>("src", 1).unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let events_clone = events.clone();
        root.subscribe_field("src", move |args| {
            events_clone.borrow_mut().push(args.clone());
        })
        .unwrap();

        root.move_field("src", "dst").unwrap();
        root.write_path::<i32>("dst", 2).unwrap();

        let seen = events.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event, StorageEvent::Rename);
        assert_eq!(seen[0].path, "dst");
    }

    #[test]
    fn try_move_fails_when_destination_exists() {
        let storage = Storage::new();
        let root = storage.root();
        root.write_path::<i32>("a", 1).unwrap();
        root.write_path::<i32>("b", 2).unwrap();
        assert!(!root.try_move("a", "b"));
    }

    #[test]
    fn same_name_move_is_a_no_op() {
        let storage = Storage::new();
        let root = storage.root();
        root.write_path::<i32>("a", 1).unwrap();
        root.move_field("a", "a").unwrap();
        assert_eq!(root.read_path::<i32>("a").unwrap(), 1);
    }

    #[test]
    fn indexed_array_path_grows_on_demand() {
        let storage = Storage::new();
        let root = storage.root();
        root.write_path::<i32>("items[3]", 99).unwrap();
        assert_eq!(root.read_path::<i32>("items[3]").unwrap(), 99);
        assert_eq!(root.read_path::<i32>("items[0]").unwrap(), 0);
    }

    #[test]
    fn indexed_intermediate_segment_chases_into_a_ref_array_child() {
        let storage = Storage::new();
        let root = storage.root();
        root.write_path::<i32>("children[0].hp", 5).unwrap();
        root.write_path::<i32>("children[2].hp", 9).unwrap();
        assert_eq!(root.read_path::<i32>("children[0].hp").unwrap(), 5);
        assert_eq!(root.read_path::<i32>("children[2].hp").unwrap(), 9);

        let second = root.get_object_by_path("children[2]").unwrap();
        assert_eq!(second.read_path::<i32>("hp").unwrap(), 9);
    }

    #[test]
    fn indexed_intermediate_segment_rejects_a_non_ref_field() {
        let storage = Storage::new();
        let root = storage.root();
        root.write_path::<i32>("items[1]", 7).unwrap();
        assert!(root.write_path::<i32>("items[1].hp", 5).is_err());
    }

    #[test]
    fn clone_storage_is_independent_and_preserves_values() {
        let storage = Storage::new();
        storage.root().write_path::<i32>("a.b", 7).unwrap();
        let cloned = storage.clone_storage();
        cloned.root().write_path::<i32>("a.b", 9).unwrap();
        assert_eq!(storage.root().read_path::<i32>("a.b").unwrap(), 7);
        assert_eq!(cloned.root().read_path::<i32>("a.b").unwrap(), 9);
    }

    #[test]
    fn delete_fires_delete_event() {
        let storage = Storage::new();
        let root = storage.root();
        root.write_path::<i32>("a", 1).unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let events_clone = events.clone();
        root.subscribe_container(move |args| events_clone.borrow_mut().push(args.clone())).unwrap();
        root.delete("a").unwrap();
        assert_eq!(events.borrow().last().unwrap().event, StorageEvent::Delete);
    }
}
