//! The binary container layout: [`ContainerHeader`], the field directory
//! (`FieldHeader` entries), and the `ObjectBuilder`/`ContainerLayout`
//! pipeline that turns a declared schema into a zero-initialized buffer.
//!
//! Grounded on the teacher's `metadata::headers` module: fixed-size structs
//! parsed and serialized with explicit little-endian byte slicing, each
//! preceded by a doc-commented offset table.

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::FieldStoreError;
use crate::pool::BufferPool;
use crate::value::{FieldType, ValueType};

/// `b"FSC1"` read little-endian; purely a diagnostic marker, never checked
/// strictly on read.
pub const MAGIC: u32 = u32::from_le_bytes(*b"FSC1");
pub const CURRENT_VERSION: u16 = 1;

/// | Offset | Size | Field | Description |
/// | --- | --- | --- | --- |
/// | 0  | 4 | magic       | Compile-time marker, `b"FSC1"`. |
/// | 4  | 2 | version     | Format version, currently 1. |
/// | 6  | 8 | id          | Container id; 0 = unregistered ("wild"). |
/// | 14 | 2 | fieldCount  | Number of directory entries. |
/// | 16 | 4 | nameOffset  | Absolute offset of the names segment. |
/// | 20 | 4 | dataOffset  | Absolute offset of the data segment. |
/// | 24 | 4 | totalLength | Total buffer length. |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic: u32,
    pub version: u16,
    pub id: u64,
    pub field_count: u16,
    pub name_offset: u32,
    pub data_offset: u32,
    pub total_length: u32,
}

impl ContainerHeader {
    pub const SIZE: usize = 28;

    /// Sequential little-endian cursor read, matching the teacher's
    /// `read_u32::<LittleEndian>()` row-decode style.
    pub fn from(slice: &[u8; Self::SIZE]) -> ContainerHeader {
        let mut cursor = Cursor::new(&slice[..]);
        ContainerHeader {
            magic: cursor.read_u32::<LittleEndian>().expect("fixed-size header"),
            version: cursor.read_u16::<LittleEndian>().expect("fixed-size header"),
            id: cursor.read_u64::<LittleEndian>().expect("fixed-size header"),
            field_count: cursor.read_u16::<LittleEndian>().expect("fixed-size header"),
            name_offset: cursor.read_u32::<LittleEndian>().expect("fixed-size header"),
            data_offset: cursor.read_u32::<LittleEndian>().expect("fixed-size header"),
            total_length: cursor.read_u32::<LittleEndian>().expect("fixed-size header"),
        }
    }

    pub fn write_into(&self, out: &mut [u8]) {
        let mut cursor = Cursor::new(out);
        cursor.write_u32::<LittleEndian>(self.magic).expect("fixed-size header");
        cursor.write_u16::<LittleEndian>(self.version).expect("fixed-size header");
        cursor.write_u64::<LittleEndian>(self.id).expect("fixed-size header");
        cursor.write_u16::<LittleEndian>(self.field_count).expect("fixed-size header");
        cursor.write_u32::<LittleEndian>(self.name_offset).expect("fixed-size header");
        cursor.write_u32::<LittleEndian>(self.data_offset).expect("fixed-size header");
        cursor.write_u32::<LittleEndian>(self.total_length).expect("fixed-size header");
    }
}

/// | Offset | Size | Field | Description |
/// | --- | --- | --- | --- |
/// | 0  | 1 | fieldType  | Packed tag + array bit. |
/// | 1  | 1 | elemSize   | Size of one element in bytes. |
/// | 2  | 4 | nameOffset | Absolute offset into the names segment. |
/// | 6  | 2 | nameLength | Number of UTF-16 code units. |
/// | 8  | 4 | dataOffset | Absolute offset into the data segment. |
/// | 12 | 4 | length     | Byte length of the field's payload. |
#[derive(Debug, Clone, Copy)]
pub struct FieldHeader {
    pub field_type: FieldType,
    pub elem_size: u8,
    pub name_offset: u32,
    pub name_length: u16,
    pub data_offset: u32,
    pub length: u32,
}

impl FieldHeader {
    pub const SIZE: usize = 16;

    pub fn from(slice: &[u8; Self::SIZE]) -> Result<FieldHeader, FieldStoreError> {
        let mut cursor = Cursor::new(&slice[..]);
        let field_type = FieldType::from_raw(cursor.read_u8().expect("fixed-size header"))?;
        Ok(FieldHeader {
            field_type,
            elem_size: cursor.read_u8().expect("fixed-size header"),
            name_offset: cursor.read_u32::<LittleEndian>().expect("fixed-size header"),
            name_length: cursor.read_u16::<LittleEndian>().expect("fixed-size header"),
            data_offset: cursor.read_u32::<LittleEndian>().expect("fixed-size header"),
            length: cursor.read_u32::<LittleEndian>().expect("fixed-size header"),
        })
    }

    pub fn write_into(&self, out: &mut [u8]) {
        let mut cursor = Cursor::new(out);
        cursor.write_u8(self.field_type.raw()).expect("fixed-size header");
        cursor.write_u8(self.elem_size).expect("fixed-size header");
        cursor.write_u32::<LittleEndian>(self.name_offset).expect("fixed-size header");
        cursor.write_u16::<LittleEndian>(self.name_length).expect("fixed-size header");
        cursor.write_u32::<LittleEndian>(self.data_offset).expect("fixed-size header");
        cursor.write_u32::<LittleEndian>(self.length).expect("fixed-size header");
    }
}

/// One field's precomputed position within a [`ContainerLayout`].
#[derive(Debug, Clone)]
pub struct FieldLayout {
    pub name: String,
    pub field_type: FieldType,
    pub elem_size: u8,
    pub name_offset: u32,
    pub name_length: u16,
    pub data_offset: u32,
    pub length: u32,
}

/// A field declaration plus the bytes it should be initialized with. Used
/// both by [`ObjectBuilder::build_container`] and by `Container`'s rescheme
/// operations, which rebuild the whole buffer from a snapshot of its
/// current fields (spec §9: "construct the new buffer in a scratch
/// allocation and then swap").
#[derive(Debug, Clone)]
pub struct PlannedField {
    pub name: String,
    pub field_type: FieldType,
    pub payload: Vec<u8>,
}

/// Sorts fields by ordinal UTF-16 name comparison and computes absolute
/// offsets for the directory, names segment, and data segment.
fn plan(fields: &[PlannedField]) -> (Vec<FieldLayout>, u32, u32) {
    let mut order: Vec<usize> = (0..fields.len()).collect();
    order.sort_by(|&a, &b| {
        fields[a]
            .name
            .encode_utf16()
            .collect::<Vec<u16>>()
            .cmp(&fields[b].name.encode_utf16().collect::<Vec<u16>>())
    });

    let header_and_directory = ContainerHeader::SIZE as u32 + fields.len() as u32 * FieldHeader::SIZE as u32;

    let mut name_cursor = header_and_directory;
    let mut name_positions = vec![(0u32, 0u16); fields.len()];
    for &i in &order {
        let units = fields[i].name.encode_utf16().count() as u16;
        name_positions[i] = (name_cursor, units);
        name_cursor += units as u32 * 2;
    }
    let data_start = name_cursor;

    let mut data_cursor = data_start;
    let mut layouts = Vec::with_capacity(fields.len());
    for &i in &order {
        let f = &fields[i];
        let (name_offset, name_length) = name_positions[i];
        let length = f.payload.len() as u32;
        layouts.push(FieldLayout {
            name: f.name.clone(),
            field_type: f.field_type,
            elem_size: f.field_type.elem_size(),
            name_offset,
            name_length,
            data_offset: data_cursor,
            length,
        });
        data_cursor += length;
    }

    (layouts, header_and_directory, data_start)
}

/// Serializes `id`/`version` plus `fields` (in arbitrary declaration order)
/// into a fully formed container buffer. `buf` is cleared and resized to fit
/// so a pool-provided or previously-owned allocation can be reused instead
/// of allocating fresh (spec §9: rescheme builds a scratch buffer then
/// swaps).
pub fn assemble(mut buf: Vec<u8>, id: u64, version: u16, fields: Vec<PlannedField>) -> Vec<u8> {
    let (layouts, name_start, data_start) = plan(&fields);
    let total_length = data_start
        + layouts.iter().map(|f| f.length).sum::<u32>();

    buf.clear();
    buf.resize(total_length as usize, 0);

    let header = ContainerHeader {
        magic: MAGIC,
        version,
        id,
        field_count: layouts.len() as u16,
        name_offset: name_start,
        data_offset: data_start,
        total_length,
    };
    header.write_into(&mut buf[0..ContainerHeader::SIZE]);

    for (i, f) in layouts.iter().enumerate() {
        let entry_start = ContainerHeader::SIZE + i * FieldHeader::SIZE;
        let fh = FieldHeader {
            field_type: f.field_type,
            elem_size: f.elem_size,
            name_offset: f.name_offset,
            name_length: f.name_length,
            data_offset: f.data_offset,
            length: f.length,
        };
        fh.write_into(&mut buf[entry_start..entry_start + FieldHeader::SIZE]);

        let name_units: Vec<u8> = f.name.encode_utf16().flat_map(u16::to_le_bytes).collect();
        let name_start = f.name_offset as usize;
        buf[name_start..name_start + name_units.len()].copy_from_slice(&name_units);
    }

    // Match each planned field's payload (by name) into its computed slot.
    for original in &fields {
        let layout = layouts.iter().find(|l| l.name == original.name).expect("planned");
        let start = layout.data_offset as usize;
        let end = start + layout.length as usize;
        buf[start..end].copy_from_slice(&original.payload);
    }

    buf
}

/// Precomputed offsets for a family of containers sharing one schema, plus
/// the buffer pool that backs dispose/reuse for that family (spec §4.10).
pub struct ContainerLayout {
    pub fields: Vec<FieldLayout>,
    pub name_offset: u32,
    pub data_offset: u32,
    pub total_length: u32,
    pub pool: Rc<RefCell<BufferPool>>,
}

impl ContainerLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Accumulates named, typed field declarations and produces a
/// [`ContainerLayout`] plus zero-initialized (or partially pre-filled)
/// containers from it.
pub struct ObjectBuilder {
    fields: Vec<PlannedField>,
    strict: bool,
}

impl Default for ObjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectBuilder {
    pub fn new() -> Self {
        ObjectBuilder {
            fields: Vec::new(),
            strict: false,
        }
    }

    /// When `strict`, declaring a duplicate field name raises `ArgumentError`
    /// instead of replacing the earlier declaration (spec §9 open question,
    /// resolved as "replace by default").
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    fn declare(&mut self, name: &str, field_type: FieldType, payload: Vec<u8>) -> Result<&mut Self, FieldStoreError> {
        if let Some(existing) = self.fields.iter().position(|f| f.name == name) {
            if self.strict {
                return Err(FieldStoreError::ArgumentError(format!(
                    "duplicate field name {name:?}"
                )));
            }
            self.fields[existing] = PlannedField {
                name: name.to_string(),
                field_type,
                payload,
            };
        } else {
            self.fields.push(PlannedField {
                name: name.to_string(),
                field_type,
                payload,
            });
        }
        Ok(self)
    }

    pub fn set_scalar<T: crate::value::LePrimitive>(&mut self, name: &str) -> Result<&mut Self, FieldStoreError> {
        self.declare(name, FieldType::pack(T::TAG, false), vec![0u8; T::SIZE])
    }

    pub fn set_scalar_value<T: crate::value::LePrimitive>(&mut self, name: &str, value: T) -> Result<&mut Self, FieldStoreError> {
        let mut bytes = vec![0u8; T::SIZE];
        value.to_le(&mut bytes);
        self.declare(name, FieldType::pack(T::TAG, false), bytes)
    }

    pub fn set_array<T: crate::value::LePrimitive>(&mut self, name: &str, count: usize) -> Result<&mut Self, FieldStoreError> {
        self.declare(name, FieldType::pack(T::TAG, true), vec![0u8; count * T::SIZE])
    }

    pub fn set_array_values<T: crate::value::LePrimitive>(&mut self, name: &str, values: &[T]) -> Result<&mut Self, FieldStoreError> {
        let mut bytes = vec![0u8; values.len() * T::SIZE];
        for (i, v) in values.iter().enumerate() {
            v.to_le(&mut bytes[i * T::SIZE..(i + 1) * T::SIZE]);
        }
        self.declare(name, FieldType::pack(T::TAG, true), bytes)
    }

    pub fn set_string(&mut self, name: &str, value: &str) -> Result<&mut Self, FieldStoreError> {
        let bytes: Vec<u8> = value.encode_utf16().flat_map(u16::to_le_bytes).collect();
        self.declare(name, FieldType::pack(ValueType::Char16, true), bytes)
    }

    pub fn set_ref(&mut self, name: &str, id: u64) -> Result<&mut Self, FieldStoreError> {
        self.declare(name, FieldType::pack(ValueType::Ref, false), id.to_le_bytes().to_vec())
    }

    pub fn set_ref_array(&mut self, name: &str, count: usize) -> Result<&mut Self, FieldStoreError> {
        self.declare(name, FieldType::pack(ValueType::Ref, true), vec![0u8; count * 8])
    }

    pub fn set_bytes(&mut self, name: &str, field_type: FieldType, payload: Vec<u8>) -> Result<&mut Self, FieldStoreError> {
        let elem = field_type.elem_size() as usize;
        if elem != 0 && payload.len() % elem != 0 {
            return Err(FieldStoreError::ArgumentError(format!(
                "payload length {} is not a multiple of element size {elem}",
                payload.len()
            )));
        }
        self.declare(name, field_type, payload)
    }

    pub fn build_layout(&self) -> ContainerLayout {
        let (layouts, name_offset, data_offset) = plan(&self.fields);
        let total_length = data_offset + layouts.iter().map(|f| f.length).sum::<u32>();
        ContainerLayout {
            fields: layouts,
            name_offset,
            data_offset,
            total_length,
            pool: Rc::new(RefCell::new(BufferPool::new())),
        }
    }

    /// Builds a wild (unregistered, `id = 0`) container from the declared
    /// fields, populated with any initial bytes supplied via
    /// `set_bytes`/`set_array_values`/`set_scalar_value`; the remainder is
    /// zero.
    pub fn build_container(&self) -> crate::container::Container {
        let layout = self.build_layout();
        let scratch = layout.pool.borrow_mut().acquire(layout.total_length as usize);
        let buf = assemble(scratch, 0, CURRENT_VERSION, self.fields.clone());
        crate::container::Container::from_raw(buf, Some(layout.pool.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    #[test]
    fn directory_is_sorted_and_offsets_cumulative() {
        let mut builder = ObjectBuilder::new();
        builder.set_scalar::<i32>("a").unwrap();
        builder.set_scalar::<i64>("b").unwrap();
        builder.set_scalar::<i16>("c").unwrap();
        let layout = builder.build_layout();

        let names: Vec<&str> = layout.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let d = layout.data_offset;
        assert_eq!(layout.field("a").unwrap().data_offset, d);
        assert_eq!(layout.field("b").unwrap().data_offset, d + 4);
        assert_eq!(layout.field("c").unwrap().data_offset, d + 12);
    }

    #[test]
    fn duplicate_names_replace_by_default() {
        let mut builder = ObjectBuilder::new();
        builder.set_scalar::<i32>("x").unwrap();
        builder.set_scalar::<i64>("x").unwrap();
        let layout = builder.build_layout();
        assert_eq!(layout.fields.len(), 1);
        assert_eq!(layout.fields[0].field_type.tag(), ValueType::Int64);
    }

    #[test]
    fn strict_builder_rejects_duplicates() {
        let mut builder = ObjectBuilder::new().strict(true);
        builder.set_scalar::<i32>("x").unwrap();
        assert!(builder.set_scalar::<i64>("x").is_err());
    }
}
