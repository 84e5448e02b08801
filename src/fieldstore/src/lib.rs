//! In-memory hierarchical container store: a compact self-describing binary
//! layout (see [`layout`]) addressed through a process-wide [`registry`] of
//! ids, navigated with dotted/indexed paths (see [`path`], [`storage`]), with
//! synchronous change notification (see [`subscription`]).

mod container;
mod error;
mod layout;
mod migrate;
mod path;
mod pool;
mod registry;
mod storage;
mod subscription;
mod value;

pub use container::Container;
pub use error::{FieldStoreError, Result};
pub use layout::{ContainerHeader, ContainerLayout, FieldHeader, ObjectBuilder, CURRENT_VERSION, MAGIC};
pub use path::{parse as parse_path, PathSegment, DEFAULT_SEPARATOR};
pub use pool::BufferPool;
pub use registry::{Registry, EMPTY_ID};
pub use storage::{Storage, StorageArray, StorageObject};
pub use subscription::{StorageEvent, StorageEventArgs};
pub use value::{FieldType, LePrimitive, ValueType};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_round_trips_a_scalar_through_the_public_api() {
        let storage = Storage::new();
        storage.root().write_path::<i32>("hp", 42).unwrap();
        assert_eq!(storage.root().read_path::<i32>("hp").unwrap(), 42);
    }
}
