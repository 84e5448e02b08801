//! Process-wide container id space (spec §4.6). Containers are handed out
//! with monotonically increasing ids, id `0` is reserved ("Empty", never
//! assigned), and `unregister` tears down a container together with every
//! container it references, guarding against reference cycles.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::container::Container;
use crate::error::FieldStoreError;

pub const EMPTY_ID: u64 = 0;

/// Not `Send`/`Sync`: the whole crate is single-threaded and cooperative
/// (spec §5), so shared ownership goes through `Rc<RefCell<_>>` rather than
/// `Arc<Mutex<_>>`.
pub struct Registry {
    containers: HashMap<u64, Rc<RefCell<Container>>>,
    next_id: u64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            containers: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.containers.contains_key(&id)
    }

    fn allocate_id(&mut self) -> u64 {
        loop {
            let candidate = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id == EMPTY_ID {
                self.next_id = 1;
            }
            if candidate != EMPTY_ID && !self.containers.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Assigns the next free id to `container` and registers it.
    pub fn create_wild(&mut self, mut container: Container) -> u64 {
        let id = self.allocate_id();
        container.set_id(id);
        self.containers.insert(id, Rc::new(RefCell::new(container)));
        id
    }

    /// Registers `container` under a caller-chosen id.
    pub fn create_at(&mut self, id: u64, mut container: Container) -> Result<u64, FieldStoreError> {
        if id == EMPTY_ID {
            return Err(FieldStoreError::ArgumentError("id 0 is reserved".to_string()));
        }
        if self.containers.contains_key(&id) {
            return Err(FieldStoreError::ArgumentError(format!("id {id} is already registered")));
        }
        container.set_id(id);
        self.containers.insert(id, Rc::new(RefCell::new(container)));
        Ok(id)
    }

    pub fn get_container(&self, id: u64) -> Option<Rc<RefCell<Container>>> {
        self.containers.get(&id).cloned()
    }

    /// Removes `id`, then recursively removes everything it references
    /// through `Ref`/`Ref[]` fields. Already-removed ids and cycles are
    /// no-ops thanks to the visited set, so unregistering twice or
    /// unregistering a cyclic graph never loops or double-disposes.
    pub fn unregister(&mut self, id: u64) {
        let mut visited = HashSet::new();
        self.unregister_inner(id, &mut visited);
    }

    fn unregister_inner(&mut self, id: u64, visited: &mut HashSet<u64>) {
        if id == EMPTY_ID || !visited.insert(id) {
            return;
        }
        let Some(rc) = self.containers.remove(&id) else {
            return;
        };
        let referenced = {
            let mut container = rc.borrow_mut();
            let referenced = container.referenced_ids();
            container.dispose();
            referenced
        };
        for child in referenced {
            self.unregister_inner(child, visited);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ObjectBuilder;

    #[test]
    fn create_wild_assigns_increasing_nonzero_ids() {
        let mut registry = Registry::new();
        let a = registry.create_wild(ObjectBuilder::new().build_container());
        let b = registry.create_wild(ObjectBuilder::new().build_container());
        assert_ne!(a, 0);
        assert_ne!(b, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn unregister_twice_is_a_no_op() {
        let mut registry = Registry::new();
        let id = registry.create_wild(ObjectBuilder::new().build_container());
        registry.unregister(id);
        registry.unregister(id);
        assert!(!registry.contains(id));
    }

    #[test]
    fn unregister_cascades_through_a_chain() {
        let mut registry = Registry::new();
        let mut next_id = 0u64;
        let mut head = None;
        for i in (0..64).rev() {
            let mut builder = ObjectBuilder::new();
            builder.set_scalar_value::<i32>("index", i).unwrap();
            builder.set_ref("next", next_id).unwrap();
            let container = builder.build_container();
            next_id = registry.create_wild(container);
            if head.is_none() {
                head = Some(next_id);
            }
        }
        let head = head.unwrap();
        registry.unregister(head);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn unregister_survives_a_cycle() {
        let mut registry = Registry::new();
        let mut builder_a = ObjectBuilder::new();
        builder_a.set_ref("next", 0).unwrap();
        let a_id = registry.create_wild(builder_a.build_container());

        let mut builder_b = ObjectBuilder::new();
        builder_b.set_ref("next", a_id).unwrap();
        let b_id = registry.create_wild(builder_b.build_container());

        registry.get_container(a_id).unwrap().borrow_mut().set_ref("next", b_id).unwrap();

        registry.unregister(a_id);
        assert!(!registry.contains(a_id));
        assert!(!registry.contains(b_id));
    }
}
