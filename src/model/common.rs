use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Handle of a node type inside its repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeTypeId(pub(crate) usize);

/// Handle of an entity (node) inside its repository. Handles are never reused,
/// so ordering by handle is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub(crate) usize);

/// A property declaration: the declaring node type plus its slot in that
/// type's property list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyRef {
    pub owner: NodeTypeId,
    pub slot: usize,
}

/// A value that learns its owner and slot name when it is inserted into an
/// [`OwnedMap`].
pub trait Owned {
    type Owner: Copy;

    fn assign(&mut self, owner: Self::Owner, name: &str, slot: usize);
}

/// Name-keyed collection preserving insertion order.
///
/// Identity inside the map is the name: inserting under an existing name
/// replaces the value in its original slot. Callers moving values between
/// maps must not assume two values with the same name are the same object.
#[derive(Debug, Clone)]
pub struct OwnedMap<T: Owned> {
    owner: T::Owner,
    entries: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T: Owned> OwnedMap<T> {
    pub fn new(owner: T::Owner) -> Self {
        Self {
            owner,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert `value` under `name`, stamping it with the owner, the name and
    /// its slot. Returns the slot.
    pub fn insert(&mut self, name: &str, mut value: T) -> usize {
        match self.index.get(name) {
            Some(&slot) => {
                value.assign(self.owner, name, slot);
                self.entries[slot] = value;
                slot
            }
            None => {
                let slot = self.entries.len();
                value.assign(self.owner, name, slot);
                self.entries.push(value);
                self.index.insert(name.to_string(), slot);
                slot
            }
        }
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.slot_of(name).map(|slot| &self.entries[slot])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        match self.slot_of(name) {
            Some(slot) => Some(&mut self.entries[slot]),
            None => None,
        }
    }

    pub fn at(&self, slot: usize) -> Option<&T> {
        self.entries.get(slot)
    }

    pub fn at_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.entries.get_mut(slot)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}
