//! Arena of engine entities addressed by monotonically allocated keys.
//!
//! Keys index straight into the slot vector and are never handed out twice.
//! Deleting an entity retires its slot; only reconstruction can bring the
//! same key back to life.

use std::collections::HashSet;

use crate::error::{EngineError, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableError {
    NotFound,
    /// `owner` is set when the slot was retired by deleting its owner.
    Deleted { owner: Option<u32> },
    KeyInUse,
    /// The key appears more than once in one batch.
    Duplicate,
}

/// A batch failure and the key that caused it.
pub(crate) type BatchError = (u32, TableError);

impl TableError {
    /// Caller-facing error for a failed lookup of `key`.
    pub fn for_entity(self, kind: EntityKind, key: u32) -> EngineError {
        match self {
            TableError::NotFound => EngineError::NotFound { kind, key },
            TableError::Deleted { owner: None } => EngineError::Deleted { kind, key },
            TableError::Deleted { owner: Some(track) } => {
                EngineError::OwnerDeleted { kind, key, track }
            }
            TableError::KeyInUse => EngineError::KeyInUse { key },
            TableError::Duplicate => EngineError::DuplicateKey { key },
        }
    }
}

#[derive(Debug)]
enum Slot<T> {
    Live(T),
    Retired { owner: Option<u32> },
}

#[derive(Debug)]
pub(crate) struct ObjectTable<T> {
    slots: Vec<Slot<T>>,
    live: usize,
}

impl<T> Default for ObjectTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectTable<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// Key the next [`allocate`](Self::allocate) call will return.
    pub fn next_key(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn allocate(&mut self, value: T) -> u32 {
        let key = self.next_key();
        self.slots.push(Slot::Live(value));
        self.live += 1;
        key
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn get(&self, key: u32) -> Result<&T, TableError> {
        match self.slots.get(key as usize) {
            Some(Slot::Live(value)) => Ok(value),
            Some(Slot::Retired { owner }) => Err(TableError::Deleted { owner: *owner }),
            None => Err(TableError::NotFound),
        }
    }

    pub fn get_mut(&mut self, key: u32) -> Result<&mut T, TableError> {
        match self.slots.get_mut(key as usize) {
            Some(Slot::Live(value)) => Ok(value),
            Some(Slot::Retired { owner }) => Err(TableError::Deleted { owner: *owner }),
            None => Err(TableError::NotFound),
        }
    }

    /// Live entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(key, slot)| match slot {
                Slot::Live(value) => Some((key as u32, value)),
                Slot::Retired { .. } => None,
            })
    }

    pub fn delete(&mut self, key: u32) -> Result<T, TableError> {
        self.retire(key, None)
    }

    /// Deletes `key` as part of deleting `owner`.
    pub fn delete_owned(&mut self, key: u32, owner: u32) -> Result<T, TableError> {
        self.retire(key, Some(owner))
    }

    fn retire(&mut self, key: u32, owner: Option<u32>) -> Result<T, TableError> {
        let slot = self
            .slots
            .get_mut(key as usize)
            .ok_or(TableError::NotFound)?;
        match std::mem::replace(slot, Slot::Retired { owner }) {
            Slot::Live(value) => {
                self.live -= 1;
                Ok(value)
            }
            Slot::Retired { owner } => {
                *slot = Slot::Retired { owner };
                Err(TableError::Deleted { owner })
            }
        }
    }

    /// Whether `key` could be reconstructed right now.
    pub fn check_vacant(&self, key: u32) -> Result<(), TableError> {
        match self.slots.get(key as usize) {
            Some(Slot::Retired { .. }) => Ok(()),
            Some(Slot::Live(_)) => Err(TableError::KeyInUse),
            None => Err(TableError::NotFound),
        }
    }

    pub fn reconstruct(&mut self, key: u32, value: T) -> Result<(), (TableError, T)> {
        if let Err(err) = self.check_vacant(key) {
            return Err((err, value));
        }
        self.slots[key as usize] = Slot::Live(value);
        self.live += 1;
        Ok(())
    }

    /// Validates a whole batch of deletions before applying any of them.
    pub fn check_delete_many(&self, keys: &[u32]) -> Result<(), BatchError> {
        let mut seen = HashSet::with_capacity(keys.len());
        for &key in keys {
            if !seen.insert(key) {
                return Err((key, TableError::Duplicate));
            }
            self.get(key).map_err(|err| (key, err))?;
        }
        Ok(())
    }

    pub fn delete_many(&mut self, keys: &[u32]) -> Result<Vec<T>, BatchError> {
        self.check_delete_many(keys)?;
        Ok(keys.iter().filter_map(|&key| self.delete(key).ok()).collect())
    }

    pub fn check_reconstruct_many(
        &self,
        keys: impl IntoIterator<Item = u32>,
    ) -> Result<(), BatchError> {
        let mut seen = HashSet::new();
        for key in keys {
            if !seen.insert(key) {
                return Err((key, TableError::Duplicate));
            }
            self.check_vacant(key).map_err(|err| (key, err))?;
        }
        Ok(())
    }

    /// All-or-nothing reconstruction. On failure every value is handed back.
    pub fn reconstruct_many(
        &mut self,
        entries: Vec<(u32, T)>,
    ) -> Result<(), (BatchError, Vec<(u32, T)>)> {
        if let Err(err) = self.check_reconstruct_many(entries.iter().map(|(key, _)| *key)) {
            return Err((err, entries));
        }
        for (key, value) in entries {
            self.slots[key as usize] = Slot::Live(value);
            self.live += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_never_reused() {
        let mut table = ObjectTable::new();
        let a = table.allocate("a");
        let b = table.allocate("b");
        assert_eq!((a, b), (0, 1));
        table.delete(a).unwrap();
        assert_eq!(table.allocate("c"), 2);
        assert_eq!(table.get(a), Err(TableError::Deleted { owner: None }));
        assert_eq!(table.get(7), Err(TableError::NotFound));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn reconstruct_requires_retired_slot() {
        let mut table = ObjectTable::new();
        let a = table.allocate(1);
        assert_eq!(table.reconstruct(a, 5), Err((TableError::KeyInUse, 5)));
        assert_eq!(table.reconstruct(9, 5), Err((TableError::NotFound, 5)));
        let value = table.delete(a).unwrap();
        table.reconstruct(a, value).unwrap();
        assert_eq!(table.get(a), Ok(&1));
    }

    #[test]
    fn owned_deletion_records_owner() {
        let mut table = ObjectTable::new();
        let clip = table.allocate(());
        table.delete_owned(clip, 4).unwrap();
        assert_eq!(table.get(clip), Err(TableError::Deleted { owner: Some(4) }));
    }

    #[test]
    fn batch_delete_is_atomic() {
        let mut table = ObjectTable::new();
        let keys: Vec<u32> = (0..4).map(|i| table.allocate(i)).collect();
        assert_eq!(
            table.delete_many(&[keys[0], keys[1], keys[0]]),
            Err((keys[0], TableError::Duplicate))
        );
        assert_eq!(table.len(), 4);

        table.delete(keys[3]).unwrap();
        assert!(table.delete_many(&[keys[0], keys[3]]).is_err());
        assert_eq!(table.len(), 3);

        let removed = table.delete_many(&[keys[1], keys[0]]).unwrap();
        assert_eq!(removed, vec![1, 0]);
        assert_eq!(table.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec![keys[2]]);
    }

    #[test]
    fn batch_reconstruct_returns_values_on_failure() {
        let mut table = ObjectTable::new();
        let a = table.allocate('a');
        let b = table.allocate('b');
        let values = table.delete_many(&[a, b]).unwrap();

        let entries = vec![(a, values[0]), (a, values[1])];
        let (err, entries) = table.reconstruct_many(entries).unwrap_err();
        assert_eq!(err, (a, TableError::Duplicate));
        assert_eq!(entries.len(), 2);

        table
            .reconstruct_many(vec![(a, values[0]), (b, values[1])])
            .unwrap();
        assert_eq!(table.len(), 2);
    }
}
