//! In-memory read cache
//!
//! A sorted copy of one entity collection (newest first). `None` means not
//! loaded: reads then go to the stores. Writes made while the cache is loaded
//! patch it in place; sync boundaries replace it wholesale.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::SyncEntity;

/// Sort newest first, ties by id
pub(crate) fn sort_newest_first<T: SyncEntity>(items: &mut [T]) {
    items.sort_by(|a, b| {
        b.sort_key()
            .cmp(&a.sort_key())
            .then_with(|| a.id().cmp(b.id()))
    });
}

pub struct ReadCache<T> {
    items: RwLock<Option<Vec<T>>>,
}

impl<T> Default for ReadCache<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(None),
        }
    }
}

impl<T: SyncEntity> ReadCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Vec<T>>> {
        self.items.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Vec<T>>> {
        self.items.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_populated(&self) -> bool {
        self.read().is_some()
    }

    pub fn len(&self) -> usize {
        self.read().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load the cache with `items`
    pub fn replace(&self, mut items: Vec<T>) {
        sort_newest_first(&mut items);
        *self.write() = Some(items);
    }

    /// Drop the contents; the cache is unloaded afterwards
    pub fn clear(&self) {
        *self.write() = None;
    }

    /// Copy of the contents, `None` when unloaded
    pub fn snapshot(&self) -> Option<Vec<T>> {
        self.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.read()
            .as_ref()?
            .iter()
            .find(|item| item.id() == id)
            .cloned()
    }

    /// Insert at its sorted position, replacing an entry with the same id
    ///
    /// No-op on an unloaded cache. Returns whether the cache changed.
    pub fn insert(&self, item: T) -> bool {
        let mut guard = self.write();
        let Some(items) = guard.as_mut() else {
            return false;
        };

        items.retain(|existing| existing.id() != item.id());
        let key = item.sort_key();
        let position = items
            .iter()
            .position(|existing| {
                existing.sort_key() < key
                    || (existing.sort_key() == key && existing.id() > item.id())
            })
            .unwrap_or(items.len());
        items.insert(position, item);
        true
    }

    /// Replace the entry with the same id where it stands
    ///
    /// An entry not cached yet is inserted at its sorted position.
    pub fn update(&self, item: T) -> bool {
        {
            let mut guard = self.write();
            let Some(items) = guard.as_mut() else {
                return false;
            };
            if let Some(slot) = items.iter_mut().find(|existing| existing.id() == item.id()) {
                *slot = item;
                return true;
            }
        }
        self.insert(item)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.remove_where(|item| item.id() == id) > 0
    }

    /// Remove every entry matching `predicate`; returns how many went
    pub fn remove_where(&self, predicate: impl Fn(&T) -> bool) -> usize {
        let mut guard = self.write();
        let Some(items) = guard.as_mut() else {
            return 0;
        };
        let before = items.len();
        items.retain(|item| !predicate(item));
        before - items.len()
    }
}
