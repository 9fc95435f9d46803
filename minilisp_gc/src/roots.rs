//! Root and remembered-set storage.
//!
//! Both sets store *slots*: addresses of pointer cells the collector
//! reads and rewrites. A hash index keyed by slot address sits over a
//! dense vector that collection scans walk, so add/remove are amortized
//! O(1) and the scan touches contiguous memory.

use rustc_hash::FxHashMap;

/// Registered root slots.
///
/// A slot may be registered any number of times; duplicates collapse.
#[derive(Debug, Default)]
pub struct RootSet {
    index: FxHashMap<usize, usize>,
    slots: Vec<*mut *mut u8>,
}

impl RootSet {
    /// Empty root set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `slot`. Null and duplicate slots are ignored.
    pub fn add(&mut self, slot: *mut *mut u8) {
        if slot.is_null() {
            return;
        }
        let addr = slot as usize;
        if self.index.contains_key(&addr) {
            return;
        }
        self.index.insert(addr, self.slots.len());
        self.slots.push(slot);
    }

    /// Unregister `slot`. Unknown slots are ignored.
    pub fn remove(&mut self, slot: *mut *mut u8) {
        let addr = slot as usize;
        if let Some(i) = self.index.remove(&addr) {
            self.slots.swap_remove(i);
            if i < self.slots.len() {
                self.index.insert(self.slots[i] as usize, i);
            }
        }
    }

    /// Whether `slot` is registered.
    pub fn contains(&self, slot: *mut *mut u8) -> bool {
        self.index.contains_key(&(slot as usize))
    }

    /// Dense view of the registered slots, scanned during collection.
    pub fn slots(&self) -> &[*mut *mut u8] {
        &self.slots
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Remembered set: slots inside tenured objects that currently hold a
/// pointer into the nursery. Populated by the write barrier, scanned as
/// extra roots during minor collections, pruned after each minor.
#[derive(Debug, Default)]
pub struct RememberedSet {
    inner: RootSet,
}

impl RememberedSet {
    /// Empty remembered set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `slot`; idempotent.
    pub fn add(&mut self, slot: *mut *mut u8) {
        self.inner.add(slot);
    }

    /// Whether `slot` is recorded.
    pub fn contains(&self, slot: *mut *mut u8) -> bool {
        self.inner.contains(slot)
    }

    /// Dense view of the recorded slots.
    pub fn slots(&self) -> &[*mut *mut u8] {
        self.inner.slots()
    }

    /// Number of recorded slots.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every slot for which `keep` returns false and rebuild the
    /// index. Runs at the end of each minor collection.
    pub fn retain(&mut self, mut keep: impl FnMut(*mut *mut u8) -> bool) {
        let kept: Vec<_> = self
            .inner
            .slots
            .iter()
            .copied()
            .filter(|&s| keep(s))
            .collect();
        self.inner.slots.clear();
        self.inner.index.clear();
        for slot in kept {
            self.inner.add(slot);
        }
    }
}
