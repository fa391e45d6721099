//! Matched device sets and the snapshot store
//!
//! A [`DeviceSnapshot`] is keyed by `(vendor, product, address)`, so two
//! records for the same physical device can never coexist. The
//! [`SnapshotStore`] holds the one live snapshot behind an `Arc` that is
//! swapped as a whole, so readers on other threads always see either the old
//! or the new set, never a mix.

use model::{DeviceKey, DeviceRecord};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Set of matched devices with an active reader registration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    records: BTreeMap<DeviceKey, DeviceRecord>,
}

impl DeviceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unless an equal one is already present
    ///
    /// Returns `false` when the record collapsed into an existing one; the
    /// first inserted record wins.
    pub fn insert(&mut self, record: DeviceRecord) -> bool {
        match self.records.entry(record.key()) {
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
            std::collections::btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn contains(&self, record: &DeviceRecord) -> bool {
        self.records.contains_key(&record.key())
    }

    pub fn contains_key(&self, key: &DeviceKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn get(&self, key: &DeviceKey) -> Option<&DeviceRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in key order
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &DeviceKey> {
        self.records.keys()
    }
}

impl FromIterator<DeviceRecord> for DeviceSnapshot {
    fn from_iter<I: IntoIterator<Item = DeviceRecord>>(iter: I) -> Self {
        let mut snapshot = DeviceSnapshot::new();
        for record in iter {
            snapshot.insert(record);
        }
        snapshot
    }
}

impl Extend<DeviceRecord> for DeviceSnapshot {
    fn extend<I: IntoIterator<Item = DeviceRecord>>(&mut self, iter: I) {
        for record in iter {
            self.insert(record);
        }
    }
}

/// Owner of the live device snapshot
///
/// Only the reconciler replaces the snapshot; everyone else gets a
/// [`SnapshotReader`].
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: Arc<RwLock<Arc<DeviceSnapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live snapshot
    pub fn current(&self) -> Arc<DeviceSnapshot> {
        read(&self.current)
    }

    /// Read-only handle usable from other threads
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            current: self.current.clone(),
        }
    }

    /// Atomically install `next` and hand back the superseded snapshot
    pub(crate) fn replace(&mut self, next: DeviceSnapshot) -> Arc<DeviceSnapshot> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, Arc::new(next))
    }
}

/// Cloneable read access to the live snapshot
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    current: Arc<RwLock<Arc<DeviceSnapshot>>>,
}

impl SnapshotReader {
    pub fn current(&self) -> Arc<DeviceSnapshot> {
        read(&self.current)
    }
}

fn read(lock: &RwLock<Arc<DeviceSnapshot>>) -> Arc<DeviceSnapshot> {
    lock.read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}
