//! Snapshot reconciler
//!
//! Diffs a freshly matched snapshot against the stored one, notifies the
//! reader registry of the difference, and installs the new snapshot. All
//! additions are sent before any removal so a device that is merely being
//! re-identified never has zero readers registered.

use crate::snapshot::{DeviceSnapshot, SnapshotStore};
use model::{DeviceRecord, ReaderRegistry};
use tracing::{debug, info, warn};

/// Records to add and remove to go from one snapshot to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// In `current` but not in `previous`
    pub to_add: Vec<DeviceRecord>,
    /// In `previous` but not in `current`
    pub to_remove: Vec<DeviceRecord>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute the difference between two snapshots under key equality
pub fn diff(previous: &DeviceSnapshot, current: &DeviceSnapshot) -> SnapshotDiff {
    let to_add = current
        .iter()
        .filter(|record| !previous.contains(record))
        .cloned()
        .collect();
    let to_remove = previous
        .iter()
        .filter(|record| !current.contains(record))
        .cloned()
        .collect();

    SnapshotDiff { to_add, to_remove }
}

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Add notifications accepted by the registry
    pub added: usize,
    /// Remove notifications accepted by the registry
    pub removed: usize,
    /// Notifications the registry rejected
    pub rejected: usize,
}

/// Applies snapshot differences to a reader registry
#[derive(Debug, Clone)]
pub struct Reconciler {
    base_port: u32,
}

impl Reconciler {
    pub fn new(base_port: u32) -> Self {
        Self { base_port }
    }

    pub fn base_port(&self) -> u32 {
        self.base_port
    }

    /// Notify `registry` of the changes from the stored snapshot to `current`
    /// and make `current` the stored snapshot
    ///
    /// Never fails: a rejected notification is logged and counted, and does
    /// not stop the remaining notifications or the snapshot replacement.
    pub fn apply(
        &self,
        store: &mut SnapshotStore,
        current: DeviceSnapshot,
        registry: &mut dyn ReaderRegistry,
    ) -> ReconcileReport {
        let previous = store.current();
        let changes = diff(&previous, &current);
        let mut report = ReconcileReport::default();

        for record in &changes.to_add {
            let port = record.port(self.base_port);
            match registry.add_reader(record.friendly_name(), port, record.library_path()) {
                Ok(()) => {
                    info!(
                        "Reader '{}' added on port {} ({} {})",
                        record.friendly_name(),
                        port,
                        record.bus,
                        record.key()
                    );
                    report.added += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to add reader '{}' on port {}: {}",
                        record.friendly_name(),
                        port,
                        e
                    );
                    report.rejected += 1;
                }
            }
        }

        for record in &changes.to_remove {
            let port = record.port(self.base_port);
            match registry.remove_reader(record.friendly_name(), port) {
                Ok(()) => {
                    info!(
                        "Reader '{}' removed from port {}",
                        record.friendly_name(),
                        port
                    );
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to remove reader '{}' from port {}: {}",
                        record.friendly_name(),
                        port,
                        e
                    );
                    report.rejected += 1;
                }
            }
        }

        drop(previous);
        store.replace(current);

        if changes.is_empty() {
            debug!("Device set unchanged");
        }
        report
    }
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use common::test_utils::{RecordingRegistry, RegistryCall};
    use model::{BusKind, DeviceKey, DriverDescriptor};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    /// Device identities drawn from a small space so overlaps are common
    fn keys_strategy() -> impl Strategy<Value = BTreeSet<(u32, u32, u32)>> {
        proptest::collection::btree_set((0u32..4, 0u32..4, 0u32..8), 0..24)
    }

    fn build(keys: &BTreeSet<(u32, u32, u32)>) -> DeviceSnapshot {
        keys.iter()
            .map(|&(vendor, product, address)| {
                DeviceRecord::new(
                    Arc::new(DriverDescriptor::new(vendor, product, "Reader", "/lib")),
                    BusKind::Usb,
                    address,
                )
            })
            .collect()
    }

    fn key_set(records: &[DeviceRecord]) -> BTreeSet<DeviceKey> {
        records.iter().map(DeviceRecord::key).collect()
    }

    fn as_keys(keys: &BTreeSet<(u32, u32, u32)>) -> BTreeSet<DeviceKey> {
        build(keys).keys().copied().collect()
    }

    proptest! {
        /// Property: a snapshot never differs from itself
        #[test]
        fn prop_diff_with_self_is_empty(keys in keys_strategy()) {
            let snapshot = build(&keys);
            prop_assert!(diff(&snapshot, &snapshot).is_empty());
        }

        /// Property: to_add is B - A and to_remove is A - B
        #[test]
        fn prop_diff_is_set_difference(a in keys_strategy(), b in keys_strategy()) {
            let changes = diff(&build(&a), &build(&b));

            let expected_add: BTreeSet<_> = as_keys(&b).difference(&as_keys(&a)).copied().collect();
            let expected_remove: BTreeSet<_> = as_keys(&a).difference(&as_keys(&b)).copied().collect();

            prop_assert_eq!(key_set(&changes.to_add), expected_add);
            prop_assert_eq!(key_set(&changes.to_remove), expected_remove);
        }

        /// Property: every add of a pass precedes every remove
        #[test]
        fn prop_adds_precede_removes(a in keys_strategy(), b in keys_strategy()) {
            let reconciler = Reconciler::new(0x200000);
            let mut store = SnapshotStore::new();
            let mut registry = RecordingRegistry::new();

            reconciler.apply(&mut store, build(&a), &mut registry);
            registry.clear();
            let report = reconciler.apply(&mut store, build(&b), &mut registry);

            let calls = registry.calls();
            let first_remove = calls
                .iter()
                .position(|c| matches!(c, RegistryCall::Remove { .. }))
                .unwrap_or(calls.len());
            let only_removes_after = calls[first_remove..]
                .iter()
                .all(|c| matches!(c, RegistryCall::Remove { .. }));
            prop_assert!(only_removes_after, "add notification after a remove: {:?}", calls);
            prop_assert_eq!(report.added + report.removed, calls.len());
            prop_assert_eq!(store.current().len(), b.len());
        }
    }
}
