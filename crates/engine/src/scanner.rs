//! One full rescan pass
//!
//! Reload the catalog, match every bus, reconcile against the stored
//! snapshot. A catalog or matcher error aborts the pass before the registry
//! hears anything, leaving the stored snapshot as it was.

use crate::catalog::DriverCatalog;
use crate::matcher::match_devices;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::snapshot::{DeviceSnapshot, SnapshotReader, SnapshotStore};
use crate::watcher::WatcherConfig;
use model::{CatalogLoadError, DescriptorProvider, DeviceEnumerator, MatchError, ReaderRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Why a rescan was aborted
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to load driver catalog: {0}")]
    Catalog(#[from] CatalogLoadError),

    #[error("Failed to match devices: {0}")]
    Match(#[from] MatchError),
}

/// Result of a completed rescan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub report: ReconcileReport,
    /// Devices in the new snapshot
    pub devices: usize,
    /// Descriptors in the catalog used for this pass
    pub drivers: usize,
}

/// Owns the collaborators and the snapshot store for the rescan pipeline
pub struct Scanner {
    drivers_dir: PathBuf,
    provider: Box<dyn DescriptorProvider>,
    enumerators: Vec<Box<dyn DeviceEnumerator>>,
    registry: Box<dyn ReaderRegistry>,
    reconciler: Reconciler,
    store: SnapshotStore,
}

impl Scanner {
    pub fn new(
        config: &WatcherConfig,
        provider: Box<dyn DescriptorProvider>,
        enumerators: Vec<Box<dyn DeviceEnumerator>>,
        registry: Box<dyn ReaderRegistry>,
    ) -> Self {
        Self {
            drivers_dir: config.drivers_dir.clone(),
            provider,
            enumerators,
            registry,
            reconciler: Reconciler::new(config.base_port),
            store: SnapshotStore::new(),
        }
    }

    /// Load the driver catalog as a rescan would
    pub fn load_catalog(&self) -> Result<DriverCatalog, CatalogLoadError> {
        DriverCatalog::load(self.provider.as_ref(), &self.drivers_dir)
    }

    /// Run one pass: load, match, reconcile
    pub fn rescan(&mut self) -> Result<ScanOutcome, ScanError> {
        let catalog = self.load_catalog()?;
        let current = match_devices(&catalog, &self.enumerators)?;
        let drivers = catalog.len();
        drop(catalog);

        let devices = current.len();
        debug!("Matched {} devices against {} drivers", devices, drivers);

        let report = self
            .reconciler
            .apply(&mut self.store, current, self.registry.as_mut());

        Ok(ScanOutcome {
            report,
            devices,
            drivers,
        })
    }

    /// The live snapshot
    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.store.current()
    }

    pub fn reader(&self) -> SnapshotReader {
        self.store.reader()
    }

    pub fn base_port(&self) -> u32 {
        self.reconciler.base_port()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockEnumerator, RecordingRegistry, StaticProvider, raw_descriptor};
    use model::{BusKind, RawDevice};

    fn scanner(
        provider: &StaticProvider,
        usb: &MockEnumerator,
        registry: &RecordingRegistry,
    ) -> Scanner {
        Scanner::new(
            &WatcherConfig::default(),
            Box::new(provider.clone()),
            vec![Box::new(usb.clone())],
            Box::new(registry.clone()),
        )
    }

    #[test]
    fn test_rescan_reloads_catalog_each_pass() {
        let provider = StaticProvider::new(vec![]);
        let usb = MockEnumerator::new(BusKind::Usb);
        usb.plug(RawDevice::new(0x04e6, 0x5116, 1));
        let registry = RecordingRegistry::new();
        let mut scanner = scanner(&provider, &usb, &registry);

        let outcome = scanner.rescan().unwrap();
        assert_eq!(outcome.devices, 0);
        assert_eq!(outcome.drivers, 0);

        // A driver installed between scans is picked up by the next one
        provider.set_entries(vec![raw_descriptor(0x04e6, 0x5116, "ReaderX", "/a")]);
        let outcome = scanner.rescan().unwrap();
        assert_eq!(outcome.devices, 1);
        assert_eq!(outcome.report.added, 1);
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn test_catalog_failure_skips_enumeration() {
        let provider = StaticProvider::new(vec![]);
        provider.fail_with("unreadable");
        let usb = MockEnumerator::new(BusKind::Usb);
        let registry = RecordingRegistry::new();
        let mut scanner = scanner(&provider, &usb, &registry);

        assert!(matches!(scanner.rescan(), Err(ScanError::Catalog(_))));
        assert_eq!(usb.calls(), 0);
        assert!(registry.calls().is_empty());
    }

    #[test]
    fn test_match_failure_keeps_snapshot() {
        let provider = StaticProvider::new(vec![raw_descriptor(0x04e6, 0x5116, "ReaderX", "/a")]);
        let usb = MockEnumerator::new(BusKind::Usb);
        usb.plug(RawDevice::new(0x04e6, 0x5116, 1));
        let registry = RecordingRegistry::new();
        let mut scanner = scanner(&provider, &usb, &registry);

        scanner.rescan().unwrap();
        registry.clear();

        usb.unplug(1);
        usb.set_failing(true);
        let err = scanner.rescan().unwrap_err();
        assert!(matches!(err, ScanError::Match(_)));
        assert!(registry.calls().is_empty());
        assert_eq!(scanner.snapshot().len(), 1);
    }
}
