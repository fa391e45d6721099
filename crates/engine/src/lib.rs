//! Hotplug engine for smart-card reader drivers
//!
//! Keeps a reader registry in sync with the devices present on the host:
//! every trigger reloads the driver catalog, matches it against every bus
//! enumerator, diffs the result against the previous snapshot and emits
//! add/remove notifications for the difference.
//!
//! - [`catalog`]: driver catalog loading and validation
//! - [`matcher`]: identity matching of present devices against the catalog
//! - [`snapshot`]: matched device sets and the snapshot store
//! - [`reconciler`]: snapshot diffing and registry notification
//! - [`scanner`]: one full rescan pass
//! - [`watcher`]: the background worker that serializes rescans
//! - [`provider`], [`enumerator`], [`events`]: default platform adapters

pub mod catalog;
pub mod enumerator;
pub mod events;
pub mod matcher;
pub mod provider;
pub mod reconciler;
pub mod scanner;
pub mod snapshot;
pub mod watcher;

pub use catalog::DriverCatalog;
pub use matcher::{match_device, match_devices};
pub use reconciler::{ReconcileReport, Reconciler, SnapshotDiff, diff};
pub use scanner::{ScanError, ScanOutcome, Scanner};
pub use snapshot::{DeviceSnapshot, SnapshotReader, SnapshotStore};
pub use watcher::{Watcher, WatcherConfig, WatcherHandle, WatcherParts};
