//! Collaborator interfaces consumed by the hotplug engine
//!
//! The engine never talks to buses, driver bundles or the reader factory
//! directly. Each of those is reached through one of the traits below so the
//! platform adapters and test doubles can be swapped freely.

use crate::error::{EnumerationError, EventSourceError, ProviderError, RegistryError};
use crate::types::{BusKind, PortId, RawDescriptor, RawDevice};
use std::path::Path;
use std::sync::Arc;

/// Source of raw driver descriptors
pub trait DescriptorProvider: Send {
    /// List every driver descriptor found at `path`, in source order
    fn list_descriptors(&self, path: &Path) -> Result<Vec<RawDescriptor>, ProviderError>;
}

/// Lists the devices currently present on one bus family
pub trait DeviceEnumerator: Send {
    /// Bus family this enumerator covers
    fn bus(&self) -> BusKind;

    /// Currently present devices, in bus order
    fn list_present_devices(&self) -> Result<Vec<RawDevice>, EnumerationError>;
}

/// Receiver of hotplug notifications
///
/// Notifications carry no device payload: they only say a rescan is warranted.
pub trait HotplugSink: Send + Sync {
    fn device_appeared(&self, bus: BusKind);

    fn device_disappeared(&self, bus: BusKind);
}

/// Delivers attach/detach notifications for one bus family
pub trait EventSource: Send {
    fn bus(&self) -> BusKind;

    /// Start delivering both "appeared" and "disappeared" notifications to `sink`
    fn subscribe(&mut self, sink: Arc<dyn HotplugSink>) -> Result<(), EventSourceError>;

    /// Stop delivering notifications and release platform resources
    ///
    /// Must be idempotent.
    fn unsubscribe(&mut self);
}

/// Downstream reader lifecycle manager
pub trait ReaderRegistry: Send {
    fn add_reader(
        &mut self,
        friendly_name: &str,
        port: PortId,
        library_path: &str,
    ) -> Result<(), RegistryError>;

    fn remove_reader(&mut self, friendly_name: &str, port: PortId) -> Result<(), RegistryError>;
}
