//! Data model for pcsc-hotplug
//!
//! This crate defines the types shared between the hotplug engine, the
//! daemon, and test tooling: driver descriptors, matched device records,
//! the error taxonomy, and the collaborator traits the engine consumes
//! (descriptor providers, device enumerators, event sources and the reader
//! registry).
//!
//! # Example
//!
//! ```
//! use model::{BusKind, DeviceRecord, DriverDescriptor, PortId};
//! use std::sync::Arc;
//!
//! let driver = DriverDescriptor::new(0x04E6, 0x5116, "ReaderX", "/a");
//! let record = DeviceRecord::new(Arc::new(driver), BusKind::Usb, 0x5);
//!
//! assert_eq!(record.port(0x200000), PortId(0x200005));
//! ```

pub mod error;
pub mod status;
pub mod traits;
pub mod types;

pub use error::{
    CatalogLoadError, EnumerationError, EventSourceError, MatchError, ProviderError,
    RegistryError,
};
pub use status::{WatcherState, WatcherStatus};
pub use traits::{DescriptorProvider, DeviceEnumerator, EventSource, HotplugSink, ReaderRegistry};
pub use types::{
    BusKind, DEFAULT_BASE_PORT, DEFAULT_DRIVERS_DIR, DeviceKey, DeviceRecord, DriverDescriptor,
    PortId, RawDescriptor, RawDevice, UNNAMED_DEVICE,
};
