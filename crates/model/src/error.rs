//! Error taxonomy for the hotplug engine and its collaborators

use crate::types::{BusKind, PortId};
use thiserror::Error;

/// Failure reported by a descriptor provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Source location could not be opened or listed
    #[error("Cannot read descriptor source {path}: {reason}")]
    Unreadable { path: String, reason: String },

    /// An individual bundle could not be read or parsed
    #[error("Malformed driver bundle {bundle}: {reason}")]
    MalformedBundle { bundle: String, reason: String },
}

/// Catalog construction failures; any of these aborts the whole load
#[derive(Debug, Error)]
pub enum CatalogLoadError {
    /// The descriptor source cannot be opened or enumerated
    #[error("Descriptor source unavailable: {0}")]
    SourceUnavailable(#[from] ProviderError),

    /// A descriptor entry lacks its vendor or product identity
    #[error("Driver {library_path} is missing its {field} identity")]
    MissingIdentity {
        library_path: String,
        field: &'static str,
    },

    /// An identity field is present but is not a 32-bit hex number
    #[error("Driver {library_path} has invalid {field} identity '{value}'")]
    InvalidIdentity {
        library_path: String,
        field: &'static str,
        value: String,
    },
}

/// Failure of a single bus enumerator
#[derive(Debug, Error)]
pub enum EnumerationError {
    /// Bus listing failed as a whole
    #[error("Failed to list {bus} devices: {reason}")]
    ListFailed { bus: BusKind, reason: String },

    /// A present device could not be queried
    #[error("Failed to query {bus} device: {reason}")]
    DeviceQuery { bus: BusKind, reason: String },

    /// I/O error while reading bus state
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Matcher failures; any enumerator failure fails the whole pass
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Enumeration failed on {bus} bus: {source}")]
    EnumerationFailed {
        bus: BusKind,
        #[source]
        source: EnumerationError,
    },
}

impl MatchError {
    /// Bus family whose enumerator failed
    pub fn bus(&self) -> BusKind {
        match self {
            MatchError::EnumerationFailed { bus, .. } => *bus,
        }
    }
}

/// Event source subscription failures
#[derive(Debug, Error)]
pub enum EventSourceError {
    /// The platform cannot deliver notifications for this bus
    #[error("Hotplug notifications unsupported on {0} bus")]
    Unsupported(BusKind),

    /// Already subscribed
    #[error("Event source for {0} bus is already subscribed")]
    AlreadySubscribed(BusKind),

    /// Registration with the platform failed
    #[error("Failed to subscribe to {bus} notifications: {reason}")]
    Subscribe { bus: BusKind, reason: String },
}

/// Rejection of a single add/remove notification by the reader registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No reader registered on port {port}")]
    UnknownPort { port: PortId },

    #[error("Reader registry rejected request: {0}")]
    Rejected(String),
}
