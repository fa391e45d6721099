//! Driver and device type definitions
//!
//! This module defines the records that flow through a rescan: raw provider
//! and bus output, the validated driver descriptor, and the matched device
//! record kept in snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Friendly name used when a driver bundle does not declare one
pub const UNNAMED_DEVICE: &str = "unnamed device";

/// Offset added to raw bus addresses to form reader port identifiers
pub const DEFAULT_BASE_PORT: u32 = 0x200000;

/// Default drop directory for driver bundles
pub const DEFAULT_DRIVERS_DIR: &str = "/usr/libexec/SmartCardServices/drivers/";

/// Bus family a device was found on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// USB-like bus
    Usb,
    /// PC-card-like bus
    PcCard,
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusKind::Usb => write!(f, "USB"),
            BusKind::PcCard => write!(f, "PCCard"),
        }
    }
}

/// Reader port identifier handed to the reader registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub u32);

impl PortId {
    /// Synthesize a port identifier from a base offset and a raw bus address
    pub fn from_address(base_port: u32, address: u32) -> Self {
        PortId(base_port.wrapping_add(address))
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Driver entry exactly as a descriptor provider reports it
///
/// Identity fields are hexadecimal strings and may be missing; validation
/// happens when the catalog is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDescriptor {
    /// Vendor identity (hex string)
    pub vendor_id: Option<String>,
    /// Product identity (hex string)
    pub product_id: Option<String>,
    /// Human-readable label
    pub friendly_name: Option<String>,
    /// Location of the driver implementation
    pub library_path: String,
}

/// Identity and metadata for one installable reader driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDescriptor {
    /// Bus-assigned manufacturer code
    pub vendor_id: u32,
    /// Bus-assigned product code
    pub product_id: u32,
    /// Human-readable label
    pub friendly_name: String,
    /// Filesystem location of the driver implementation
    pub library_path: String,
}

impl DriverDescriptor {
    pub fn new(
        vendor_id: u32,
        product_id: u32,
        friendly_name: impl Into<String>,
        library_path: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id,
            product_id,
            friendly_name: friendly_name.into(),
            library_path: library_path.into(),
        }
    }

    /// Whether this driver handles a device with the given identity
    ///
    /// Only vendor and product take part; addresses and names never do.
    pub fn matches(&self, vendor_id: u32, product_id: u32) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

/// A device currently present on a bus, as an enumerator reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawDevice {
    pub vendor_id: u32,
    pub product_id: u32,
    /// Bus-assigned location or slot
    pub address: u32,
}

impl RawDevice {
    pub fn new(vendor_id: u32, product_id: u32, address: u32) -> Self {
        Self {
            vendor_id,
            product_id,
            address,
        }
    }
}

/// Equality key for matched devices: `(vendor, product, address)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub vendor_id: u32,
    pub product_id: u32,
    pub address: u32,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x}@{:#x}",
            self.vendor_id, self.product_id, self.address
        )
    }
}

/// One present device matched to a driver
///
/// The record owns its own copy of the driver descriptor, so it stays valid
/// after the catalog it was matched against is dropped.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// Private copy of the matching driver
    pub driver: Arc<DriverDescriptor>,
    /// Bus the device was found on (informational, not part of equality)
    pub bus: BusKind,
    /// Bus-assigned location or slot
    pub address: u32,
}

impl DeviceRecord {
    pub fn new(driver: Arc<DriverDescriptor>, bus: BusKind, address: u32) -> Self {
        Self {
            driver,
            bus,
            address,
        }
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            vendor_id: self.driver.vendor_id,
            product_id: self.driver.product_id,
            address: self.address,
        }
    }

    /// Port identifier for this record under the given base offset
    pub fn port(&self, base_port: u32) -> PortId {
        PortId::from_address(base_port, self.address)
    }

    pub fn friendly_name(&self) -> &str {
        &self.driver.friendly_name
    }

    pub fn library_path(&self) -> &str {
        &self.driver.library_path
    }
}

impl PartialEq for DeviceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DeviceRecord {}
