//! Device matcher
//!
//! Matches every device present on every bus against the driver catalog by
//! `(vendor, product)` identity. Addresses and names never take part.

use crate::catalog::DriverCatalog;
use crate::snapshot::DeviceSnapshot;
use model::{BusKind, DeviceEnumerator, DeviceRecord, MatchError, RawDevice};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Records for one raw device: one per matching catalog entry
///
/// Each record gets its own copy of the descriptor so it outlives the catalog.
pub fn match_device(catalog: &DriverCatalog, bus: BusKind, device: &RawDevice) -> Vec<DeviceRecord> {
    catalog
        .drivers_for(device.vendor_id, device.product_id)
        .map(|driver| DeviceRecord::new(Arc::new(driver.clone()), bus, device.address))
        .collect()
}

/// Match all present devices on all buses against `catalog`
///
/// Fails the whole pass on the first enumerator failure; no partial result
/// is ever returned.
pub fn match_devices(
    catalog: &DriverCatalog,
    enumerators: &[Box<dyn DeviceEnumerator>],
) -> Result<DeviceSnapshot, MatchError> {
    let mut snapshot = DeviceSnapshot::new();
    let mut port_owners: HashMap<u32, BusKind> = HashMap::new();

    for enumerator in enumerators {
        let bus = enumerator.bus();
        let devices = enumerator
            .list_present_devices()
            .map_err(|source| MatchError::EnumerationFailed { bus, source })?;

        debug!("{} bus reports {} present devices", bus, devices.len());

        for device in &devices {
            for record in match_device(catalog, bus, device) {
                debug!(
                    "Matched {} device {:04x}:{:04x} at {:#x} to '{}'",
                    bus,
                    device.vendor_id,
                    device.product_id,
                    device.address,
                    record.friendly_name()
                );

                if let Some(owner) = port_owners.insert(device.address, bus)
                    && owner != bus
                {
                    warn!(
                        "{} and {} devices share address {:#x}; their reader ports collide",
                        owner, bus, device.address
                    );
                }

                let key = record.key();
                if !snapshot.insert(record) {
                    debug!("Duplicate match for {} collapsed", key);
                }
            }
        }
    }

    Ok(snapshot)
}
