//! USB bus enumeration via libusb

use model::{BusKind, DeviceEnumerator, EnumerationError, RawDevice};
use rusb::{Context, UsbContext};
use tracing::trace;

/// Hub levels that fit below the bus number in a location id
const MAX_PORT_DEPTH: usize = 6;

/// Stable address of a USB device from its topology
///
/// Bus number in bits 31..24, then one 4-bit nibble per hub port starting at
/// bit 23. Deeper levels than fit are ignored.
pub fn location_id(bus: u8, ports: &[u8]) -> u32 {
    let mut id = u32::from(bus) << 24;
    for (level, port) in ports.iter().take(MAX_PORT_DEPTH).enumerate() {
        let shift = 20 - 4 * level as u32;
        id |= (u32::from(*port) & 0xf) << shift;
    }
    id
}

/// Lists present USB devices
pub struct UsbEnumerator {
    context: Context,
}

impl UsbEnumerator {
    pub fn new() -> Result<Self, EnumerationError> {
        let context = Context::new().map_err(|e| EnumerationError::ListFailed {
            bus: BusKind::Usb,
            reason: format!("failed to create USB context: {}", e),
        })?;
        Ok(Self { context })
    }
}

fn query_error(bus: u8, address: u8, e: rusb::Error) -> EnumerationError {
    EnumerationError::DeviceQuery {
        bus: BusKind::Usb,
        reason: format!("bus={}, addr={}: {}", bus, address, e),
    }
}

impl DeviceEnumerator for UsbEnumerator {
    fn bus(&self) -> BusKind {
        BusKind::Usb
    }

    fn list_present_devices(&self) -> Result<Vec<RawDevice>, EnumerationError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| EnumerationError::ListFailed {
                bus: BusKind::Usb,
                reason: e.to_string(),
            })?;

        let mut present = Vec::with_capacity(devices.len());
        for device in devices.iter() {
            let bus = device.bus_number();
            let address = device.address();

            let descriptor = device
                .device_descriptor()
                .map_err(|e| query_error(bus, address, e))?;
            let ports = device
                .port_numbers()
                .map_err(|e| query_error(bus, address, e))?;

            let location = location_id(bus, &ports);
            trace!(
                "USB device {:04x}:{:04x} at bus={}, addr={}, location={:#010x}",
                descriptor.vendor_id(),
                descriptor.product_id(),
                bus,
                address,
                location
            );

            present.push(RawDevice::new(
                u32::from(descriptor.vendor_id()),
                u32::from(descriptor.product_id()),
                location,
            ));
        }

        Ok(present)
    }
}
