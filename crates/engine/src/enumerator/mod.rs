//! Bus enumerators for the host platform

mod pccard;
mod usb;

pub use pccard::{DEFAULT_PCCARD_ROOT, PcCardEnumerator};
pub use usb::{UsbEnumerator, location_id};
