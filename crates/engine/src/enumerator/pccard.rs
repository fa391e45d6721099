//! PC-card enumeration from a sysfs-style device tree
//!
//! Every entry is named `<socket>.<function>` and holds hex `manf_id` and
//! `card_id` files. The socket number is the device address; multiple
//! functions of one card collapse into a single device.

use crate::catalog::parse_hex;
use model::{BusKind, DeviceEnumerator, EnumerationError, RawDevice};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Where Linux exposes PCMCIA devices
pub const DEFAULT_PCCARD_ROOT: &str = "/sys/bus/pcmcia/devices";

const MANUFACTURER_FILE: &str = "manf_id";
const CARD_FILE: &str = "card_id";

/// Lists PC cards present in the sockets
#[derive(Debug, Clone)]
pub struct PcCardEnumerator {
    root: PathBuf,
}

impl PcCardEnumerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for PcCardEnumerator {
    fn default() -> Self {
        Self::new(DEFAULT_PCCARD_ROOT)
    }
}

/// `(socket, function)` from an entry name such as `0.1`
fn parse_entry_name(name: &str) -> Option<(u32, u32)> {
    let (socket, function) = name.split_once('.')?;
    Some((socket.parse().ok()?, function.parse().ok()?))
}

/// Read one identity property; a missing file reads as 0
fn read_property(entry: &Path, file: &str) -> Result<u32, EnumerationError> {
    let path = entry.join(file);
    match fs::read_to_string(&path) {
        Ok(contents) => parse_hex(&contents).ok_or_else(|| EnumerationError::DeviceQuery {
            bus: BusKind::PcCard,
            reason: format!("{} is not a hex identity: '{}'", path.display(), contents.trim()),
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("{} missing, treating it as 0", path.display());
            Ok(0)
        }
        Err(e) => Err(EnumerationError::Io(e)),
    }
}

impl DeviceEnumerator for PcCardEnumerator {
    fn bus(&self) -> BusKind {
        BusKind::PcCard
    }

    fn list_present_devices(&self) -> Result<Vec<RawDevice>, EnumerationError> {
        if !self.root.exists() {
            debug!("No PC-card bus at {}", self.root.display());
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            match parse_entry_name(&name.to_string_lossy()) {
                Some((socket, function)) => entries.push((socket, function, entry.path())),
                None => trace!("Skipping PC-card entry {:?}", name),
            }
        }
        entries.sort();

        let mut sockets: BTreeMap<u32, RawDevice> = BTreeMap::new();
        for (socket, function, path) in entries {
            if sockets.contains_key(&socket) {
                trace!("Socket {} function {} folded into its card", socket, function);
                continue;
            }

            let vendor_id = read_property(&path, MANUFACTURER_FILE)?;
            let product_id = read_property(&path, CARD_FILE)?;
            sockets.insert(socket, RawDevice::new(vendor_id, product_id, socket));
        }

        Ok(sockets.into_values().collect())
    }
}
