//! Reader registry that tracks readers by port and logs every change
//!
//! Stands in for the reader factory when the daemon runs on its own.
//!
//! A port can briefly hold two readers: when a device is re-identified at the
//! same address, the new reader is added before the old one is removed.

use model::{PortId, ReaderRegistry, RegistryError};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredReader {
    pub name: String,
    pub library: String,
}

#[derive(Debug, Default)]
pub struct LoggingRegistry {
    /// Readers per port, oldest registration first
    readers: BTreeMap<PortId, Vec<RegisteredReader>>,
}

impl LoggingRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReaderRegistry for LoggingRegistry {
    fn add_reader(
        &mut self,
        friendly_name: &str,
        port: PortId,
        library_path: &str,
    ) -> Result<(), RegistryError> {
        let entries = self.readers.entry(port).or_default();
        if let Some(previous) = entries.last() {
            debug!(
                "Port {} still holds '{}', '{}' takes over once it is removed",
                port, previous.name, friendly_name
            );
        }

        info!(
            "Reader attached: '{}' on port {} (driver {})",
            friendly_name, port, library_path
        );
        entries.push(RegisteredReader {
            name: friendly_name.to_string(),
            library: library_path.to_string(),
        });
        Ok(())
    }

    fn remove_reader(&mut self, friendly_name: &str, port: PortId) -> Result<(), RegistryError> {
        let Some(entries) = self.readers.get_mut(&port) else {
            return Err(RegistryError::UnknownPort { port });
        };
        let Some(index) = entries.iter().position(|r| r.name == friendly_name) else {
            return Err(RegistryError::UnknownPort { port });
        };

        let removed = entries.remove(index);
        if entries.is_empty() {
            self.readers.remove(&port);
        }

        info!(
            "Reader detached: '{}' from port {} (driver {})",
            friendly_name, port, removed.library
        );
        Ok(())
    }
}
