//! Driver catalog
//!
//! Built from scratch on every rescan from the descriptor provider's output.
//! One malformed entry invalidates the whole load.

use model::{CatalogLoadError, DescriptorProvider, DriverDescriptor, RawDescriptor, UNNAMED_DEVICE};
use std::path::Path;
use tracing::debug;

/// Ordered, immutable list of driver descriptors
///
/// Identities are not required to be unique.
#[derive(Debug, Clone, Default)]
pub struct DriverCatalog {
    drivers: Vec<DriverDescriptor>,
}

impl DriverCatalog {
    /// Load the catalog from `provider` at `path`
    pub fn load(provider: &dyn DescriptorProvider, path: &Path) -> Result<Self, CatalogLoadError> {
        let entries = provider.list_descriptors(path)?;
        let catalog = Self::from_raw(entries)?;

        debug!(
            "Loaded {} driver descriptors from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Validate raw provider entries, keeping their order
    pub fn from_raw(entries: Vec<RawDescriptor>) -> Result<Self, CatalogLoadError> {
        let drivers = entries
            .into_iter()
            .map(validate_entry)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { drivers })
    }

    /// Build a catalog from already validated descriptors
    pub fn from_descriptors(drivers: Vec<DriverDescriptor>) -> Self {
        Self { drivers }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DriverDescriptor> {
        self.drivers.iter()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Every descriptor with the given identity, in catalog order
    pub fn drivers_for(
        &self,
        vendor_id: u32,
        product_id: u32,
    ) -> impl Iterator<Item = &DriverDescriptor> {
        self.drivers
            .iter()
            .filter(move |d| d.matches(vendor_id, product_id))
    }
}

impl<'a> IntoIterator for &'a DriverCatalog {
    type Item = &'a DriverDescriptor;
    type IntoIter = std::slice::Iter<'a, DriverDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.drivers.iter()
    }
}

fn validate_entry(entry: RawDescriptor) -> Result<DriverDescriptor, CatalogLoadError> {
    let vendor_id = parse_identity(entry.vendor_id.as_deref(), "vendor", &entry.library_path)?;
    let product_id = parse_identity(entry.product_id.as_deref(), "product", &entry.library_path)?;

    let friendly_name = match entry.friendly_name {
        Some(name) => name,
        None => {
            debug!(
                "Driver {} has no friendly name, using '{}'",
                entry.library_path, UNNAMED_DEVICE
            );
            UNNAMED_DEVICE.to_string()
        }
    };

    Ok(DriverDescriptor {
        vendor_id,
        product_id,
        friendly_name,
        library_path: entry.library_path,
    })
}

fn parse_identity(
    value: Option<&str>,
    field: &'static str,
    library_path: &str,
) -> Result<u32, CatalogLoadError> {
    let value = value.ok_or_else(|| CatalogLoadError::MissingIdentity {
        library_path: library_path.to_string(),
        field,
    })?;

    parse_hex(value).ok_or_else(|| CatalogLoadError::InvalidIdentity {
        library_path: library_path.to_string(),
        field,
        value: value.to_string(),
    })
}

/// Parse a hexadecimal identity, `0x` prefix optional
pub fn parse_hex(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}
