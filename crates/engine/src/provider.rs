//! Driver bundle directory provider
//!
//! Each `<name>.bundle` directory under the drop directory is one driver.
//! Its `Info.toml` carries the identity keys:
//!
//! ```toml
//! ifdVendorID = "0x04E6"
//! ifdProductID = "0x5116"
//! ifdFriendlyName = "SCM SCR 331"
//! ```
//!
//! The library path handed to the reader registry is the bundle directory.

use model::{DescriptorProvider, ProviderError, RawDescriptor};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Info file inside every bundle
pub const INFO_FILE: &str = "Info.toml";

const BUNDLE_EXTENSION: &str = "bundle";

#[derive(Debug, Deserialize)]
struct BundleInfo {
    #[serde(rename = "ifdVendorID")]
    vendor_id: Option<String>,
    #[serde(rename = "ifdProductID")]
    product_id: Option<String>,
    #[serde(rename = "ifdFriendlyName")]
    friendly_name: Option<String>,
}

/// Reads driver bundles from a directory
#[derive(Debug, Clone, Copy, Default)]
pub struct BundleDirectoryProvider;

impl BundleDirectoryProvider {
    pub fn new() -> Self {
        Self
    }

    fn bundles(&self, dir: &Path) -> Result<Vec<PathBuf>, ProviderError> {
        let unreadable = |e: std::io::Error| ProviderError::Unreadable {
            path: dir.display().to_string(),
            reason: e.to_string(),
        };

        let mut bundles = Vec::new();
        for entry in fs::read_dir(dir).map_err(unreadable)? {
            let path = entry.map_err(unreadable)?.path();
            if path.is_dir() && path.extension().is_some_and(|ext| ext == BUNDLE_EXTENSION) {
                bundles.push(path);
            } else {
                trace!("Skipping non-bundle entry {}", path.display());
            }
        }

        bundles.sort();
        Ok(bundles)
    }

    fn read_bundle(&self, bundle: &Path) -> Result<RawDescriptor, ProviderError> {
        let malformed = |reason: String| ProviderError::MalformedBundle {
            bundle: bundle.display().to_string(),
            reason,
        };

        let info_path = bundle.join(INFO_FILE);
        let contents = fs::read_to_string(&info_path)
            .map_err(|e| malformed(format!("cannot read {}: {}", INFO_FILE, e)))?;
        let info: BundleInfo = toml::from_str(&contents)
            .map_err(|e| malformed(format!("cannot parse {}: {}", INFO_FILE, e)))?;

        Ok(RawDescriptor {
            vendor_id: info.vendor_id,
            product_id: info.product_id,
            friendly_name: info.friendly_name,
            library_path: bundle.display().to_string(),
        })
    }
}

impl DescriptorProvider for BundleDirectoryProvider {
    fn list_descriptors(&self, path: &Path) -> Result<Vec<RawDescriptor>, ProviderError> {
        let bundles = self.bundles(path)?;
        debug!("Found {} driver bundles in {}", bundles.len(), path.display());

        bundles
            .iter()
            .map(|bundle| self.read_bundle(bundle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_bundle(dir: &Path, name: &str, info: &str) -> PathBuf {
        let bundle = dir.join(name);
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join(INFO_FILE), info).unwrap();
        bundle
    }

    #[test]
    fn test_lists_bundles_in_name_order() {
        let dir = TempDir::new().unwrap();
        let second = write_bundle(
            dir.path(),
            "b_reader.bundle",
            "ifdVendorID = \"0x076B\"\nifdProductID = \"0x3021\"\nifdFriendlyName = \"ReaderY\"\n",
        );
        let first = write_bundle(
            dir.path(),
            "a_reader.bundle",
            "ifdVendorID = \"0x04E6\"\nifdProductID = \"0x5116\"\nifdFriendlyName = \"ReaderX\"\n",
        );
        fs::write(dir.path().join("README"), "not a bundle").unwrap();
        fs::create_dir(dir.path().join("plain-dir")).unwrap();

        let entries = BundleDirectoryProvider::new()
            .list_descriptors(dir.path())
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].friendly_name.as_deref(), Some("ReaderX"));
        assert_eq!(entries[0].vendor_id.as_deref(), Some("0x04E6"));
        assert_eq!(entries[0].library_path, first.display().to_string());
        assert_eq!(entries[1].library_path, second.display().to_string());
    }

    #[test]
    fn test_missing_keys_are_passed_through() {
        let dir = TempDir::new().unwrap();
        write_bundle(dir.path(), "partial.bundle", "ifdVendorID = \"0x04E6\"\n");

        let entries = BundleDirectoryProvider::new()
            .list_descriptors(dir.path())
            .unwrap();

        assert_eq!(entries[0].product_id, None);
        assert_eq!(entries[0].friendly_name, None);
    }

    #[test]
    fn test_missing_directory_is_unreadable() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let err = BundleDirectoryProvider::new()
            .list_descriptors(&missing)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unreadable { .. }));
    }

    #[test]
    fn test_bundle_without_info_is_malformed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("empty.bundle")).unwrap();

        let err = BundleDirectoryProvider::new()
            .list_descriptors(dir.path())
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedBundle { .. }));
    }

    #[test]
    fn test_unparsable_info_is_malformed() {
        let dir = TempDir::new().unwrap();
        write_bundle(dir.path(), "broken.bundle", "ifdVendorID = [unterminated");

        let err = BundleDirectoryProvider::new()
            .list_descriptors(dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("broken.bundle"));
    }
}
