//! Daemon configuration management

use anyhow::{Context, Result, anyhow};
use engine::WatcherConfig;
use engine::enumerator::DEFAULT_PCCARD_ROOT;
use model::{DEFAULT_BASE_PORT, DEFAULT_DRIVERS_DIR};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub ports: PortSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub pccard: PcCardSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "DaemonSettings::default_log_level")]
    pub log_level: String,
    /// Report lifecycle to systemd
    #[serde(default)]
    pub service_mode: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            service_mode: false,
        }
    }
}

impl DaemonSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSettings {
    /// Driver bundle drop directory; `~` is expanded
    #[serde(default = "CatalogSettings::default_drivers_dir")]
    pub drivers_dir: String,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            drivers_dir: Self::default_drivers_dir(),
        }
    }
}

impl CatalogSettings {
    fn default_drivers_dir() -> String {
        DEFAULT_DRIVERS_DIR.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    /// Added to a device address to form its reader port
    #[serde(default = "PortSettings::default_base_port")]
    pub base_port: u32,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            base_port: Self::default_base_port(),
        }
    }
}

impl PortSettings {
    fn default_base_port() -> u32 {
        DEFAULT_BASE_PORT
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Rescan on libusb hotplug notifications
    #[serde(default = "default_true")]
    pub hotplug: bool,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            hotplug: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcCardSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "PcCardSettings::default_sysfs_root")]
    pub sysfs_root: String,
    #[serde(default = "PcCardSettings::default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for PcCardSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sysfs_root: Self::default_sysfs_root(),
            poll_interval_ms: Self::default_poll_interval(),
        }
    }
}

impl PcCardSettings {
    fn default_sysfs_root() -> String {
        DEFAULT_PCCARD_ROOT.to_string()
    }

    fn default_poll_interval() -> u64 {
        1000
    }
}

fn default_true() -> bool {
    true
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl DaemonConfig {
    /// Load configuration from `path`, or from the first standard location
    /// that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/pcsc-hotplug/hotplugd.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DaemonConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if none is usable
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("pcsc-hotplug").join("hotplugd.toml")
        } else {
            PathBuf::from(".config/pcsc-hotplug/hotplugd.toml")
        }
    }

    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.daemon.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.daemon.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.catalog.drivers_dir.trim().is_empty() {
            return Err(anyhow!("catalog.drivers_dir must not be empty"));
        }

        if self.pccard.enabled && self.pccard.poll_interval_ms == 0 {
            return Err(anyhow!("pccard.poll_interval_ms must be greater than 0"));
        }

        Ok(())
    }

    pub fn drivers_dir(&self) -> PathBuf {
        expand_path(&self.catalog.drivers_dir)
    }

    pub fn sysfs_root(&self) -> PathBuf {
        expand_path(&self.pccard.sysfs_root)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.pccard.poll_interval_ms)
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            drivers_dir: self.drivers_dir(),
            base_port: self.ports.base_port,
        }
    }
}
