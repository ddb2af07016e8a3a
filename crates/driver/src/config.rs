//! Driver configuration management

use crate::registry::DEFAULT_NODE_PREFIX;
use crate::session::TransferTimeouts;
use crate::usb::{DEFAULT_ID_TABLE, OpenOptions, UsbSettings};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub usb: UsbConfig,
    #[serde(default)]
    pub transfer: TransferSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSettings {
    #[serde(default = "DriverSettings::default_log_level")]
    pub log_level: String,
    /// Device nodes are named `<prefix><minor>`
    #[serde(default = "DriverSettings::default_node_prefix")]
    pub node_prefix: String,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            node_prefix: Self::default_node_prefix(),
        }
    }
}

impl DriverSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_node_prefix() -> String {
        DEFAULT_NODE_PREFIX.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbConfig {
    /// Devices to bind to, as `0xVID:0xPID` (`*` matches any)
    #[serde(default = "UsbConfig::default_id_table")]
    pub id_table: Vec<String>,
    #[serde(default)]
    pub interface: u8,
    #[serde(default = "UsbConfig::default_detach_kernel_driver")]
    pub detach_kernel_driver: bool,
    /// Writes queued per device before submission fails
    #[serde(default = "UsbConfig::default_max_pending_writes")]
    pub max_pending_writes: usize,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            id_table: Self::default_id_table(),
            interface: 0,
            detach_kernel_driver: Self::default_detach_kernel_driver(),
            max_pending_writes: Self::default_max_pending_writes(),
        }
    }
}

impl UsbConfig {
    fn default_id_table() -> Vec<String> {
        DEFAULT_ID_TABLE.iter().map(|s| s.to_string()).collect()
    }

    fn default_detach_kernel_driver() -> bool {
        true
    }

    fn default_max_pending_writes() -> usize {
        16
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Read timeout per unit of the IN endpoint's bInterval
    #[serde(default = "TransferSettings::default_read_timeout_per_interval")]
    pub read_timeout_per_interval_ms: u64,
    #[serde(default = "TransferSettings::default_min_read_timeout")]
    pub min_read_timeout_ms: u64,
    #[serde(default = "TransferSettings::default_write_timeout")]
    pub write_timeout_ms: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            read_timeout_per_interval_ms: Self::default_read_timeout_per_interval(),
            min_read_timeout_ms: Self::default_min_read_timeout(),
            write_timeout_ms: Self::default_write_timeout(),
        }
    }
}

impl TransferSettings {
    fn default_read_timeout_per_interval() -> u64 {
        1000
    }

    fn default_min_read_timeout() -> u64 {
        100
    }

    fn default_write_timeout() -> u64 {
        1000
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver: DriverSettings::default(),
            usb: UsbConfig::default(),
            transfer: TransferSettings::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from `path`, or from the first standard location that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/stm32leds/driver.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DriverConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
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
            config_dir.join("stm32leds").join("driver.toml")
        } else {
            PathBuf::from(".config/stm32leds/driver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.driver.node_prefix.is_empty() || self.driver.node_prefix.contains('/') {
            return Err(anyhow!(
                "Invalid node prefix '{}', must be non-empty and contain no '/'",
                self.driver.node_prefix
            ));
        }

        if self.usb.id_table.is_empty() {
            return Err(anyhow!("usb.id_table is empty, no device would ever match"));
        }
        for filter in &self.usb.id_table {
            Self::validate_filter(filter)?;
        }

        if self.usb.max_pending_writes == 0 {
            return Err(anyhow!("usb.max_pending_writes must be at least 1"));
        }
        if self.transfer.read_timeout_per_interval_ms == 0 {
            return Err(anyhow!("transfer.read_timeout_per_interval_ms must be non-zero"));
        }
        if self.transfer.min_read_timeout_ms == 0 {
            return Err(anyhow!("transfer.min_read_timeout_ms must be non-zero"));
        }
        if self.transfer.write_timeout_ms == 0 {
            return Err(anyhow!("transfer.write_timeout_ms must be non-zero"));
        }

        Ok(())
    }

    /// Validate a USB device filter pattern (VID:PID)
    fn validate_filter(filter: &str) -> Result<()> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x0477:0x5620' or '0x0477:*')",
                filter
            ));
        }

        let (vid, pid) = (parts[0], parts[1]);
        if vid != "*" {
            Self::validate_hex_id(vid, "VID")?;
        }
        if pid != "*" {
            Self::validate_hex_id(pid, "PID")?;
        }

        Ok(())
    }

    fn validate_hex_id(id: &str, name: &str) -> Result<()> {
        let Some(hex_part) = id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) else {
            return Err(anyhow!(
                "Invalid {} '{}', must start with '0x' (e.g., '0x0477')",
                name,
                id
            ));
        };

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))?;

        Ok(())
    }

    /// Settings for the USB manager
    pub fn usb_settings(&self) -> UsbSettings {
        UsbSettings {
            id_table: self.usb.id_table.clone(),
            open: OpenOptions {
                interface: self.usb.interface,
                detach_kernel_driver: self.usb.detach_kernel_driver,
                max_pending_writes: self.usb.max_pending_writes,
                write_timeout: Duration::from_millis(self.transfer.write_timeout_ms),
            },
        }
    }

    pub fn transfer_timeouts(&self) -> TransferTimeouts {
        TransferTimeouts {
            per_interval: Duration::from_millis(self.transfer.read_timeout_per_interval_ms),
            min_read: Duration::from_millis(self.transfer.min_read_timeout_ms),
        }
    }
}

/// Load a config file given on the command line; `~` is expanded
pub fn load_config(path: &str) -> Result<DriverConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    DriverConfig::load(Some(path_buf))
}
