//! Driver configuration types.
//!
//! - `LauncherConfig` - Top-level file (`launcher.toml`)
//! - `DriverConfig` - Timeouts and limits of the driver core
//!
//! Backend-specific tables live under `[transport.<name>]` and are
//! deserialized by the backend itself.

use crate::config::{ConfigError, SharedConfig};
use crate::usb::consts::{
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_DRAIN_TIMEOUT_MS, DEFAULT_MAX_DEVICES,
    DEFAULT_STATUS_BUFFER_SIZE, STATUS_MIN_LEN,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_MS
}

fn default_status_buffer_size() -> usize {
    DEFAULT_STATUS_BUFFER_SIZE
}

fn default_max_devices() -> usize {
    DEFAULT_MAX_DEVICES
}

/// Timeouts and limits of the driver core.
///
/// # TOML Example
///
/// ```toml
/// [driver]
/// command_timeout_ms = 5000
/// drain_timeout_ms = 1000
/// status_buffer_size = 8
/// max_devices = 16
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Blocking timeout of one command transfer.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Bounded wait of a drain before outstanding transfers are force-cancelled.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Receive buffer of the status poll. Must hold the two limit bytes.
    #[serde(default = "default_status_buffer_size")]
    pub status_buffer_size: usize,

    /// Number of device minors available.
    #[serde(default = "default_max_devices")]
    pub max_devices: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            status_buffer_size: default_status_buffer_size(),
            max_devices: default_max_devices(),
        }
    }
}

impl DriverConfig {
    /// Command transfer timeout.
    #[inline]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Drain timeout.
    #[inline]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Validate the driver configuration.
    ///
    /// # Validation Rules
    /// 1. `command_timeout_ms` > 0
    /// 2. `drain_timeout_ms` > 0
    /// 3. `status_buffer_size` >= 2
    /// 4. `max_devices` >= 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "command_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.drain_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "drain_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.status_buffer_size < STATUS_MIN_LEN {
            return Err(ConfigError::ValidationError(format!(
                "status_buffer_size must be at least {} (got {})",
                STATUS_MIN_LEN, self.status_buffer_size
            )));
        }

        if self.max_devices == 0 {
            return Err(ConfigError::ValidationError(
                "max_devices must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Main configuration loaded from `launcher.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Logging and instance naming.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Driver core settings.
    #[serde(default)]
    pub driver: DriverConfig,

    /// Per-backend configuration sections.
    /// Key = backend name, Value = backend-specific TOML table.
    #[serde(default)]
    pub transport: HashMap<String, toml::Value>,
}

impl LauncherConfig {
    /// Validate shared and driver sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.driver.validate()
    }

    /// Deserialize the `[transport.<name>]` table, or the backend default if absent.
    pub fn transport_config<T>(&self, name: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        match self.transport.get(name) {
            Some(value) => value.clone().try_into().map_err(|e| {
                ConfigError::ParseError(format!("[transport.{name}]: {e}"))
            }),
            None => Ok(T::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLoader, LogLevel};

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct BackendConfig {
        #[serde(default)]
        poll_interval_ms: u64,
    }

    #[test]
    fn test_driver_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.command_timeout(), Duration::from_millis(5000));
        assert_eq!(config.drain_timeout(), Duration::from_millis(1000));
        assert_eq!(config.status_buffer_size, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_driver_validation() {
        let mut config = DriverConfig {
            status_buffer_size: 1,
            ..DriverConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("status_buffer_size")
        ));

        config.status_buffer_size = 2;
        config.drain_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.drain_timeout_ms = 10;
        config.max_devices = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_full_file_parse() {
        let config = LauncherConfig::from_toml(
            r#"
[shared]
log_level = "debug"
service_name = "bench"

[driver]
command_timeout_ms = 250

[transport.simulation]
poll_interval_ms = 4
"#,
        )
        .unwrap();

        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.driver.command_timeout_ms, 250);
        assert_eq!(config.driver.drain_timeout_ms, 1000);
        assert!(config.validate().is_ok());

        let backend: BackendConfig = config.transport_config("simulation").unwrap();
        assert_eq!(backend.poll_interval_ms, 4);
        let missing: BackendConfig = config.transport_config("libusb").unwrap();
        assert_eq!(missing, BackendConfig::default());
    }

    #[test]
    fn test_bad_transport_table() {
        let config = LauncherConfig::from_toml(
            r#"
[transport.simulation]
poll_interval_ms = "fast"
"#,
        )
        .unwrap();
        let result: Result<BackendConfig, _> = config.transport_config("simulation");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
