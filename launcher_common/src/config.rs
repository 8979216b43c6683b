//! Configuration loading.
//!
//! `launcherctl` and the tests read one TOML file (`launcher.toml`). Any
//! `Deserialize` type gets [`ConfigLoader::load`] for free; semantic checks
//! stay in each struct's `validate()`.
//!
//! ```rust,no_run
//! use launcher_common::config::{ConfigError, ConfigLoader};
//! use launcher_common::usb::config::LauncherConfig;
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = LauncherConfig::load(Path::new("config/launcher.toml"))?;
//!     config.validate()?;
//!     println!("command timeout: {:?}", config.driver.command_timeout());
//!     Ok(())
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a configuration could not be loaded or was refused.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("config file {} not found", .0.display())]
    FileNotFound(PathBuf),

    /// The file could not be read or is not valid TOML for the target type.
    #[error("invalid launcher config: {0}")]
    ParseError(String),

    /// Parsed, but a value is out of range.
    #[error("launcher config rejected: {0}")]
    ValidationError(String),
}

/// Default verbosity of the `tracing` subscriber.
///
/// Written in lowercase in TOML (`log_level = "debug"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-transfer tracing, including every status poll.
    Trace,
    /// Command frames, corrections and lifecycle transitions.
    Debug,
    /// Attach, disconnect and other device-level events.
    #[default]
    Info,
    /// Recoverable transport faults.
    Warn,
    /// Failures that leave a session unusable.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn default_service_name() -> String {
    "launcher".to_string()
}

/// `[shared]` table: logging and instance naming.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "launcher-bench-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Default log level when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Name printed in the startup banner.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Refuse a blank `service_name`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "shared.service_name is blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// TOML loading for any deserializable configuration type.
///
/// A missing file is `FileNotFound`; unreadable or malformed content is
/// `ParseError`. Nothing is validated here.
pub trait ConfigLoader: Sized + DeserializeOwned {
    /// Read and parse `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
            _ => ConfigError::ParseError(format!("{}: {e}", path.display())),
        })?;
        Self::from_toml(&content)
    }

    /// Parse an in-memory TOML document.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: DeserializeOwned> ConfigLoader for T {}
