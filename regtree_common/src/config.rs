//! Configuration loading traits and types.
//!
//! Every regtree binary reads a TOML file. The pieces shared by all of
//! them live here: the `[shared]` section, the log level enum and the
//! blanket [`ConfigLoader`] trait.
//!
//! # Usage
//!
//! ```rust,no_run
//! use regtree_common::config::{ConfigError, ConfigLoader, SharedConfig};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct ServerConfig {
//!     shared: SharedConfig,
//!     bind: String,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = ServerConfig::load(Path::new("server.toml"))?;
//!     println!("{} listening on {}", config.shared.service_name, config.bind);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-transaction detail.
    Trace,
    /// Per-request detail.
    Debug,
    /// Lifecycle events.
    #[default]
    Info,
    /// Swallowed failures and verify mismatches.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// The `[shared]` section present in every regtree configuration file.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "regtree-test-stand"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance identifier, used in log lines.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the shared section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads any deserializable type from a TOML file or string.
///
/// # Contract
///
/// - `ConfigError::FileNotFound` if the file does not exist
/// - `ConfigError::ParseError` for I/O failures or invalid TOML
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(format!("{}: {}", path.display(), e))
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        shared: SharedConfig,
    }

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_log_level_directives() {
        assert_eq!(LogLevel::Trace.as_directive(), "trace");
        assert_eq!(LogLevel::Warn.as_directive(), "warn");
        assert_eq!(LogLevel::Error.as_directive(), "error");
    }

    #[test]
    fn test_log_level_parsed_lowercase() {
        let cfg = Wrapper::from_toml(
            "[shared]\nlog_level = \"debug\"\nservice_name = \"bench\"\n",
        )
        .unwrap();
        assert_eq!(cfg.shared.log_level, LogLevel::Debug);
        assert!(Wrapper::from_toml("[shared]\nlog_level = \"DEBUG\"\nservice_name = \"x\"\n").is_err());
    }

    #[test]
    fn test_shared_config_blank_service_name_rejected() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "   ".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = Wrapper::load(Path::new("/nonexistent/regtree/server.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[shared]\nservice_name = \"stand-01\"\n").unwrap();
        file.flush().unwrap();

        let config = Wrapper::load(file.path()).unwrap();
        assert_eq!(config.shared.service_name, "stand-01");
        assert_eq!(config.shared.log_level, LogLevel::Info);
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[shared").unwrap();

        let result = Wrapper::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
