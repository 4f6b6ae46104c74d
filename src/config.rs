//! Compiler configuration
//!
//! Loaded from a JSON file; every key is optional.
//!
//! ```json
//! { "field_batch_size": 30, "default_timezone": "Europe/Paris", "log_level": "WARN" }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::{log_event_with_fields, Event, Logger, Severity};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON in '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown timezone '{0}'")]
    InvalidTimezone(String),

    #[error("Unknown log level '{0}', expected TRACE, INFO, WARN, ERROR or FATAL")]
    InvalidLogLevel(String),

    #[error("field_batch_size must be > 0")]
    InvalidBatchSize,
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Io { .. } => "DQ_CONFIG_IO",
            ConfigError::Parse { .. } => "DQ_CONFIG_PARSE",
            ConfigError::InvalidTimezone(_) => "DQ_CONFIG_TIMEZONE",
            ConfigError::InvalidLogLevel(_) => "DQ_CONFIG_LOG_LEVEL",
            ConfigError::InvalidBatchSize => "DQ_CONFIG_BATCH_SIZE",
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Maximum number of fields per `$addFields` stage
    #[serde(default = "default_field_batch_size")]
    pub field_batch_size: usize,

    /// IANA name used when a query does not carry a timezone
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Minimum log severity
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_field_batch_size() -> usize {
    30
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            field_batch_size: default_field_batch_size(),
            default_timezone: default_timezone(),
            log_level: default_log_level(),
        }
    }
}

impl CompilerConfig {
    pub fn with_field_batch_size(mut self, size: usize) -> Self {
        self.field_batch_size = size;
        self
    }

    pub fn with_default_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = timezone.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CompilerConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;

        let path_str = path.display().to_string();
        log_event_with_fields(Event::ConfigLoaded, &[("path", &path_str)]);
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.field_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        self.timezone()?;
        self.severity()?;
        Ok(())
    }

    pub fn timezone(&self) -> ConfigResult<Tz> {
        parse_timezone(&self.default_timezone)
    }

    pub fn severity(&self) -> ConfigResult<Severity> {
        Severity::from_name(&self.log_level)
            .ok_or_else(|| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }

    /// Applies `log_level` to the process-wide logger
    pub fn apply_log_level(&self) -> ConfigResult<()> {
        Logger::set_min_severity(self.severity()?);
        Ok(())
    }
}

/// Parses an IANA timezone name
pub fn parse_timezone(name: &str) -> ConfigResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::InvalidTimezone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = CompilerConfig::default();
        assert_eq!(config.field_batch_size, 30);
        assert_eq!(config.timezone().unwrap(), Tz::UTC);
        assert_eq!(config.severity().unwrap(), Severity::Info);
    }

    #[test]
    fn test_load_partial_file() {
        let file = write_config(r#"{"default_timezone": "Europe/Paris"}"#);
        let config = CompilerConfig::load(file.path()).unwrap();
        assert_eq!(config.field_batch_size, 30);
        assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::Paris);
    }

    #[test]
    fn test_invalid_values() {
        let file = write_config(r#"{"default_timezone": "Mars/Olympus"}"#);
        let err = CompilerConfig::load(file.path()).unwrap_err();
        assert_eq!(err.code(), "DQ_CONFIG_TIMEZONE");

        let file = write_config(r#"{"field_batch_size": 0}"#);
        assert!(matches!(
            CompilerConfig::load(file.path()),
            Err(ConfigError::InvalidBatchSize)
        ));

        let file = write_config(r#"{"log_level": "LOUD"}"#);
        assert_eq!(CompilerConfig::load(file.path()).unwrap_err().code(), "DQ_CONFIG_LOG_LEVEL");
    }

    #[test]
    fn test_missing_or_broken_file() {
        let err = CompilerConfig::load(Path::new("/nonexistent/docquery.json")).unwrap_err();
        assert_eq!(err.code(), "DQ_CONFIG_IO");

        let file = write_config("{not json");
        assert_eq!(CompilerConfig::load(file.path()).unwrap_err().code(), "DQ_CONFIG_PARSE");
    }

    #[test]
    fn test_builder() {
        let config = CompilerConfig::default()
            .with_field_batch_size(2)
            .with_default_timezone("America/New_York")
            .with_log_level("warn");
        assert!(config.validate().is_ok());
        assert_eq!(config.severity().unwrap(), Severity::Warn);
    }
}
