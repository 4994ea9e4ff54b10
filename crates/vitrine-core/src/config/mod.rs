//! Configuration types for the Vitrine backend.
//!
//! Configuration is loaded from a single YAML file. Every field has a default,
//! so an empty document (or no file at all) yields a usable configuration:
//!
//! ```yaml
//! server:
//!   bind: "0.0.0.0:8080"
//! logging:
//!   level: info
//! audit:
//!   transport:
//!     max_redeliveries: 3
//!   store:
//!     backend: sqlite
//!     path: "sqlite://data/audit.db"
//! ```

pub mod audit;
pub mod server;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use audit::{
    AuditConfig, CaptureConfig, MAX_RETENTION_DAYS, RetentionConfig, StoreBackend, StoreConfig,
    TransportConfig,
};
pub use server::{LoggingConfig, ServerConfig};

/// Complete Vitrine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VitrineConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Audit pipeline settings.
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VitrineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // serde_yaml rejects a fully empty document as a struct
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let transport = &self.audit.transport;
        if transport.workers == 0 {
            return Err(ConfigError::Config(
                "audit.transport.workers must be at least 1".to_string(),
            ));
        }
        if transport.buffer_size == 0 {
            return Err(ConfigError::Config(
                "audit.transport.buffer_size must be at least 1".to_string(),
            ));
        }
        if transport.entity_destination == transport.auth_destination {
            return Err(ConfigError::Config(format!(
                "audit.transport destinations must differ (both are '{}')",
                transport.entity_destination
            )));
        }
        if transport.dead_letter_suffix.is_empty() {
            return Err(ConfigError::Config(
                "audit.transport.dead_letter_suffix must not be empty".to_string(),
            ));
        }
        if self.audit.retention.days > MAX_RETENTION_DAYS {
            return Err(ConfigError::Config(format!(
                "audit.retention.days must be at most {MAX_RETENTION_DAYS} (got {})",
                self.audit.retention.days
            )));
        }
        if self.audit.store.backend != StoreBackend::Memory && self.audit.store.path.is_none() {
            return Err(ConfigError::Config(format!(
                "audit.store.path is required for the {:?} backend",
                self.audit.store.backend
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config = VitrineConfig::from_yaml("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert!(config.audit.enabled);
        assert!(config.audit.transport.enabled);
        assert_eq!(config.audit.transport.max_redeliveries, 3);
        assert_eq!(config.audit.capture.user_agent_max_len, 500);
        assert_eq!(config.audit.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let yaml = r#"
audit:
  transport:
    enabled: false
    workers: 4
  store:
    backend: file
    path: /var/lib/vitrine/audit.log
"#;
        let config = VitrineConfig::from_yaml(yaml).unwrap();
        assert!(!config.audit.transport.enabled);
        assert_eq!(config.audit.transport.workers, 4);
        assert_eq!(config.audit.transport.entity_destination, "audit.entity");
        assert_eq!(config.audit.store.backend, StoreBackend::File);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_store_without_path() {
        let yaml = "audit:\n  store:\n    backend: sqlite\n";
        let err = VitrineConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Config(_)));
    }

    #[test]
    fn test_rejects_identical_destinations() {
        let yaml = r#"
audit:
  transport:
    entity_destination: audit
    auth_destination: audit
"#;
        assert!(VitrineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_retention() {
        let err = VitrineConfig::from_yaml("audit:\n  retention:\n    days: 100000000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Config(msg) if msg.contains("retention.days")));

        let yaml = format!("audit:\n  retention:\n    days: {MAX_RETENTION_DAYS}\n");
        assert!(VitrineConfig::from_yaml(&yaml).is_ok());
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  bind: \"127.0.0.1:9000\"").unwrap();

        let config = VitrineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");

        let defaults = VitrineConfig::load(None).unwrap();
        assert_eq!(defaults.server.bind, "0.0.0.0:8080");
    }
}
