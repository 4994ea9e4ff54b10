//! Shared configuration for the Vitrine backend.
//!
//! Every crate in the workspace reads its settings from [`VitrineConfig`],
//! loaded once from a YAML file at startup.

pub mod config;

pub use config::{
    AuditConfig, CaptureConfig, ConfigError, LoggingConfig, MAX_RETENTION_DAYS, RetentionConfig,
    ServerConfig, StoreBackend, StoreConfig, TransportConfig, VitrineConfig,
};
