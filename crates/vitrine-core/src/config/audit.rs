//! Audit pipeline configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the audit pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audited operations are captured at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Capture-side settings.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Message transport between capture and persistence.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Durable store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Age-based retention of durable records.
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capture: CaptureConfig::default(),
            transport: TransportConfig::default(),
            store: StoreConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

/// Capture-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Maximum number of characters kept from the User-Agent header.
    #[serde(default = "default_user_agent_max_len")]
    pub user_agent_max_len: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            user_agent_max_len: default_user_agent_max_len(),
        }
    }
}

/// Transport (queue) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// When false, envelopes go to a no-op publisher and nothing is persisted.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Destination for entity-mutation envelopes.
    #[serde(default = "default_entity_destination")]
    pub entity_destination: String,

    /// Destination for authentication envelopes.
    #[serde(default = "default_auth_destination")]
    pub auth_destination: String,

    /// Suffix appended to a destination name to form its dead-letter destination.
    #[serde(default = "default_dead_letter_suffix")]
    pub dead_letter_suffix: String,

    /// Capacity of each destination queue.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Consumer workers per destination.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Redeliveries after the first failed attempt before dead-lettering.
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,

    /// Delay before a failed message is redelivered.
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,

    /// Per-message processing budget for the consumer.
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,
}

impl TransportConfig {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entity_destination: default_entity_destination(),
            auth_destination: default_auth_destination(),
            dead_letter_suffix: default_dead_letter_suffix(),
            buffer_size: default_buffer_size(),
            workers: default_workers(),
            max_redeliveries: default_max_redeliveries(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
            processing_timeout_ms: default_processing_timeout_ms(),
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Storage backend type.
    #[serde(default)]
    pub backend: StoreBackend,

    /// File path (file backend) or database URL (sqlite backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// Storage backend type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Keep records in process memory.
    #[default]
    Memory,
    /// Append JSON Lines to a file.
    File,
    /// Store in a SQLite database.
    Sqlite,
}

/// Longest accepted retention window, about a century.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Age-based retention of durable records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Records older than this many days are purged. Zero disables retention.
    #[serde(default = "default_retention_days")]
    pub days: u32,

    /// How often the retention sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl RetentionConfig {
    pub fn is_enabled(&self) -> bool {
        self.days > 0
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_user_agent_max_len() -> usize {
    500
}

fn default_entity_destination() -> String {
    "audit.entity".to_string()
}

fn default_auth_destination() -> String {
    "audit.auth".to_string()
}

fn default_dead_letter_suffix() -> String {
    ".dlq".to_string()
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_workers() -> usize {
    2
}

fn default_max_redeliveries() -> u32 {
    3
}

fn default_redelivery_delay_ms() -> u64 {
    200
}

fn default_processing_timeout_ms() -> u64 {
    5_000
}

fn default_retention_days() -> u32 {
    365
}

fn default_sweep_interval_secs() -> u64 {
    3_600
}
