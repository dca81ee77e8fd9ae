//! Configuration for partition handling
//!
//! Per-cache settings loaded from TOML or YAML files with serde. The partition
//! handling policy is fixed once the cache starts.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::partitionhandling::PartitionHandlingPolicy;

/// Main configuration structure for one clustered cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache name
    pub cache_name: String,
    /// Segment and owner layout
    pub clustering: ClusteringConfig,
    /// Split-brain behaviour
    pub partition_handling: PartitionHandlingConfig,
    /// Transaction settings
    pub transaction: TransactionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Segment and owner layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Copies of each segment
    pub num_owners: usize,
    /// Number of hash segments
    pub num_segments: usize,
    /// Relative share of segments owned by this node
    pub capacity_factor: f32,
}

/// Partition handling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionHandlingConfig {
    /// What the cache may still do while split
    pub when_split: PartitionHandlingPolicy,
    /// How conflicting entries are merged after a split heals
    pub merge_policy: MergePolicy,
}

/// Entry merge policy applied by the conflict manager after a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergePolicy {
    /// Do not resolve conflicts
    None,
    /// Keep the value from the preferred partition
    PreferConsistency,
    /// Keep any non-null value, preferring the preferred partition
    PreferNonNull,
    /// Remove every conflicting entry
    RemoveAll,
    /// Application supplied policy, referenced by name
    Custom(String),
}

/// Transaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Entries carry versions; completion uses versioned commands
    pub versioned: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Log format
    pub format: LogFormat,
    /// Log directory for daily rotated files (optional)
    pub file_path: Option<String>,
    /// Enable console output
    pub console: bool,
}

/// Log level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Log format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    /// Simple text format
    Simple,
    /// JSON format
    Json,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics
    pub enabled: bool,
    /// Custom labels
    pub labels: HashMap<String, String>,
}

impl CacheConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: CacheConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: CacheConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.cache_name.is_empty() {
            errors.push("Cache name cannot be empty".to_string());
        }
        if self.clustering.num_owners == 0 {
            errors.push("Number of owners cannot be 0".to_string());
        }
        if self.clustering.num_segments == 0 {
            errors.push("Number of segments cannot be 0".to_string());
        }
        if self.clustering.capacity_factor < 0.0 {
            errors.push("Capacity factor cannot be negative".to_string());
        }
        if let MergePolicy::Custom(name) = &self.partition_handling.merge_policy {
            if name.is_empty() {
                errors.push("Custom merge policy needs a name".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Whether conflicting entries are resolved after a merge
    pub fn resolve_conflicts_on_merge(&self) -> bool {
        self.partition_handling.merge_policy != MergePolicy::None
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_name: "default".to_string(),
            clustering: ClusteringConfig::default(),
            partition_handling: PartitionHandlingConfig::default(),
            transaction: TransactionConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            num_owners: 2,
            num_segments: 256,
            capacity_factor: 1.0,
        }
    }
}

impl Default for PartitionHandlingConfig {
    fn default() -> Self {
        Self {
            when_split: PartitionHandlingPolicy::AllowReadWrites,
            merge_policy: MergePolicy::PreferConsistency,
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self { versioned: false }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Simple,
            file_path: None,
            console: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            labels: HashMap::new(),
        }
    }
}
