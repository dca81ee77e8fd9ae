//! Tests for loading and saving cache configuration files

use std::io::Write;

use kv_cache_partition::config::{LogFormat, MergePolicy};
use kv_cache_partition::{CacheConfig, PartitionHandlingPolicy};
use tempfile::NamedTempFile;

mod file_tests {
    use super::*;

    #[test]
    fn test_toml_round_trip_through_file() {
        let mut config = CacheConfig::default();
        config.cache_name = "orders".to_string();
        config.partition_handling.when_split = PartitionHandlingPolicy::AllowReads;
        config.partition_handling.merge_policy = MergePolicy::RemoveAll;
        config.transaction.versioned = true;

        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();
        let loaded = CacheConfig::from_file(file.path()).unwrap();

        assert_eq!(loaded.cache_name, "orders");
        assert_eq!(loaded.partition_handling.when_split, PartitionHandlingPolicy::AllowReads);
        assert_eq!(loaded.partition_handling.merge_policy, MergePolicy::RemoveAll);
        assert!(loaded.transaction.versioned);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_yaml_file() {
        let yaml = r#"
cache_name: sessions
clustering:
  num_owners: 3
  num_segments: 64
  capacity_factor: 1.0
partition_handling:
  when_split: DENY_READ_WRITES
  merge_policy: PREFER_NON_NULL
transaction:
  versioned: false
logging:
  level: Debug
  format: Json
  file_path: null
  console: true
metrics:
  enabled: false
  labels:
    region: eu
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = CacheConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.cache_name, "sessions");
        assert_eq!(config.clustering.num_owners, 3);
        assert_eq!(config.partition_handling.when_split, PartitionHandlingPolicy::DenyReadWrites);
        assert_eq!(config.partition_handling.merge_policy, MergePolicy::PreferNonNull);
        assert!(matches!(config.logging.format, LogFormat::Json));
        assert_eq!(config.metrics.labels.get("region").map(String::as_str), Some("eu"));
        assert!(config.resolve_conflicts_on_merge());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CacheConfig::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_policy_parses_from_cli_style_strings() {
        assert_eq!(
            "deny-read-writes".parse::<PartitionHandlingPolicy>().unwrap(),
            PartitionHandlingPolicy::DenyReadWrites
        );
        assert!("sometimes".parse::<PartitionHandlingPolicy>().is_err());
    }
}
