//! Metrics for partition handling
//!
//! Counters are kept locally in atomics and mirrored to the `metrics` facade,
//! so any installed recorder (Prometheus or otherwise) picks them up.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::partitionhandling::AvailabilityMode;

/// Operation rejected by an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOperation {
    Read,
    Write,
    Clear,
    BulkRead,
}

impl AdmissionOperation {
    fn as_str(&self) -> &'static str {
        match self {
            AdmissionOperation::Read => "read",
            AdmissionOperation::Write => "write",
            AdmissionOperation::Clear => "clear",
            AdmissionOperation::BulkRead => "bulk_read",
        }
    }
}

/// Partition handling counters of one cache
#[derive(Debug)]
pub struct PartitionMetrics {
    config: MetricsConfig,
    pub rejected_reads: AtomicU64,
    pub rejected_writes: AtomicU64,
    pub rejected_clears: AtomicU64,
    pub rejected_bulk_reads: AtomicU64,
    pub availability_changes: AtomicU64,
    pub partial_transactions_registered: AtomicU64,
    pub partial_transactions_completed: AtomicU64,
    pub partial_transactions_retained: AtomicU64,
    pub completion_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMetricsSummary {
    pub rejected_reads: u64,
    pub rejected_writes: u64,
    pub rejected_clears: u64,
    pub rejected_bulk_reads: u64,
    pub availability_changes: u64,
    pub partial_transactions_registered: u64,
    pub partial_transactions_completed: u64,
    pub partial_transactions_retained: u64,
    pub completion_failures: u64,
}

impl PartitionMetrics {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            rejected_reads: AtomicU64::new(0),
            rejected_writes: AtomicU64::new(0),
            rejected_clears: AtomicU64::new(0),
            rejected_bulk_reads: AtomicU64::new(0),
            availability_changes: AtomicU64::new(0),
            partial_transactions_registered: AtomicU64::new(0),
            partial_transactions_completed: AtomicU64::new(0),
            partial_transactions_retained: AtomicU64::new(0),
            completion_failures: AtomicU64::new(0),
        }
    }

    /// Record an operation refused by an admission check
    pub fn record_rejection(&self, cache_name: &str, operation: AdmissionOperation) {
        let counter = match operation {
            AdmissionOperation::Read => &self.rejected_reads,
            AdmissionOperation::Write => &self.rejected_writes,
            AdmissionOperation::Clear => &self.rejected_clears,
            AdmissionOperation::BulkRead => &self.rejected_bulk_reads,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if self.config.enabled {
            metrics::counter!(
                "partition_admission_rejections_total",
                1,
                "cache" => cache_name.to_string(),
                "operation" => operation.as_str()
            );
        }
    }

    /// Record an availability mode transition
    pub fn record_availability_change(&self, cache_name: &str, mode: AvailabilityMode) {
        self.availability_changes.fetch_add(1, Ordering::Relaxed);
        if self.config.enabled {
            metrics::counter!(
                "partition_availability_changes_total",
                1,
                "cache" => cache_name.to_string(),
                "mode" => mode.to_string()
            );
        }
    }

    /// Record a newly registered partial transaction
    pub fn record_partial_transaction(&self, cache_name: &str, kind: &'static str) {
        self.partial_transactions_registered.fetch_add(1, Ordering::Relaxed);
        if self.config.enabled {
            metrics::counter!(
                "partition_partial_transactions_total",
                1,
                "cache" => cache_name.to_string(),
                "kind" => kind
            );
        }
    }

    /// Record the outcome of a completion attempt
    pub fn record_completion(&self, cache_name: &str, completed: bool) {
        if completed {
            self.partial_transactions_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.partial_transactions_retained.fetch_add(1, Ordering::Relaxed);
        }
        if self.config.enabled {
            metrics::counter!(
                "partition_completion_attempts_total",
                1,
                "cache" => cache_name.to_string(),
                "completed" => completed.to_string()
            );
        }
    }

    /// Record a completion whose remote invocation failed
    pub fn record_completion_failure(&self, cache_name: &str) {
        self.completion_failures.fetch_add(1, Ordering::Relaxed);
        if self.config.enabled {
            metrics::counter!("partition_completion_failures_total", 1, "cache" => cache_name.to_string());
        }
    }

    pub fn summary(&self) -> PartitionMetricsSummary {
        PartitionMetricsSummary {
            rejected_reads: self.rejected_reads.load(Ordering::Relaxed),
            rejected_writes: self.rejected_writes.load(Ordering::Relaxed),
            rejected_clears: self.rejected_clears.load(Ordering::Relaxed),
            rejected_bulk_reads: self.rejected_bulk_reads.load(Ordering::Relaxed),
            availability_changes: self.availability_changes.load(Ordering::Relaxed),
            partial_transactions_registered: self.partial_transactions_registered.load(Ordering::Relaxed),
            partial_transactions_completed: self.partial_transactions_completed.load(Ordering::Relaxed),
            partial_transactions_retained: self.partial_transactions_retained.load(Ordering::Relaxed),
            completion_failures: self.completion_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for PartitionMetrics {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_counted_per_operation() {
        let metrics = PartitionMetrics::default();
        metrics.record_rejection("c", AdmissionOperation::Write);
        metrics.record_rejection("c", AdmissionOperation::Write);
        metrics.record_rejection("c", AdmissionOperation::Clear);

        let summary = metrics.summary();
        assert_eq!(summary.rejected_writes, 2);
        assert_eq!(summary.rejected_clears, 1);
        assert_eq!(summary.rejected_reads, 0);
    }

    #[test]
    fn test_completion_outcomes() {
        let mut config = MetricsConfig::default();
        config.enabled = false;
        let metrics = PartitionMetrics::new(config);
        metrics.record_partial_transaction("c", "commit_1pc");
        metrics.record_completion("c", false);
        metrics.record_completion("c", true);
        metrics.record_completion_failure("c");
        metrics.record_availability_change("c", AvailabilityMode::DegradedMode);

        let summary = metrics.summary();
        assert_eq!(summary.partial_transactions_registered, 1);
        assert_eq!(summary.partial_transactions_completed, 1);
        assert_eq!(summary.partial_transactions_retained, 1);
        assert_eq!(summary.completion_failures, 1);
        assert_eq!(summary.availability_changes, 1);
    }
}
