//! Cluster event log
//!
//! Operator-facing record of availability decisions: mode changes, data loss,
//! minority partitions and merges. Every entry is also emitted through `tracing`.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventLogLevel {
    Info,
    Warn,
    Error,
}

/// Area an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventLogCategory {
    /// Membership, availability and merge decisions
    Cluster,
    /// Partial transaction completion
    Transaction,
}

impl fmt::Display for EventLogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventLogCategory::Cluster => f.write_str("CLUSTER"),
            EventLogCategory::Transaction => f.write_str("TRANSACTION"),
        }
    }
}

/// A single logged event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: EventLogLevel,
    pub category: EventLogCategory,
    pub cache_name: String,
    pub message: String,
}

/// Sink for cluster events
pub trait EventLogger: Send + Sync {
    fn log(&self, level: EventLogLevel, category: EventLogCategory, cache_name: &str, message: String);

    fn info(&self, category: EventLogCategory, cache_name: &str, message: String) {
        self.log(EventLogLevel::Info, category, cache_name, message);
    }

    fn warn(&self, category: EventLogCategory, cache_name: &str, message: String) {
        self.log(EventLogLevel::Warn, category, cache_name, message);
    }

    fn error(&self, category: EventLogCategory, cache_name: &str, message: String) {
        self.log(EventLogLevel::Error, category, cache_name, message);
    }
}

/// Bounded in-memory event log; the oldest entries are dropped first
pub struct InMemoryEventLog {
    capacity: usize,
    entries: Mutex<VecDeque<EventLogEntry>>,
}

impl InMemoryEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Snapshot of all entries, oldest first
    pub fn entries(&self) -> Vec<EventLogEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Entries of one cache, oldest first
    pub fn entries_for(&self, cache_name: &str) -> Vec<EventLogEntry> {
        self.lock()
            .iter()
            .filter(|entry| entry.cache_name == cache_name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Export the log as a JSON array
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<EventLogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventLogger for InMemoryEventLog {
    fn log(&self, level: EventLogLevel, category: EventLogCategory, cache_name: &str, message: String) {
        match level {
            EventLogLevel::Info => tracing::info!(cache = cache_name, category = %category, "{}", message),
            EventLogLevel::Warn => tracing::warn!(cache = cache_name, category = %category, "{}", message),
            EventLogLevel::Error => tracing::error!(cache = cache_name, category = %category, "{}", message),
        }

        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(EventLogEntry {
            timestamp: Utc::now(),
            level,
            category,
            cache_name: cache_name.to_string(),
            message,
        });
    }
}
