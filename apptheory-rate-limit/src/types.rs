use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::entry::rate_limit_table_name;

/// Identifies one limited principal/resource/operation tuple. The first
/// three fields are required; metadata is carried onto first-write entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitKey {
    pub identifier: String,
    pub resource: String,
    pub operation: String,
    pub metadata: Option<BTreeMap<String, String>>,
}

impl RateLimitKey {
    pub fn new(
        identifier: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            resource: resource.into(),
            operation: operation.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Outcome of a limit check. `retry_after_ms` is populated only on denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitDecision {
    pub allowed: bool,
    pub current_count: i64,
    pub limit: i64,
    pub resets_at: DateTime<Utc>,
    pub retry_after_ms: Option<i64>,
}

/// Usage for one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageWindow {
    pub count: i64,
    pub limit: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Current usage snapshot for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageStats {
    pub identifier: String,
    pub resource: String,
    pub current_minute: UsageWindow,
    pub current_hour: UsageWindow,
    pub daily_total: i64,
    pub custom_windows: BTreeMap<String, UsageWindow>,
}

/// A counted time span. `key` names the store bucket; fixed strategies use
/// disjoint windows, sliding strategies overlapping sub-buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub key: String,
}

/// One (duration, cap) pair for the multi-window strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowConfig {
    pub duration_ms: i64,
    pub max_requests: i64,
}

/// Custom per-window override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowLimit {
    pub duration_ms: i64,
    pub requests: i64,
}

/// Per-identifier / per-resource limit override.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Limit {
    pub requests_per_hour: i64,
    pub requests_per_minute: i64,
    pub burst_capacity: i64,
    pub custom_windows: BTreeMap<String, WindowLimit>,
}

/// Limiter configuration. `fail_open` decides whether store outages become
/// allow-decisions or propagate as errors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_requests_per_hour: i64,
    pub default_requests_per_minute: i64,
    pub default_burst_capacity: i64,

    pub enable_burst_capacity: bool,
    pub enable_soft_limits: bool,
    pub fail_open: bool,

    pub table_name: String,
    pub consistent_read: bool,
    pub ttl_hours: i64,

    pub identifier_limits: HashMap<String, Limit>,
    pub resource_limits: HashMap<String, Limit>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_requests_per_hour: 1000,
            default_requests_per_minute: 100,
            default_burst_capacity: 10,
            enable_burst_capacity: false,
            enable_soft_limits: false,
            fail_open: true,
            table_name: "rate-limits".to_string(),
            consistent_read: false,
            ttl_hours: 1,
            identifier_limits: HashMap::new(),
            resource_limits: HashMap::new(),
        }
    }
}

impl Config {
    /// Default config with the table name resolved from the environment.
    pub fn from_env() -> Self {
        Self {
            table_name: rate_limit_table_name(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_open() {
        let config = Config::default();
        assert!(config.fail_open);
        assert_eq!(config.default_requests_per_hour, 1000);
        assert_eq!(config.default_requests_per_minute, 100);
        assert_eq!(config.table_name, "rate-limits");
        assert_eq!(config.ttl_hours, 1);
    }
}
