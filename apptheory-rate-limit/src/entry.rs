use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// One stored counter bucket. Attribute names match the wire encoding of
/// the key-value store; `PK`/`SK` are derived deterministically from the
/// key fields via [`RateLimitEntry::set_keys`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
    #[serde(rename = "Identifier")]
    pub identifier: String,
    #[serde(rename = "Resource")]
    pub resource: String,
    #[serde(rename = "Operation")]
    pub operation: String,
    #[serde(rename = "WindowStart")]
    pub window_start: i64,
    #[serde(rename = "WindowType")]
    pub window_type: String,
    #[serde(rename = "WindowID")]
    pub window_id: String,
    #[serde(rename = "Count")]
    pub count: i64,
    #[serde(rename = "TTL")]
    pub ttl: i64,
    #[serde(rename = "CreatedAt")]
    pub created_at: String,
    #[serde(rename = "UpdatedAt")]
    pub updated_at: String,
    #[serde(rename = "Metadata")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl RateLimitEntry {
    /// Derive `PK`/`SK` from the key fields:
    /// `<identifier>#<window_start>` / `<resource>#<operation>`.
    pub fn set_keys(&mut self) {
        self.pk = format!("{}#{}", self.identifier, self.window_start);
        self.sk = format!("{}#{}", self.resource, self.operation);
    }
}

/// Store table name, resolved through the environment override chain.
pub fn rate_limit_table_name() -> String {
    for key in [
        "APPTHEORY_RATE_LIMIT_TABLE_NAME",
        "RATE_LIMIT_TABLE_NAME",
        "RATE_LIMIT_TABLE",
        "LIMITED_TABLE_NAME",
    ] {
        if let Ok(value) = std::env::var(key) {
            let value = value.trim().to_string();
            if !value.is_empty() {
                return value;
            }
        }
    }
    "rate-limits".to_string()
}

/// A well-known counting span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub window_type: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub fn unix_seconds(value: DateTime<Utc>) -> i64 {
    value.timestamp()
}

/// Second-precision window identifier (`2026-01-01T00:01:00Z`).
pub fn format_window_id(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Nanosecond-precision timestamp with a `Z` suffix, as stored in
/// `CreatedAt`/`UpdatedAt`.
pub fn format_rfc3339_nano(value: DateTime<Utc>) -> String {
    format!(
        "{}.{:06}000Z",
        value.format("%Y-%m-%dT%H:%M:%S"),
        value.timestamp_subsec_micros()
    )
}

pub fn minute_window(now: DateTime<Utc>) -> RateLimitWindow {
    let start = now.with_second(0).unwrap().with_nanosecond(0).unwrap();
    RateLimitWindow {
        window_type: "MINUTE".to_string(),
        start,
        end: start + Duration::minutes(1),
    }
}

pub fn hour_window(now: DateTime<Utc>) -> RateLimitWindow {
    let start = now
        .with_minute(0)
        .unwrap()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap();
    RateLimitWindow {
        window_type: "HOUR".to_string(),
        start,
        end: start + Duration::hours(1),
    }
}

pub fn day_window(now: DateTime<Utc>) -> RateLimitWindow {
    let start = now
        .with_hour(0)
        .unwrap()
        .with_minute(0)
        .unwrap()
        .with_second(0)
        .unwrap()
        .with_nanosecond(0)
        .unwrap();
    RateLimitWindow {
        window_type: "DAY".to_string(),
        start,
        end: start + Duration::days(1),
    }
}

/// The fixed window of width `duration_ms` containing `now`, aligned to
/// multiples of the duration since the epoch.
pub fn fixed_window(now: DateTime<Utc>, duration_ms: i64) -> RateLimitWindow {
    if duration_ms <= 0 {
        return RateLimitWindow {
            window_type: "CUSTOM_0ms".to_string(),
            start: now,
            end: now,
        };
    }

    let now_ms = now.timestamp_millis();
    let start_ms = now_ms.div_euclid(duration_ms) * duration_ms;
    RateLimitWindow {
        window_type: format!("CUSTOM_{duration_ms}ms"),
        start: Utc.timestamp_millis_opt(start_ms).unwrap(),
        end: Utc.timestamp_millis_opt(start_ms + duration_ms).unwrap(),
    }
}
