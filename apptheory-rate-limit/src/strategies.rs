use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::entry::{fixed_window, format_window_id};
use crate::types::{RateLimitKey, TimeWindow, WindowConfig};

/// A windowing policy: which buckets to count for a given instant, the cap
/// for a key, and whether observed counts fit under that cap.
///
/// The capability methods below let the limiter stay strategy-agnostic:
/// `transactional` strategies increment every window atomically,
/// `counts_every_window` strategies record into every bucket, and
/// `current_count` picks the externally-reported count.
pub trait RateLimitStrategy: Send + Sync {
    fn calculate_windows(&self, now: DateTime<Utc>) -> Vec<TimeWindow>;
    fn get_limit(&self, key: &RateLimitKey) -> i64;
    fn should_allow(&self, counts: &HashMap<String, i64>, limit: i64) -> bool;

    /// Cap applying to one specific window; defaults to the key-wide limit.
    fn window_limit(&self, key: &RateLimitKey, _window: &TimeWindow) -> i64 {
        self.get_limit(key)
    }

    /// Whether `record_request` writes every calculated window.
    fn counts_every_window(&self) -> bool {
        false
    }

    /// The count reported back in decisions.
    fn current_count(&self, windows: &[TimeWindow], counts: &HashMap<String, i64>) -> i64 {
        windows
            .first()
            .and_then(|window| counts.get(&window.key))
            .copied()
            .unwrap_or(0)
    }

    /// Whether `check_and_increment` must use an all-or-nothing batch.
    fn transactional(&self) -> bool {
        false
    }
}

/// Single disjoint window of a fixed duration.
#[derive(Debug, Clone)]
pub struct FixedWindowStrategy {
    pub window_size_ms: i64,
    pub max_requests: i64,
    identifier_limits: HashMap<String, i64>,
    resource_limits: HashMap<String, i64>,
}

impl FixedWindowStrategy {
    pub fn new(window_size: Duration, max_requests: i64) -> Self {
        Self {
            window_size_ms: window_size.num_milliseconds(),
            max_requests,
            identifier_limits: HashMap::new(),
            resource_limits: HashMap::new(),
        }
    }

    pub fn set_identifier_limit(&mut self, identifier: impl Into<String>, limit: i64) {
        self.identifier_limits.insert(identifier.into(), limit);
    }

    pub fn set_resource_limit(&mut self, resource: impl Into<String>, limit: i64) {
        self.resource_limits.insert(resource.into(), limit);
    }
}

fn override_limit(
    identifier_limits: &HashMap<String, i64>,
    resource_limits: &HashMap<String, i64>,
    key: &RateLimitKey,
    fallback: i64,
) -> i64 {
    if let Some(limit) = identifier_limits.get(&key.identifier) {
        return *limit;
    }
    if let Some(limit) = resource_limits.get(&key.resource) {
        return *limit;
    }
    fallback
}

impl RateLimitStrategy for FixedWindowStrategy {
    fn calculate_windows(&self, now: DateTime<Utc>) -> Vec<TimeWindow> {
        if self.window_size_ms <= 0 {
            return Vec::new();
        }
        let window = fixed_window(now, self.window_size_ms);
        vec![TimeWindow {
            key: format_window_id(window.start),
            start: window.start,
            end: window.end,
        }]
    }

    fn get_limit(&self, key: &RateLimitKey) -> i64 {
        override_limit(
            &self.identifier_limits,
            &self.resource_limits,
            key,
            self.max_requests,
        )
    }

    fn should_allow(&self, counts: &HashMap<String, i64>, limit: i64) -> bool {
        counts.values().sum::<i64>() < limit
    }
}

/// Overlapping sub-buckets of width `granularity` covering the trailing
/// window; the effective count is the sum over buckets.
#[derive(Debug, Clone)]
pub struct SlidingWindowStrategy {
    pub window_size_ms: i64,
    pub max_requests: i64,
    pub granularity_ms: i64,
    identifier_limits: HashMap<String, i64>,
    resource_limits: HashMap<String, i64>,
}

impl SlidingWindowStrategy {
    pub fn new(window_size: Duration, max_requests: i64, granularity: Duration) -> Self {
        Self {
            window_size_ms: window_size.num_milliseconds(),
            max_requests,
            granularity_ms: granularity.num_milliseconds(),
            identifier_limits: HashMap::new(),
            resource_limits: HashMap::new(),
        }
    }

    pub fn set_identifier_limit(&mut self, identifier: impl Into<String>, limit: i64) {
        self.identifier_limits.insert(identifier.into(), limit);
    }

    pub fn set_resource_limit(&mut self, resource: impl Into<String>, limit: i64) {
        self.resource_limits.insert(resource.into(), limit);
    }
}

impl RateLimitStrategy for SlidingWindowStrategy {
    fn calculate_windows(&self, now: DateTime<Utc>) -> Vec<TimeWindow> {
        if self.window_size_ms <= 0 {
            return Vec::new();
        }
        let granularity_ms = if self.granularity_ms > 0 {
            self.granularity_ms
        } else {
            60_000
        };
        let sub_windows = (self.window_size_ms / granularity_ms).max(1);

        let now_ms = now.timestamp_millis();
        let current_start_ms = now_ms.div_euclid(granularity_ms) * granularity_ms;

        let mut windows = Vec::new();
        for i in 0..sub_windows {
            let start_ms = current_start_ms - i * granularity_ms;
            if now_ms - start_ms > self.window_size_ms {
                continue;
            }
            let start = Utc.timestamp_millis_opt(start_ms).unwrap();
            let end = Utc.timestamp_millis_opt(start_ms + granularity_ms).unwrap();
            windows.push(TimeWindow {
                key: format_window_id(start),
                start,
                end,
            });
        }
        windows
    }

    fn get_limit(&self, key: &RateLimitKey) -> i64 {
        override_limit(
            &self.identifier_limits,
            &self.resource_limits,
            key,
            self.max_requests,
        )
    }

    fn should_allow(&self, counts: &HashMap<String, i64>, limit: i64) -> bool {
        counts.values().sum::<i64>() < limit
    }

    fn current_count(&self, _windows: &[TimeWindow], counts: &HashMap<String, i64>) -> i64 {
        counts.values().sum()
    }
}

/// One fixed window per configured (duration, cap); a request is allowed
/// only when every window is simultaneously under its cap.
#[derive(Debug, Clone)]
pub struct MultiWindowStrategy {
    pub windows: Vec<WindowConfig>,
    identifier_limits: HashMap<String, Vec<WindowConfig>>,
    resource_limits: HashMap<String, Vec<WindowConfig>>,
}

impl MultiWindowStrategy {
    pub fn new(windows: Vec<WindowConfig>) -> Self {
        Self {
            windows,
            identifier_limits: HashMap::new(),
            resource_limits: HashMap::new(),
        }
    }

    pub fn set_identifier_limits(
        &mut self,
        identifier: impl Into<String>,
        windows: Vec<WindowConfig>,
    ) {
        self.identifier_limits.insert(identifier.into(), windows);
    }

    pub fn set_resource_limits(&mut self, resource: impl Into<String>, windows: Vec<WindowConfig>) {
        self.resource_limits.insert(resource.into(), windows);
    }

    fn limits_for_key(&self, key: &RateLimitKey) -> &[WindowConfig] {
        if let Some(limits) = self.identifier_limits.get(&key.identifier) {
            if !limits.is_empty() {
                return limits;
            }
        }
        if let Some(limits) = self.resource_limits.get(&key.resource) {
            if !limits.is_empty() {
                return limits;
            }
        }
        &self.windows
    }
}

impl RateLimitStrategy for MultiWindowStrategy {
    fn calculate_windows(&self, now: DateTime<Utc>) -> Vec<TimeWindow> {
        let mut out = Vec::new();
        for config in &self.windows {
            if config.duration_ms <= 0 {
                continue;
            }
            let window = fixed_window(now, config.duration_ms);
            out.push(TimeWindow {
                key: format!(
                    "{}_{}ms",
                    format_window_id(window.start),
                    config.duration_ms
                ),
                start: window.start,
                end: window.end,
            });
        }
        out
    }

    fn get_limit(&self, key: &RateLimitKey) -> i64 {
        self.limits_for_key(key)
            .first()
            .map(|config| config.max_requests)
            .unwrap_or(0)
    }

    fn should_allow(&self, counts: &HashMap<String, i64>, _limit: i64) -> bool {
        if self.windows.is_empty() {
            return false;
        }
        for config in &self.windows {
            if config.duration_ms <= 0 {
                continue;
            }
            let suffix = format!("_{}ms", config.duration_ms);
            let count = counts
                .iter()
                .find(|(key, _)| key.ends_with(&suffix))
                .map(|(_, count)| *count)
                .unwrap_or(0);
            if count >= config.max_requests {
                return false;
            }
        }
        true
    }

    /// The cap for a window is recovered from its `_<duration>ms` suffix.
    fn window_limit(&self, _key: &RateLimitKey, window: &TimeWindow) -> i64 {
        if let Some(idx) = window.key.rfind('_') {
            let suffix = window.key[idx + 1..].trim();
            if let Some(duration) = suffix.strip_suffix("ms") {
                if let Ok(duration_ms) = duration.parse::<i64>() {
                    if duration_ms > 0 {
                        for config in &self.windows {
                            if config.duration_ms == duration_ms {
                                return config.max_requests;
                            }
                        }
                    }
                }
            }
        }
        self.windows
            .first()
            .map(|config| config.max_requests)
            .unwrap_or(0)
    }

    fn counts_every_window(&self) -> bool {
        true
    }

    fn transactional(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 30).unwrap()
    }

    #[test]
    fn fixed_window_limits_and_overrides() {
        let mut fixed = FixedWindowStrategy::new(Duration::minutes(1), 3);
        fixed.set_identifier_limit("i1", 2);
        fixed.set_resource_limit("/r", 5);
        assert_eq!(fixed.get_limit(&RateLimitKey::new("i1", "/x", "GET")), 2);
        assert_eq!(fixed.get_limit(&RateLimitKey::new("i2", "/r", "GET")), 5);
        assert_eq!(fixed.get_limit(&RateLimitKey::new("i2", "/x", "GET")), 3);
        assert_eq!(fixed.calculate_windows(now()).len(), 1);
    }

    #[test]
    fn fixed_window_zero_limit_denies_everything() {
        let fixed = FixedWindowStrategy::new(Duration::minutes(1), 0);
        assert!(!fixed.should_allow(&HashMap::new(), 0));
    }

    #[test]
    fn sliding_window_covers_the_trailing_span() {
        let sliding = SlidingWindowStrategy::new(Duration::minutes(2), 10, Duration::minutes(1));
        let windows = sliding.calculate_windows(now());
        assert!(windows.len() >= 2);
        let counts: HashMap<String, i64> = windows
            .iter()
            .enumerate()
            .map(|(idx, window)| (window.key.clone(), idx as i64 + 1))
            .collect();
        assert_eq!(sliding.current_count(&windows, &counts), counts.values().sum::<i64>());
    }

    #[test]
    fn multi_window_keys_carry_duration_suffixes() {
        let multi = MultiWindowStrategy::new(vec![
            WindowConfig {
                duration_ms: 60_000,
                max_requests: 2,
            },
            WindowConfig {
                duration_ms: 3_600_000,
                max_requests: 10,
            },
        ]);
        let windows = multi.calculate_windows(now());
        assert_eq!(windows.len(), 2);
        assert!(windows[0].key.ends_with("_60000ms"));
        assert!(windows[1].key.ends_with("_3600000ms"));
        assert_eq!(multi.get_limit(&RateLimitKey::new("i1", "/r", "GET")), 2);
        assert_eq!(
            multi.window_limit(&RateLimitKey::new("i1", "/r", "GET"), &windows[1]),
            10
        );
    }

    #[test]
    fn multi_window_denies_when_any_window_is_full() {
        let multi = MultiWindowStrategy::new(vec![
            WindowConfig {
                duration_ms: 60_000,
                max_requests: 2,
            },
            WindowConfig {
                duration_ms: 3_600_000,
                max_requests: 10,
            },
        ]);
        let windows = multi.calculate_windows(now());
        let mut counts = HashMap::new();
        counts.insert(windows[0].key.clone(), 2);
        counts.insert(windows[1].key.clone(), 0);
        assert!(!multi.should_allow(&counts, 0));

        counts.insert(windows[0].key.clone(), 1);
        assert!(multi.should_allow(&counts, 0));
    }

    #[test]
    fn empty_multi_window_configuration_denies() {
        let multi = MultiWindowStrategy::new(Vec::new());
        assert!(!multi.should_allow(&HashMap::new(), 0));
        assert!(multi.calculate_windows(now()).is_empty());
    }
}
