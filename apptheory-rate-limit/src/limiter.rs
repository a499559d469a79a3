use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use apptheory_core::clock::{Clock, SystemClock};

use crate::entry::{
    format_rfc3339_nano, format_window_id, hour_window, minute_window, unix_seconds,
    RateLimitEntry,
};
use crate::errors::{new_error, wrap_error, ErrorKind, RateLimiterError};
use crate::store::{EntryInit, EntryStore, StoreError, UpdateCondition, UpdateSpec};
use crate::strategies::{FixedWindowStrategy, RateLimitStrategy};
use crate::types::{Config, LimitDecision, RateLimitKey, TimeWindow, UsageStats, UsageWindow};

fn normalize_key(key: &RateLimitKey) -> RateLimitKey {
    RateLimitKey {
        identifier: key.identifier.trim().to_string(),
        resource: key.resource.trim().to_string(),
        operation: key.operation.trim().to_string(),
        metadata: key.metadata.clone(),
    }
}

fn validate_key(key: &RateLimitKey) -> Result<(), RateLimiterError> {
    if key.identifier.is_empty() {
        return Err(new_error(ErrorKind::InvalidInput, "identifier is required"));
    }
    if key.resource.is_empty() {
        return Err(new_error(ErrorKind::InvalidInput, "resource is required"));
    }
    if key.operation.is_empty() {
        return Err(new_error(ErrorKind::InvalidInput, "operation is required"));
    }
    Ok(())
}

/// Blank keys are dropped; keys are trimmed. Convergent.
fn sanitize_metadata(metadata: &Option<BTreeMap<String, String>>) -> Option<BTreeMap<String, String>> {
    metadata.as_ref().map(|map| {
        map.iter()
            .filter_map(|(key, value)| {
                let key = key.trim();
                if key.is_empty() {
                    None
                } else {
                    Some((key.to_string(), value.clone()))
                }
            })
            .collect()
    })
}

fn millis_until(resets_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (resets_at - now).num_milliseconds().max(0)
}

fn entry_keys(key: &RateLimitKey, window_start: DateTime<Utc>) -> (String, String) {
    let mut entry = RateLimitEntry {
        identifier: key.identifier.clone(),
        resource: key.resource.clone(),
        operation: key.operation.clone(),
        window_start: unix_seconds(window_start),
        ..Default::default()
    };
    entry.set_keys();
    (entry.pk, entry.sk)
}

/// Distributed rate limiter over a conditional key-value store.
///
/// All consistency comes from the store: mutations are conditional updates
/// or all-or-nothing transactions, so concurrent callers for one key
/// serialize through the store and the limiter never over-admits.
pub struct RateLimiter {
    store: Arc<dyn EntryStore>,
    config: Config,
    strategy: Arc<dyn RateLimitStrategy>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn EntryStore>) -> Self {
        let config = Config::default();
        let strategy = Arc::new(FixedWindowStrategy::new(
            Duration::hours(1),
            config.default_requests_per_hour,
        ));
        Self {
            store,
            config,
            strategy,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn RateLimitStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn windows(&self, now: DateTime<Utc>) -> Result<Vec<TimeWindow>, RateLimiterError> {
        let windows = self.strategy.calculate_windows(now);
        if windows.is_empty() {
            return Err(new_error(ErrorKind::InternalError, "no windows calculated"));
        }
        Ok(windows)
    }

    fn entry_init(&self, key: &RateLimitKey, window: &TimeWindow, now_str: &str) -> EntryInit {
        EntryInit {
            identifier: key.identifier.clone(),
            resource: key.resource.clone(),
            operation: key.operation.clone(),
            window_start: unix_seconds(window.start),
            window_type: window.key.clone(),
            window_id: format_window_id(window.start),
            ttl: unix_seconds(window.end) + self.config.ttl_hours * 3600,
            created_at: now_str.to_string(),
            metadata: sanitize_metadata(&key.metadata),
        }
    }

    /// Denied decisions carry the latest reset among exceeded windows for
    /// transactional strategies; everything else resets at the primary
    /// window's end.
    fn reset_time(
        &self,
        key: &RateLimitKey,
        windows: &[TimeWindow],
        counts: &HashMap<String, i64>,
        allowed: bool,
    ) -> DateTime<Utc> {
        let primary_end = windows[0].end;
        if allowed || !self.strategy.transactional() {
            return primary_end;
        }

        let mut max_reset = primary_end;
        for window in windows {
            let max_allowed = self.strategy.window_limit(key, window);
            if max_allowed <= 0 {
                max_reset = max_reset.max(window.end);
                continue;
            }
            let count = counts.get(&window.key).copied().unwrap_or(0);
            if count >= max_allowed {
                max_reset = max_reset.max(window.end);
            }
        }
        max_reset
    }

    /// Read-only check: counts every window and evaluates the strategy.
    /// Store failures allow the request when `fail_open` is set.
    pub async fn check_limit(&self, key: &RateLimitKey) -> Result<LimitDecision, RateLimiterError> {
        let key = normalize_key(key);
        validate_key(&key)?;

        let now = self.clock.now();
        let windows = self.windows(now)?;

        let keys: Vec<(String, String)> = windows
            .iter()
            .map(|window| entry_keys(&key, window.start))
            .collect();

        let items = match self
            .store
            .batch_get(&keys, self.config.consistent_read)
            .await
        {
            Ok(items) => items,
            Err(err) => {
                if self.config.fail_open {
                    tracing::warn!(%err, "rate limit check failed open");
                    return Ok(LimitDecision {
                        allowed: true,
                        current_count: 0,
                        limit: self.strategy.get_limit(&key),
                        resets_at: windows[0].end,
                        retry_after_ms: None,
                    });
                }
                return Err(wrap_error(
                    err,
                    ErrorKind::InternalError,
                    "failed to check rate limit",
                ));
            }
        };

        let by_key: HashMap<(String, String), &RateLimitEntry> = items
            .iter()
            .map(|item| ((item.pk.clone(), item.sk.clone()), item))
            .collect();

        let mut counts = HashMap::new();
        for (window, window_keys) in windows.iter().zip(keys.iter()) {
            let count = by_key.get(window_keys).map(|item| item.count).unwrap_or(0);
            counts.insert(window.key.clone(), count);
        }

        let limit = self.strategy.get_limit(&key);
        let allowed = self.strategy.should_allow(&counts, limit);
        let current_count = self.strategy.current_count(&windows, &counts);
        let resets_at = self.reset_time(&key, &windows, &counts, allowed);
        let retry_after_ms = if allowed {
            None
        } else {
            Some(millis_until(resets_at, now))
        };

        Ok(LimitDecision {
            allowed,
            current_count,
            limit,
            resets_at,
            retry_after_ms,
        })
    }

    /// Non-atomic ADD on the primary window (every window for
    /// multi-window strategies), initializing entry metadata on first
    /// write.
    pub async fn record_request(&self, key: &RateLimitKey) -> Result<(), RateLimiterError> {
        let key = normalize_key(key);
        validate_key(&key)?;

        let now = self.clock.now();
        let windows = self.windows(now)?;
        let now_str = format_rfc3339_nano(now);

        let targets: Vec<&TimeWindow> = if self.strategy.counts_every_window() {
            windows.iter().collect()
        } else {
            windows.iter().take(1).collect()
        };

        for window in targets {
            let (pk, sk) = entry_keys(&key, window.start);
            let spec = UpdateSpec {
                pk,
                sk,
                add_count: 1,
                updated_at: now_str.clone(),
                init: Some(self.entry_init(&key, window, &now_str)),
                condition: UpdateCondition::None,
            };
            self.store.update(spec).await.map_err(|err| {
                wrap_error(err, ErrorKind::InternalError, "failed to record request")
            })?;
        }
        Ok(())
    }

    /// Atomic check-and-increment: never admits more than the limit across
    /// concurrent callers for one key and window.
    pub async fn check_and_increment(
        &self,
        key: &RateLimitKey,
    ) -> Result<LimitDecision, RateLimiterError> {
        let key = normalize_key(key);
        validate_key(&key)?;

        if self.strategy.transactional() {
            let now = self.clock.now();
            return self.check_and_increment_transactional(&key, now).await;
        }

        // The put-if-absent race retries the whole operation with a fresh
        // clock reading.
        loop {
            let now = self.clock.now();
            match self.check_and_increment_single(&key, now).await? {
                Some(decision) => return Ok(decision),
                None => continue,
            }
        }
    }

    async fn check_and_increment_single(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
    ) -> Result<Option<LimitDecision>, RateLimiterError> {
        let windows = self.windows(now)?;
        let window = &windows[0];
        let limit = self.strategy.get_limit(key);
        let (pk, sk) = entry_keys(key, window.start);

        let spec = UpdateSpec {
            pk: pk.clone(),
            sk: sk.clone(),
            add_count: 1,
            updated_at: format_rfc3339_nano(now),
            init: None,
            condition: UpdateCondition::CountLessThan(limit),
        };

        match self.store.update(spec).await {
            Ok(entry) => Ok(Some(LimitDecision {
                allowed: true,
                current_count: entry.count,
                limit,
                resets_at: window.end,
                retry_after_ms: None,
            })),
            Err(StoreError::ConditionFailed) => {
                self.resolve_single_condition_failure(key, now, window, limit, &pk, &sk)
                    .await
            }
            Err(err) => {
                if self.config.fail_open {
                    tracing::warn!(%err, "check-and-increment failed open");
                    return Ok(Some(LimitDecision {
                        allowed: true,
                        current_count: 0,
                        limit,
                        resets_at: window.end,
                        retry_after_ms: None,
                    }));
                }
                Err(wrap_error(
                    err,
                    ErrorKind::InternalError,
                    "failed to check and increment rate limit",
                ))
            }
        }
    }

    /// The conditional ADD failed: either the window is exhausted or the
    /// entry does not exist yet. Read to find out; create on first write.
    async fn resolve_single_condition_failure(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
        window: &TimeWindow,
        limit: i64,
        pk: &str,
        sk: &str,
    ) -> Result<Option<LimitDecision>, RateLimiterError> {
        let existing = match self.store.get(pk, sk, self.config.consistent_read).await {
            Ok(existing) => existing,
            Err(err) => {
                if self.config.fail_open {
                    return Ok(Some(LimitDecision {
                        allowed: true,
                        current_count: 0,
                        limit,
                        resets_at: window.end,
                        retry_after_ms: None,
                    }));
                }
                return Err(wrap_error(
                    err,
                    ErrorKind::InternalError,
                    "failed to load rate limit entry",
                ));
            }
        };

        if let Some(entry) = existing {
            return Ok(Some(LimitDecision {
                allowed: false,
                current_count: entry.count,
                limit,
                resets_at: window.end,
                retry_after_ms: Some(millis_until(window.end, now)),
            }));
        }

        if limit <= 0 {
            return Ok(Some(LimitDecision {
                allowed: false,
                current_count: 0,
                limit,
                resets_at: window.end,
                retry_after_ms: Some(millis_until(window.end, now)),
            }));
        }

        let now_str = format_rfc3339_nano(now);
        let mut entry = RateLimitEntry {
            pk: String::new(),
            sk: String::new(),
            identifier: key.identifier.clone(),
            resource: key.resource.clone(),
            operation: key.operation.clone(),
            window_start: unix_seconds(window.start),
            window_type: window.key.clone(),
            window_id: format_window_id(window.start),
            count: 1,
            ttl: unix_seconds(window.end) + self.config.ttl_hours * 3600,
            created_at: now_str.clone(),
            updated_at: now_str,
            metadata: sanitize_metadata(&key.metadata),
        };
        entry.set_keys();

        match self.store.put_if_absent(entry).await {
            Ok(()) => Ok(Some(LimitDecision {
                allowed: true,
                current_count: 1,
                limit,
                resets_at: window.end,
                retry_after_ms: None,
            })),
            // Lost the creation race; retry the whole operation.
            Err(StoreError::ConditionFailed) => Ok(None),
            Err(err) => {
                if self.config.fail_open {
                    return Ok(Some(LimitDecision {
                        allowed: true,
                        current_count: 0,
                        limit,
                        resets_at: window.end,
                        retry_after_ms: None,
                    }));
                }
                Err(wrap_error(
                    err,
                    ErrorKind::InternalError,
                    "failed to create rate limit entry",
                ))
            }
        }
    }

    async fn check_and_increment_transactional(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
    ) -> Result<LimitDecision, RateLimiterError> {
        let windows = self.windows(now)?;

        let primary_limit = self.strategy.get_limit(key);
        if primary_limit <= 0 {
            return Ok(LimitDecision {
                allowed: false,
                current_count: 0,
                limit: primary_limit,
                resets_at: windows[0].end,
                retry_after_ms: Some(millis_until(windows[0].end, now)),
            });
        }

        let now_str = format_rfc3339_nano(now);
        let mut specs = Vec::new();
        for window in &windows {
            let max_allowed = self.strategy.window_limit(key, window);
            if max_allowed <= 0 {
                return self.denied_from_check(key, now).await;
            }
            let (pk, sk) = entry_keys(key, window.start);
            specs.push(UpdateSpec {
                pk,
                sk,
                add_count: 1,
                updated_at: now_str.clone(),
                init: Some(self.entry_init(key, window, &now_str)),
                condition: UpdateCondition::NotExistsOrCountLessThan(max_allowed),
            });
        }

        match self.store.transact_update(specs).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed) => {
                return self.denied_from_check(key, now).await;
            }
            Err(err) => {
                if self.config.fail_open {
                    tracing::warn!(%err, "transactional check-and-increment failed open");
                    return Ok(LimitDecision {
                        allowed: true,
                        current_count: 0,
                        limit: primary_limit,
                        resets_at: windows[0].end,
                        retry_after_ms: None,
                    });
                }
                return Err(wrap_error(
                    err,
                    ErrorKind::InternalError,
                    "failed to check and increment rate limit",
                ));
            }
        }

        let primary = &windows[0];
        let (pk, sk) = entry_keys(key, primary.start);
        match self.store.get(&pk, &sk, self.config.consistent_read).await {
            Ok(entry) => Ok(LimitDecision {
                allowed: true,
                current_count: entry.map(|e| e.count).unwrap_or(0),
                limit: primary_limit,
                resets_at: primary.end,
                retry_after_ms: None,
            }),
            Err(err) => {
                if self.config.fail_open {
                    return Ok(LimitDecision {
                        allowed: true,
                        current_count: 0,
                        limit: primary_limit,
                        resets_at: primary.end,
                        retry_after_ms: None,
                    });
                }
                Err(wrap_error(
                    err,
                    ErrorKind::InternalError,
                    "failed to load updated rate limit entry",
                ))
            }
        }
    }

    /// Denial derived from a fresh read, with a stable `retry_after_ms`.
    async fn denied_from_check(
        &self,
        key: &RateLimitKey,
        now: DateTime<Utc>,
    ) -> Result<LimitDecision, RateLimiterError> {
        let mut decision = self.check_limit(key).await?;
        decision.allowed = false;
        if decision.retry_after_ms.is_none() {
            decision.retry_after_ms = Some(millis_until(decision.resets_at, now));
        }
        Ok(decision)
    }

    /// Read minute and hour usage with per-identifier overrides applied.
    pub async fn get_usage(&self, key: &RateLimitKey) -> Result<UsageStats, RateLimiterError> {
        let key = normalize_key(key);
        validate_key(&key)?;

        let now = self.clock.now();
        let minute = minute_window(now);
        let hour = hour_window(now);

        let mut minute_limit = self.config.default_requests_per_minute;
        let mut hour_limit = self.config.default_requests_per_hour;
        if let Some(overrides) = self.config.identifier_limits.get(&key.identifier) {
            if overrides.requests_per_minute > 0 {
                minute_limit = overrides.requests_per_minute;
            }
            if overrides.requests_per_hour > 0 {
                hour_limit = overrides.requests_per_hour;
            }
        }

        let load_count = |window_start: DateTime<Utc>| {
            let (pk, sk) = entry_keys(&key, window_start);
            let consistent = self.config.consistent_read;
            async move {
                self.store
                    .get(&pk, &sk, consistent)
                    .await
                    .map(|entry| entry.map(|e| e.count).unwrap_or(0))
            }
        };

        let minute_count = load_count(minute.start).await.map_err(|err| {
            wrap_error(err, ErrorKind::InternalError, "failed to get minute usage")
        })?;
        let hour_count = load_count(hour.start)
            .await
            .map_err(|err| wrap_error(err, ErrorKind::InternalError, "failed to get hour usage"))?;

        Ok(UsageStats {
            identifier: key.identifier.clone(),
            resource: key.resource.clone(),
            custom_windows: BTreeMap::new(),
            current_minute: UsageWindow {
                count: minute_count,
                limit: minute_limit,
                window_start: minute.start,
                window_end: minute.end,
            },
            current_hour: UsageWindow {
                count: hour_count,
                limit: hour_limit,
                window_start: hour.start,
                window_end: hour.end,
            },
            daily_total: hour_count,
        })
    }
}
