use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use apptheory_core::clock::{Clock, ManualClock};
use apptheory_rate_limit::{
    Config, EntryStore, ErrorKind, FixedWindowStrategy, InMemoryStore, MultiWindowStrategy,
    RateLimitEntry, RateLimitKey, RateLimiter, SlidingWindowStrategy, StoreError, UpdateSpec,
    WindowConfig,
};

fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
    ))
}

fn closed_config() -> Config {
    Config {
        fail_open: false,
        ..Default::default()
    }
}

fn key() -> RateLimitKey {
    RateLimitKey::new("i1", "/r", "GET")
}

fn limiter_with(
    store: Arc<dyn EntryStore>,
    strategy: Arc<dyn apptheory_rate_limit::RateLimitStrategy>,
) -> RateLimiter {
    RateLimiter::new(store)
        .with_config(closed_config())
        .with_strategy(strategy)
        .with_clock(manual_clock())
}

/// Store wrapper that fails every operation with an infrastructure error.
struct UnavailableStore;

#[async_trait]
impl EntryStore for UnavailableStore {
    async fn get(
        &self,
        _pk: &str,
        _sk: &str,
        _consistent_read: bool,
    ) -> Result<Option<RateLimitEntry>, StoreError> {
        Err(StoreError::Unavailable("boom".into()))
    }

    async fn batch_get(
        &self,
        _keys: &[(String, String)],
        _consistent_read: bool,
    ) -> Result<Vec<RateLimitEntry>, StoreError> {
        Err(StoreError::Unavailable("boom".into()))
    }

    async fn update(&self, _spec: UpdateSpec) -> Result<RateLimitEntry, StoreError> {
        Err(StoreError::Unavailable("boom".into()))
    }

    async fn put_if_absent(&self, _entry: RateLimitEntry) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("boom".into()))
    }

    async fn transact_update(&self, _specs: Vec<UpdateSpec>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("boom".into()))
    }
}

#[tokio::test]
async fn check_limit_validates_key_fields() {
    let limiter = limiter_with(
        Arc::new(InMemoryStore::new()),
        Arc::new(FixedWindowStrategy::new(Duration::minutes(1), 2)),
    );

    for bad in [
        RateLimitKey::new("   ", "/r", "GET"),
        RateLimitKey::new("i1", "   ", "GET"),
        RateLimitKey::new("i1", "/r", "   "),
    ] {
        let err = limiter.check_limit(&bad).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }
}

#[tokio::test]
async fn fixed_window_allows_twice_then_denies() {
    let limiter = limiter_with(
        Arc::new(InMemoryStore::new()),
        Arc::new(FixedWindowStrategy::new(Duration::minutes(1), 2)),
    );

    let d1 = limiter.check_and_increment(&key()).await.unwrap();
    assert!(d1.allowed);
    assert_eq!(d1.current_count, 1);
    assert!(d1.retry_after_ms.is_none());

    let d2 = limiter.check_and_increment(&key()).await.unwrap();
    assert!(d2.allowed);
    assert_eq!(d2.current_count, 2);

    let d3 = limiter.check_and_increment(&key()).await.unwrap();
    assert!(!d3.allowed);
    assert_eq!(d3.current_count, 2);
    assert!(d3.retry_after_ms.unwrap() > 0);
}

#[tokio::test]
async fn zero_limit_denies_deterministically() {
    let limiter = limiter_with(
        Arc::new(InMemoryStore::new()),
        Arc::new(FixedWindowStrategy::new(Duration::minutes(1), 0)),
    );
    let decision = limiter.check_and_increment(&key()).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.limit, 0);
    assert!(decision.retry_after_ms.is_some());
}

#[tokio::test]
async fn a_new_window_resets_the_budget() {
    let clock = manual_clock();
    let store = Arc::new(InMemoryStore::new());
    let limiter = RateLimiter::new(store)
        .with_config(closed_config())
        .with_strategy(Arc::new(FixedWindowStrategy::new(Duration::minutes(1), 1)))
        .with_clock(clock.clone());

    assert!(limiter.check_and_increment(&key()).await.unwrap().allowed);
    assert!(!limiter.check_and_increment(&key()).await.unwrap().allowed);

    clock.advance(Duration::minutes(1));
    let fresh = limiter.check_and_increment(&key()).await.unwrap();
    assert!(fresh.allowed);
    assert_eq!(fresh.current_count, 1);
}

#[tokio::test]
async fn record_request_increments_and_initializes_entry() {
    let store = Arc::new(InMemoryStore::new());
    let limiter = RateLimiter::new(store.clone())
        .with_config(closed_config())
        .with_strategy(Arc::new(FixedWindowStrategy::new(Duration::minutes(1), 100)))
        .with_clock(manual_clock());

    let mut metadata = BTreeMap::new();
    metadata.insert("ip".to_string(), "127.0.0.1".to_string());
    let key = key().with_metadata(metadata);

    limiter.record_request(&key).await.unwrap();
    limiter.record_request(&key).await.unwrap();

    let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap().timestamp();
    let entry = store.entry(&format!("i1#{ts}"), "/r#GET").unwrap();
    assert_eq!(entry.count, 2);
    assert!(!entry.created_at.is_empty());
    assert!(!entry.updated_at.is_empty());
    assert_eq!(entry.ttl, ts + 60 + 3600);
}

#[tokio::test]
async fn metadata_blank_keys_are_dropped_and_keys_trimmed() {
    let store = Arc::new(InMemoryStore::new());
    let limiter = RateLimiter::new(store.clone())
        .with_config(closed_config())
        .with_strategy(Arc::new(FixedWindowStrategy::new(Duration::minutes(1), 2)))
        .with_clock(manual_clock());

    let mut metadata = BTreeMap::new();
    metadata.insert("".to_string(), "ignored".to_string());
    metadata.insert(" ip ".to_string(), "127.0.0.1".to_string());
    let key = key().with_metadata(metadata);

    assert!(limiter.check_and_increment(&key).await.unwrap().allowed);

    let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap().timestamp();
    let entry = store.entry(&format!("i1#{ts}"), "/r#GET").unwrap();
    let metadata = entry.metadata.unwrap();
    assert_eq!(metadata.get("ip"), Some(&"127.0.0.1".to_string()));
    assert!(!metadata.contains_key(""));
}

#[tokio::test]
async fn check_limit_denies_and_sets_retry_after() {
    let store = Arc::new(InMemoryStore::new());
    let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap().timestamp();
    let mut entry = RateLimitEntry {
        identifier: "i1".into(),
        resource: "/r".into(),
        operation: "GET".into(),
        window_start: ts,
        count: 2,
        ..Default::default()
    };
    entry.set_keys();
    store.insert(entry);

    let limiter = limiter_with(
        store,
        Arc::new(FixedWindowStrategy::new(Duration::minutes(1), 2)),
    );
    let decision = limiter.check_limit(&key()).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.current_count, 2);
    assert_eq!(decision.limit, 2);
    assert!(decision.retry_after_ms.is_some());
}

#[tokio::test]
async fn sliding_window_sums_bucket_counts() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 30).unwrap(),
    ));
    let strategy = SlidingWindowStrategy::new(Duration::minutes(2), 10, Duration::minutes(1));
    let store = Arc::new(InMemoryStore::new());

    let windows =
        apptheory_rate_limit::RateLimitStrategy::calculate_windows(&strategy, clock.now());
    let mut expected = 0;
    for (idx, window) in windows.iter().enumerate() {
        let count = idx as i64 + 1;
        expected += count;
        let mut entry = RateLimitEntry {
            identifier: "i1".into(),
            resource: "/r".into(),
            operation: "GET".into(),
            window_start: window.start.timestamp(),
            count,
            ..Default::default()
        };
        entry.set_keys();
        store.insert(entry);
    }

    let limiter = RateLimiter::new(store)
        .with_config(closed_config())
        .with_strategy(Arc::new(strategy))
        .with_clock(clock);
    let decision = limiter.check_limit(&key()).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.current_count, expected);
}

// Multi-window tests pin the clock off the hour boundary: at an exact hour
// mark the minute and hour windows share a window_start and therefore a
// store key.
fn mid_hour_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 30).unwrap(),
    ))
}

#[tokio::test]
async fn multi_window_denies_when_the_tight_window_is_exhausted() {
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()))
        .with_config(closed_config())
        .with_strategy(Arc::new(MultiWindowStrategy::new(vec![
            WindowConfig {
                duration_ms: 60_000,
                max_requests: 2,
            },
            WindowConfig {
                duration_ms: 3_600_000,
                max_requests: 10,
            },
        ])))
        .with_clock(mid_hour_clock());

    assert!(limiter.check_and_increment(&key()).await.unwrap().allowed);
    assert!(limiter.check_and_increment(&key()).await.unwrap().allowed);

    let d3 = limiter.check_and_increment(&key()).await.unwrap();
    assert!(!d3.allowed);
    assert_eq!(d3.limit, 2);
    assert!(d3.retry_after_ms.unwrap() > 0);
}

#[tokio::test]
async fn multi_window_increments_every_window_atomically() {
    let store = Arc::new(InMemoryStore::new());
    let limiter = RateLimiter::new(store.clone())
        .with_config(closed_config())
        .with_strategy(Arc::new(MultiWindowStrategy::new(vec![
            WindowConfig {
                duration_ms: 60_000,
                max_requests: 2,
            },
            WindowConfig {
                duration_ms: 3_600_000,
                max_requests: 10,
            },
        ])))
        .with_clock(mid_hour_clock());

    limiter.check_and_increment(&key()).await.unwrap();
    limiter.check_and_increment(&key()).await.unwrap();
    // Denied attempt must not bump either window.
    limiter.check_and_increment(&key()).await.unwrap();

    assert_eq!(store.len(), 2);
    let minute_ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap().timestamp();
    let hour_ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap().timestamp();
    assert_eq!(store.entry(&format!("i1#{minute_ts}"), "/r#GET").unwrap().count, 2);
    assert_eq!(store.entry(&format!("i1#{hour_ts}"), "/r#GET").unwrap().count, 2);
}

#[tokio::test]
async fn check_limit_fails_open_on_store_outage() {
    let limiter = RateLimiter::new(Arc::new(UnavailableStore))
        .with_config(Config::default())
        .with_clock(manual_clock());
    let decision = limiter.check_limit(&key()).await.unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn check_and_increment_honors_fail_open_policy() {
    let open = RateLimiter::new(Arc::new(UnavailableStore))
        .with_config(Config::default())
        .with_clock(manual_clock());
    let decision = open.check_and_increment(&key()).await.unwrap();
    assert!(decision.allowed);

    let closed = RateLimiter::new(Arc::new(UnavailableStore))
        .with_config(closed_config())
        .with_clock(manual_clock());
    let err = closed.check_and_increment(&key()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InternalError);
}

#[tokio::test]
async fn get_usage_reads_minute_and_hour_windows() {
    let store = Arc::new(InMemoryStore::new());
    let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap().timestamp();
    let mut entry = RateLimitEntry {
        identifier: "i1".into(),
        resource: "/r".into(),
        operation: "GET".into(),
        window_start: ts,
        count: 7,
        ..Default::default()
    };
    entry.set_keys();
    store.insert(entry);

    let limiter = RateLimiter::new(store)
        .with_config(closed_config())
        .with_clock(manual_clock());
    let stats = limiter.get_usage(&key()).await.unwrap();
    assert_eq!(stats.current_minute.count, 7);
    assert_eq!(stats.current_hour.count, 7);
    assert_eq!(stats.daily_total, 7);
}

#[tokio::test]
async fn get_usage_applies_identifier_overrides() {
    let mut config = closed_config();
    config.identifier_limits.insert(
        "i1".to_string(),
        apptheory_rate_limit::Limit {
            requests_per_hour: 8,
            requests_per_minute: 4,
            ..Default::default()
        },
    );

    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()))
        .with_config(config)
        .with_clock(manual_clock());
    let stats = limiter.get_usage(&key()).await.unwrap();
    assert_eq!(stats.current_minute.limit, 4);
    assert_eq!(stats.current_hour.limit, 8);
}
