//! Distributed rate limiting over a conditional key-value store.
//!
//! Strategies decide which time windows count and how much they hold;
//! every mutation is a conditional update or an all-or-nothing
//! transaction, so concurrent callers for the same key serialize through
//! the store rather than through in-process locks.

pub mod entry;
pub mod errors;
pub mod limiter;
pub mod memory;
pub mod store;
pub mod strategies;
pub mod types;

pub use entry::{
    day_window, fixed_window, format_rfc3339_nano, format_window_id, hour_window, minute_window,
    rate_limit_table_name, unix_seconds, RateLimitEntry, RateLimitWindow,
};
pub use errors::{new_error, wrap_error, ErrorKind, RateLimiterError};
pub use limiter::RateLimiter;
pub use memory::InMemoryStore;
pub use store::{EntryInit, EntryStore, StoreError, UpdateCondition, UpdateSpec};
pub use strategies::{
    FixedWindowStrategy, MultiWindowStrategy, RateLimitStrategy, SlidingWindowStrategy,
};
pub use types::{
    Config, Limit, LimitDecision, RateLimitKey, TimeWindow, UsageStats, UsageWindow, WindowConfig,
    WindowLimit,
};
