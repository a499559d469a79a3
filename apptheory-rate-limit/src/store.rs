use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::entry::RateLimitEntry;

/// Store-level failure. `ConditionFailed` is a first-class outcome the
/// limiter branches on; `Unavailable` is an infrastructure fault subject to
/// the fail-open policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    ConditionFailed,
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ConditionFailed => write!(f, "conditional check failed"),
            StoreError::Unavailable(message) => write!(f, "store unavailable: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Condition guarding an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCondition {
    /// Unconditional.
    None,
    /// The entry must exist with `count < limit`.
    CountLessThan(i64),
    /// The entry may be absent, or must have `count < limit`.
    NotExistsOrCountLessThan(i64),
}

/// First-write initialization applied with set-if-absent semantics:
/// a field is only written when the stored value is still unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryInit {
    pub identifier: String,
    pub resource: String,
    pub operation: String,
    pub window_start: i64,
    pub window_type: String,
    pub window_id: String,
    pub ttl: i64,
    pub created_at: String,
    pub metadata: Option<BTreeMap<String, String>>,
}

/// One atomic counter update: ADD `add_count`, stamp `updated_at`, apply
/// optional first-write init, all guarded by `condition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSpec {
    pub pk: String,
    pub sk: String,
    pub add_count: i64,
    pub updated_at: String,
    pub init: Option<EntryInit>,
    pub condition: UpdateCondition,
}

/// Conditional key-value store backing the limiter.
///
/// All mutations are conditional updates or all-or-nothing transactions;
/// concurrent callers serialize through these conditions, so the limiter
/// itself holds no locks.
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn get(
        &self,
        pk: &str,
        sk: &str,
        consistent_read: bool,
    ) -> Result<Option<RateLimitEntry>, StoreError>;

    async fn batch_get(
        &self,
        keys: &[(String, String)],
        consistent_read: bool,
    ) -> Result<Vec<RateLimitEntry>, StoreError>;

    /// Apply one conditional update, returning the post-update entry.
    async fn update(&self, spec: UpdateSpec) -> Result<RateLimitEntry, StoreError>;

    /// Create an entry, failing with `ConditionFailed` if it exists.
    async fn put_if_absent(&self, entry: RateLimitEntry) -> Result<(), StoreError>;

    /// Apply every update or none; any failed condition aborts the batch
    /// with `ConditionFailed`.
    async fn transact_update(&self, specs: Vec<UpdateSpec>) -> Result<(), StoreError>;
}
