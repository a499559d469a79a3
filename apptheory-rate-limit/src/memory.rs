use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::entry::RateLimitEntry;
use crate::store::{EntryStore, StoreError, UpdateCondition, UpdateSpec};

/// In-process store implementing the full conditional contract. Useful for
/// tests and local runs; write paths serialize through a single lock so
/// transactions stay all-or-nothing.
#[derive(Default)]
pub struct InMemoryStore {
    items: DashMap<(String, String), RateLimitEntry>,
    write_lock: Mutex<()>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Snapshot an entry for assertions.
    pub fn entry(&self, pk: &str, sk: &str) -> Option<RateLimitEntry> {
        self.items
            .get(&(pk.to_string(), sk.to_string()))
            .map(|entry| entry.clone())
    }

    /// Seed an entry directly.
    pub fn insert(&self, entry: RateLimitEntry) {
        self.items.insert((entry.pk.clone(), entry.sk.clone()), entry);
    }

    fn check_condition(
        condition: UpdateCondition,
        existing: Option<&RateLimitEntry>,
    ) -> Result<(), StoreError> {
        match condition {
            UpdateCondition::None => Ok(()),
            UpdateCondition::CountLessThan(limit) => match existing {
                None => Err(StoreError::ConditionFailed),
                Some(entry) if entry.count < limit => Ok(()),
                Some(_) => Err(StoreError::ConditionFailed),
            },
            UpdateCondition::NotExistsOrCountLessThan(limit) => match existing {
                None => Ok(()),
                Some(entry) if entry.count < limit => Ok(()),
                Some(_) => Err(StoreError::ConditionFailed),
            },
        }
    }

    fn apply(spec: &UpdateSpec, existing: Option<RateLimitEntry>) -> RateLimitEntry {
        let mut entry = existing.unwrap_or_else(|| RateLimitEntry {
            pk: spec.pk.clone(),
            sk: spec.sk.clone(),
            ..Default::default()
        });

        entry.count += spec.add_count;
        entry.updated_at = spec.updated_at.clone();

        if let Some(init) = &spec.init {
            if entry.identifier.is_empty() {
                entry.identifier = init.identifier.clone();
            }
            if entry.resource.is_empty() {
                entry.resource = init.resource.clone();
            }
            if entry.operation.is_empty() {
                entry.operation = init.operation.clone();
            }
            if entry.window_start == 0 {
                entry.window_start = init.window_start;
            }
            if entry.window_type.is_empty() {
                entry.window_type = init.window_type.clone();
            }
            if entry.window_id.is_empty() {
                entry.window_id = init.window_id.clone();
            }
            if entry.ttl == 0 {
                entry.ttl = init.ttl;
            }
            if entry.created_at.is_empty() {
                entry.created_at = init.created_at.clone();
            }
            if entry.metadata.is_none() {
                entry.metadata = init.metadata.clone();
            }
        }

        entry
    }
}

#[async_trait]
impl EntryStore for InMemoryStore {
    async fn get(
        &self,
        pk: &str,
        sk: &str,
        _consistent_read: bool,
    ) -> Result<Option<RateLimitEntry>, StoreError> {
        Ok(self.entry(pk, sk))
    }

    async fn batch_get(
        &self,
        keys: &[(String, String)],
        _consistent_read: bool,
    ) -> Result<Vec<RateLimitEntry>, StoreError> {
        Ok(keys
            .iter()
            .filter_map(|key| self.items.get(key).map(|entry| entry.clone()))
            .collect())
    }

    async fn update(&self, spec: UpdateSpec) -> Result<RateLimitEntry, StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        let key = (spec.pk.clone(), spec.sk.clone());
        let existing = self.items.get(&key).map(|entry| entry.clone());
        Self::check_condition(spec.condition, existing.as_ref())?;
        let entry = Self::apply(&spec, existing);
        self.items.insert(key, entry.clone());
        Ok(entry)
    }

    async fn put_if_absent(&self, entry: RateLimitEntry) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap();
        let key = (entry.pk.clone(), entry.sk.clone());
        if self.items.contains_key(&key) {
            return Err(StoreError::ConditionFailed);
        }
        self.items.insert(key, entry);
        Ok(())
    }

    async fn transact_update(&self, specs: Vec<UpdateSpec>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap();

        // Stage against a copy so a failed condition leaves nothing applied.
        let mut staged: Vec<((String, String), RateLimitEntry)> = Vec::new();
        for spec in &specs {
            let key = (spec.pk.clone(), spec.sk.clone());
            let existing = staged
                .iter()
                .find(|(staged_key, _)| *staged_key == key)
                .map(|(_, entry)| entry.clone())
                .or_else(|| self.items.get(&key).map(|entry| entry.clone()));
            Self::check_condition(spec.condition, existing.as_ref())?;
            let entry = Self::apply(spec, existing);
            staged.retain(|(staged_key, _)| *staged_key != key);
            staged.push((key, entry));
        }

        for (key, entry) in staged {
            self.items.insert(key, entry);
        }
        Ok(())
    }
}
