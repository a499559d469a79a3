use std::sync::{Arc, Mutex};

/// Injectable id source; mirror of [`crate::clock::Clock`] for identifiers.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[derive(Debug)]
struct SequenceState {
    prefix: String,
    next: u64,
    queue: Vec<String>,
}

/// Deterministic ids for tests: pushed ids are returned first, then
/// `<prefix>-<n>` counting up from the start value.
#[derive(Clone)]
pub struct SequenceIds {
    state: Arc<Mutex<SequenceState>>,
}

impl SequenceIds {
    pub fn new(prefix: impl Into<String>, start: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SequenceState {
                prefix: prefix.into(),
                next: start,
                queue: Vec::new(),
            })),
        }
    }

    pub fn push(&self, ids: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.queue.extend(ids.iter().map(|id| id.to_string()));
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.next = 1;
        state.queue.clear();
    }
}

impl Default for SequenceIds {
    fn default() -> Self {
        Self::new("test-id", 1)
    }
}

impl IdGenerator for SequenceIds {
    fn new_id(&self) -> String {
        let mut state = self.state.lock().unwrap();
        if !state.queue.is_empty() {
            return state.queue.remove(0);
        }
        let out = format!("{}-{}", state.prefix, state.next);
        state.next += 1;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_ids_count_up() {
        let ids = SequenceIds::default();
        assert_eq!(ids.new_id(), "test-id-1");
        assert_eq!(ids.new_id(), "test-id-2");
    }

    #[test]
    fn pushed_ids_drain_first() {
        let ids = SequenceIds::default();
        ids.push(&["req_test_123"]);
        assert_eq!(ids.new_id(), "req_test_123");
        assert_eq!(ids.new_id(), "test-id-1");
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let ids = SequenceIds::default();
        ids.new_id();
        ids.push(&["queued"]);
        ids.reset();
        assert_eq!(ids.new_id(), "test-id-1");
    }

    #[test]
    fn uuid_ids_are_unique() {
        let ids = UuidIds;
        assert_ne!(ids.new_id(), ids.new_id());
    }
}
