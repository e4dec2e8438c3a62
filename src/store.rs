//! Expiring key-value storage behind the rate limiter and CSRF tokens.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Key-value store whose entries carry an expiry.
///
/// Time is passed in so callers (and tests) own the clock. Implementations
/// must never hand back an entry whose expiry is at or before `now`.
pub trait ExpiringStore<V>: Send + Sync {
    fn get(&self, key: &str, now: Instant) -> Option<V>;
    fn set(&self, key: String, value: V, expires_at: Instant);
    fn remove(&self, key: &str) -> Option<V>;
    /// Drop expired entries, returning how many were removed.
    fn sweep(&self, now: Instant) -> usize;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store. Lock is never held across an `.await`.
pub struct MemoryStore<V> {
    entries: Mutex<HashMap<String, (V, Instant)>>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (V, Instant)>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send> ExpiringStore<V> for MemoryStore<V> {
    fn get(&self, key: &str, now: Instant) -> Option<V> {
        let entries = self.lock();
        entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone())
    }

    fn set(&self, key: String, value: V, expires_at: Instant) {
        self.lock().insert(key, (value, expires_at));
    }

    fn remove(&self, key: &str) -> Option<V> {
        self.lock().remove(key).map(|(value, _)| value)
    }

    fn sweep(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expired_entries_are_invisible_before_sweep() {
        let store = MemoryStore::new();
        let t0 = Instant::now();
        store.set("a".into(), 1u32, t0 + Duration::from_secs(10));
        assert_eq!(store.get("a", t0), Some(1));
        assert_eq!(store.get("a", t0 + Duration::from_secs(10)), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = MemoryStore::new();
        let t0 = Instant::now();
        store.set("old".into(), "x".to_string(), t0 + Duration::from_secs(1));
        store.set("new".into(), "y".to_string(), t0 + Duration::from_secs(100));
        assert_eq!(store.sweep(t0 + Duration::from_secs(5)), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("new", t0).as_deref(), Some("y"));
    }

    #[test]
    fn remove_returns_value() {
        let store = MemoryStore::new();
        let t0 = Instant::now();
        store.set("k".into(), 7u8, t0 + Duration::from_secs(1));
        assert_eq!(store.remove("k"), Some(7));
        assert!(store.is_empty());
    }
}
