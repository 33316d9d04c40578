//! Unit-of-work scoped session cache
//!
//! A session cache overlays the shared tier for one request or transaction.
//! Its entries never expire; the whole map is dropped with the unit of work.

use crate::cache::{
    entry::CacheEntry,
    types::CacheKey,
};
use crate::error::{CacheError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Session-scoped overlay cache
///
/// Only handles derived from the same [`UnitOfWork`](crate::context::UnitOfWork)
/// see this map. The mutex is never held across an `.await`.
#[derive(Debug)]
pub struct SessionCache {
    id: String,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl SessionCache {
    /// Create an empty session cache
    pub fn new() -> Self {
        Self {
            id: format!("session-{}", Uuid::new_v4().simple()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Identifier used in log lines
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Look up a key; `Err(CacheMiss)` when this unit of work has not seen it
    pub fn get(&self, key: &CacheKey) -> Result<CacheEntry> {
        match self.lock().get(key) {
            Some(entry) => {
                debug!("Session {} hit: {}", self.id, key);
                Ok(entry.clone())
            }
            None => Err(CacheError::miss(key)),
        }
    }

    /// Insert or overwrite
    pub fn set(&self, key: CacheKey, entry: CacheEntry) {
        debug!("Session {} set: {}", self.id, key);
        self.lock().insert(key, entry);
    }

    /// Record that the entity does not exist
    pub fn set_nil(&self, key: CacheKey) {
        self.set(key, CacheEntry::Absent);
    }

    /// Record a deletion: later reads in this unit of work see "not found"
    pub fn delete(&self, key: CacheKey) {
        debug!("Session {} delete: {}", self.id, key);
        self.lock().insert(key, CacheEntry::Absent);
    }

    /// Drop the key entirely so the next read falls through to the shared tier
    pub fn forget(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lock().remove(key)
    }

    /// Check if the key has a session entry (positive or negative)
    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the session holds nothing
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Keys held, ordered
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copy of the whole session, ordered by key
    pub fn snapshot(&self) -> BTreeMap<CacheKey, CacheEntry> {
        self.lock()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Discard everything
    pub fn clear(&self) {
        let mut entries = self.lock();
        debug!("Session {} discarded {} entries", self.id, entries.len());
        entries.clear();
    }

    // A panic while holding the lock leaves the map itself intact
    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::EntityFields;
    use serde_json::json;

    fn key(id: &str) -> CacheKey {
        CacheKey::new("cars", id).unwrap()
    }

    fn car(make: &str) -> CacheEntry {
        let mut fields = EntityFields::new();
        fields.insert("make".to_string(), json!(make));
        CacheEntry::Entity(fields)
    }

    #[test]
    fn test_set_and_get() {
        let session = SessionCache::new();
        session.set(key("1"), car("Toyota"));

        assert_eq!(session.get(&key("1")).unwrap(), car("Toyota"));
        assert!(session.get(&key("2")).unwrap_err().is_miss());
    }

    #[test]
    fn test_delete_records_absence() {
        let session = SessionCache::new();
        session.set(key("1"), car("Toyota"));
        session.delete(key("1"));

        let entry = session.get(&key("1")).unwrap();
        assert!(entry.is_absent());
        assert!(session.contains_key(&key("1")));
    }

    #[test]
    fn test_forget_is_a_true_miss() {
        let session = SessionCache::new();
        session.set_nil(key("1"));

        assert_eq!(session.forget(&key("1")), Some(CacheEntry::Absent));
        assert!(session.get(&key("1")).unwrap_err().is_miss());
    }

    #[test]
    fn test_snapshot_and_clear() {
        let session = SessionCache::new();
        session.set(key("b"), car("Jeep"));
        session.set(key("a"), car("Toyota"));

        assert_eq!(session.keys(), vec![key("a"), key("b")]);
        assert_eq!(session.snapshot().len(), 2);

        session.clear();
        assert!(session.is_empty());
    }

    #[test]
    fn test_sessions_are_independent() {
        let first = SessionCache::new();
        let second = SessionCache::new();
        first.set(key("1"), car("Toyota"));

        assert!(second.get(&key("1")).is_err());
        assert_ne!(first.id(), second.id());
    }
}
