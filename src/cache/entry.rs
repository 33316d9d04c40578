//! Cache entries: materialized entities, absence markers and TTL metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Materialized entity: field name to value
pub type EntityFields = serde_json::Map<String, serde_json::Value>;

/// What a cache tier holds for a key
///
/// `Absent` is a negative cache entry: the store was asked and had nothing.
/// It is not the same as the key being unknown, which tiers report as
/// [`CacheError::CacheMiss`](crate::error::CacheError::CacheMiss).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum CacheEntry {
    /// The entity exists with these fields
    Entity(EntityFields),

    /// The entity is known not to exist
    Absent,
}

impl CacheEntry {
    /// Whether this is an absence marker
    pub fn is_absent(&self) -> bool {
        matches!(self, CacheEntry::Absent)
    }

    /// Borrow the fields of a materialized entity
    pub fn fields(&self) -> Option<&EntityFields> {
        match self {
            CacheEntry::Entity(fields) => Some(fields),
            CacheEntry::Absent => None,
        }
    }

    /// Take the fields of a materialized entity
    pub fn into_fields(self) -> Option<EntityFields> {
        match self {
            CacheEntry::Entity(fields) => Some(fields),
            CacheEntry::Absent => None,
        }
    }

    /// Read a single field
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields().and_then(|fields| fields.get(name))
    }
}

impl From<Option<EntityFields>> for CacheEntry {
    fn from(fields: Option<EntityFields>) -> Self {
        match fields {
            Some(fields) => CacheEntry::Entity(fields),
            None => CacheEntry::Absent,
        }
    }
}

impl From<EntityFields> for CacheEntry {
    fn from(fields: EntityFields) -> Self {
        CacheEntry::Entity(fields)
    }
}

/// A shared cache slot: the entry plus its expiration bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedEntry {
    /// The cached entry
    pub entry: CacheEntry,

    /// Entry metadata
    pub metadata: EntryMetadata,
}

impl SharedEntry {
    /// Create a slot that expires after `ttl` and becomes sweepable
    /// `sweep_grace` after that
    pub fn new(entry: CacheEntry, ttl: Duration, sweep_grace: Duration) -> Self {
        let now = Utc::now();
        let expires_at = now + to_chrono(ttl);
        let sweep_at = expires_at + to_chrono(sweep_grace);

        Self {
            entry,
            metadata: EntryMetadata {
                created_at: now,
                accessed_at: now,
                expires_at,
                sweep_at,
                access_count: 0,
                version: 1,
            },
        }
    }

    /// Check expiry against a given instant (reads treat it as a miss)
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.metadata.expires_at
    }

    /// Check if the cleanup sweep may physically remove the entry
    pub fn is_sweepable_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.metadata.sweep_at
    }

    /// Mark the entry as accessed (updates access time and count)
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.access_count += 1;
    }

    /// Replace the entry and restart its TTL, keeping the version history
    pub fn replace(&mut self, entry: CacheEntry, ttl: Duration, sweep_grace: Duration) {
        let version = self.metadata.version + 1;
        *self = SharedEntry::new(entry, ttl, sweep_grace);
        self.metadata.version = version;
    }
}

/// Metadata associated with a shared cache slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// Last read time
    pub accessed_at: DateTime<Utc>,

    /// After this instant reads report a miss
    pub expires_at: DateTime<Utc>,

    /// After this instant the cleanup sweep removes the slot
    pub sweep_at: DateTime<Utc>,

    /// Number of reads served from this slot
    pub access_count: u64,

    /// Incremented each time the key is overwritten
    pub version: u64,
}

// Out-of-range TTLs are clamped to a century
fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration)
        .unwrap_or_else(|_| chrono::Duration::days(36_500))
        .min(chrono::Duration::days(36_500))
}
