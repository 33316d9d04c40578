//! Core type definitions for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between collection path and identifier
pub const KEY_SEPARATOR: char = '/';

/// Cache key derived from an entity's collection and identifier
///
/// Rendered as `"<collection>/<id>"`. The identifier may not contain the
/// separator, so the key always splits back into the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build a key from collection and identifier
    pub fn new(collection: &str, id: &str) -> Result<Self> {
        if collection.is_empty() {
            return Err(invalid(collection, "empty collection name"));
        }
        if collection.starts_with(KEY_SEPARATOR) || collection.ends_with(KEY_SEPARATOR) {
            return Err(invalid(collection, "collection path has a leading or trailing separator"));
        }
        if id.is_empty() {
            return Err(invalid(collection, "missing identifier"));
        }
        if id.contains(KEY_SEPARATOR) {
            return Err(invalid(
                collection,
                &format!("identifier '{}' contains '{}'", id, KEY_SEPARATOR),
            ));
        }

        Ok(Self(format!("{}{}{}", collection, KEY_SEPARATOR, id)))
    }

    /// Key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Collection part of the key
    pub fn collection(&self) -> &str {
        self.split().0
    }

    /// Identifier part of the key
    pub fn id(&self) -> &str {
        self.split().1
    }

    fn split(&self) -> (&str, &str) {
        // Construction guarantees a separator before the identifier
        self.0
            .rsplit_once(KEY_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""))
    }
}

fn invalid(collection: &str, reason: &str) -> CacheError {
    CacheError::InvalidIdentity {
        collection: collection.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which tier answered a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// Unit-of-work scoped overlay
    Session,

    /// Process-wide shared tier
    Shared,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Session => write!(f, "session"),
            CacheTier::Shared => write!(f, "shared"),
        }
    }
}

/// Statistics for shared cache monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered with a materialized entity
    pub hits: u64,

    /// Lookups answered with an absence marker
    pub negative_hits: u64,

    /// Lookups that found nothing usable
    pub misses: u64,

    /// Number of entries currently stored (expired but unswept included)
    pub entries: usize,

    /// Entries dropped lazily on read after their TTL
    pub evictions_ttl: u64,

    /// Entries removed by the cleanup sweep
    pub evictions_sweep: u64,

    /// Entries evicted to respect `max_entries`
    pub evictions_capacity: u64,

    /// Explicit deletes and clears
    pub invalidations: u64,
}

impl CacheStats {
    /// Cache hit rate as a percentage; negative hits count as hits
    pub fn hit_rate(&self) -> f64 {
        let found = self.hits + self.negative_hits;
        let total = found + self.misses;
        if total == 0 {
            0.0
        } else {
            (found as f64 / total as f64) * 100.0
        }
    }

    /// Miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Total evictions for any reason other than explicit invalidation
    pub fn total_evictions(&self) -> u64 {
        self.evictions_ttl + self.evictions_sweep + self.evictions_capacity
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, negative_hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, evictions: {} }}",
            self.hits,
            self.negative_hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.total_evictions()
        )
    }
}
