//! Process-wide shared cache with TTL expiration and a background sweep

use crate::cache::{
    config::SharedCacheConfig,
    entry::{CacheEntry, EntryMetadata, SharedEntry},
    invalidation::{InvalidationEvent, InvalidationReason},
    types::{CacheKey, CacheStats},
};
use crate::error::{CacheError, Result};
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shortest period the background sweep runs at
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Shared cache sitting in front of the document store
///
/// This implementation provides:
/// - Sharded concurrent access; unrelated keys never wait on each other
/// - Negative caching through [`CacheEntry::Absent`]
/// - Lazy TTL expiration on read plus a periodic cleanup sweep
/// - An entry limit enforced by evicting the entry closest to expiry
///
/// Construct it once, wrap it in an `Arc` and hand it to the
/// [`CacheCoordinator`](crate::coordinator::CacheCoordinator).
pub struct SharedCache {
    /// Cache configuration
    pub(crate) config: SharedCacheConfig,

    /// Main storage: key -> slot
    entries: DashMap<CacheKey, SharedEntry>,

    counters: Counters,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    negative_hits: AtomicU64,
    misses: AtomicU64,
    evictions_ttl: AtomicU64,
    evictions_sweep: AtomicU64,
    evictions_capacity: AtomicU64,
    invalidations: AtomicU64,
}

impl SharedCache {
    /// Create a new cache with the given configuration
    pub fn new(config: SharedCacheConfig) -> Self {
        info!("Initializing shared cache with config: {:?}", config);

        Self {
            config,
            entries: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Validate the configuration, then create the cache
    pub fn try_new(config: SharedCacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Cache configuration
    pub fn config(&self) -> &SharedCacheConfig {
        &self.config
    }

    /// Look up a key
    ///
    /// Returns `Ok(CacheEntry::Absent)` for a negative hit and
    /// `Err(CacheError::CacheMiss)` when the key is unknown or expired.
    pub fn get(&self, key: &CacheKey) -> Result<CacheEntry> {
        let now = Utc::now();

        if let Some(mut slot) = self.entries.get_mut(key) {
            if !slot.is_expired_at(now) {
                slot.mark_accessed();
                let entry = slot.entry.clone();
                drop(slot);

                if entry.is_absent() {
                    self.bump(&self.counters.negative_hits);
                    debug!("Shared cache negative hit: {}", key);
                } else {
                    self.bump(&self.counters.hits);
                    debug!("Shared cache hit: {}", key);
                }
                return Ok(entry);
            }
        }

        // Only drop the slot if a concurrent writer has not refreshed it
        if self
            .entries
            .remove_if(key, |_, slot| slot.is_expired_at(now))
            .is_some()
        {
            debug!("Shared cache entry expired: {}", key);
            self.bump(&self.counters.evictions_ttl);
        }

        debug!("Shared cache miss: {}", key);
        self.bump(&self.counters.misses);
        Err(CacheError::miss(key))
    }

    /// Insert or overwrite using the default TTL
    pub fn set(&self, key: CacheKey, entry: CacheEntry) {
        let ttl = self.config.ttl_with_jitter();
        self.set_with_ttl(key, entry, ttl);
    }

    /// Insert or overwrite with an explicit TTL
    pub fn set_with_ttl(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) {
        let grace = self.config.cleanup_interval;

        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&key) {
            self.make_room();
        }

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                debug!("Updating shared cache entry: {}", occupied.key());
                occupied.get_mut().replace(entry, ttl, grace);
            }
            Entry::Vacant(vacant) => {
                debug!("Inserting shared cache entry: {}", vacant.key());
                vacant.insert(SharedEntry::new(entry, ttl, grace));
            }
        }
    }

    /// Record that the store has nothing for `key`
    pub fn set_nil(&self, key: CacheKey) {
        self.set(key, CacheEntry::Absent);
    }

    /// Remove `key` so the next read is a true miss
    ///
    /// Returns whether a slot was removed.
    pub fn delete(&self, key: &CacheKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.bump(&self.counters.invalidations);
            debug!("Removed shared cache entry: {}", key);
        }
        removed
    }

    /// Check if an unexpired entry exists (without updating access time)
    pub fn contains_key(&self, key: &CacheKey) -> bool {
        let now = Utc::now();
        self.entries
            .get(key)
            .map(|slot| !slot.is_expired_at(now))
            .unwrap_or(false)
    }

    /// Bookkeeping of an unexpired slot (without updating access time)
    pub fn metadata(&self, key: &CacheKey) -> Option<EntryMetadata> {
        let now = Utc::now();
        self.entries
            .get(key)
            .filter(|slot| !slot.is_expired_at(now))
            .map(|slot| slot.metadata.clone())
    }

    /// Copy of every unexpired entry, ordered by key
    pub fn snapshot(&self) -> BTreeMap<CacheKey, CacheEntry> {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|slot| !slot.is_expired_at(now))
            .map(|slot| (slot.key().clone(), slot.entry.clone()))
            .collect()
    }

    /// Clear all entries from the cache
    pub fn clear(&self) -> InvalidationEvent {
        let keys: Vec<CacheKey> = self.entries.iter().map(|slot| slot.key().clone()).collect();
        for key in &keys {
            self.entries.remove(key);
        }
        self.counters
            .invalidations
            .fetch_add(keys.len() as u64, Ordering::Relaxed);

        info!("Cleared {} entries from shared cache", keys.len());
        InvalidationEvent::new(InvalidationReason::Cleared, keys)
    }

    /// Remove all entries whose sweep deadline has passed
    pub fn cleanup_expired(&self) -> Vec<InvalidationEvent> {
        let now = Utc::now();
        let mut swept = Vec::new();

        self.entries.retain(|key, slot| {
            if slot.is_sweepable_at(now) {
                swept.push(key.clone());
                false
            } else {
                true
            }
        });

        if swept.is_empty() {
            return Vec::new();
        }

        self.counters
            .evictions_sweep
            .fetch_add(swept.len() as u64, Ordering::Relaxed);
        debug!("Swept {} expired entries", swept.len());

        let context = format!("Swept {} expired entries", swept.len());
        vec![InvalidationEvent::new(InvalidationReason::Swept, swept).with_context(context)]
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        CacheStats {
            hits: load(&self.counters.hits),
            negative_hits: load(&self.counters.negative_hits),
            misses: load(&self.counters.misses),
            entries: self.entries.len(),
            evictions_ttl: load(&self.counters.evictions_ttl),
            evictions_sweep: load(&self.counters.evictions_sweep),
            evictions_capacity: load(&self.counters.evictions_capacity),
            invalidations: load(&self.counters.invalidations),
        }
    }

    /// Number of stored slots, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) every `cleanup_interval`
    ///
    /// The task holds a weak reference and stops on its own once the cache is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        // tokio::time::interval panics on a zero period
        let interval = self.config.cleanup_interval.max(MIN_SWEEP_INTERVAL);
        if interval != self.config.cleanup_interval {
            warn!(
                "cleanup_interval {:?} is too short; sweeping every {:?}",
                self.config.cleanup_interval, interval
            );
        }
        let cache = Arc::downgrade(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            info!("Starting shared cache sweeper (interval: {:?})", interval);

            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else {
                            break;
                        };
                        let events = cache.cleanup_expired();
                        if !events.is_empty() {
                            debug!("Auto cleanup: {} events", events.len());
                        }
                    }
                }
            }

            info!("Shared cache sweeper stopped");
        });

        SweeperHandle {
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    // Drop expired slots, then the slot closest to expiry if still full
    fn make_room(&self) {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired_at(now));
        let expired = before.saturating_sub(self.entries.len());
        if expired > 0 {
            self.counters
                .evictions_ttl
                .fetch_add(expired as u64, Ordering::Relaxed);
        }

        if self.entries.len() < self.config.max_entries {
            return;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|slot| slot.metadata.expires_at)
            .map(|slot| slot.key().clone());

        if let Some(key) = victim {
            if self.entries.remove(&key).is_some() {
                warn!("Evicting {} due to max_entries limit", key);
                self.counters
                    .evictions_capacity
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn bump(&self, counter: &AtomicU64) {
        if self.config.enable_metrics {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Start the background sweep if the configuration asks for it
pub fn start_auto_cleanup(cache: &Arc<SharedCache>) -> Option<SweeperHandle> {
    if cache.config.enable_auto_cleanup {
        Some(cache.spawn_sweeper())
    } else {
        None
    }
}

/// Handle on the background sweep task
///
/// Dropping the handle aborts the task; [`shutdown`](Self::shutdown) stops it
/// gracefully and waits for it.
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the task to finish
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Sweeper task ended abnormally: {}", e);
            }
        }
    }

    /// Whether the task has finished
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|task| task.is_finished()).unwrap_or(true)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
