//! # Cache Tiers
//!
//! Two tiers hold cached entities, both keyed by [`CacheKey`] (`collection/id`):
//!
//! - **Session tier** ([`SessionCache`]): private to one unit of work, no
//!   expiry, gives read-your-own-writes within a request.
//! - **Shared tier** ([`SharedCache`]): process-wide, concurrent, TTL-based
//!   expiration with a background sweeper for entries nobody reads again.
//!
//! Both tiers can store an absence marker ([`CacheEntry::Absent`]) so a
//! known-missing document does not send every reader back to the store.
//!
//! ## Example
//!
//! ```rust
//! use doc_cache::cache::{CacheEntry, CacheKey, SharedCache, SharedCacheConfig};
//! use std::time::Duration;
//!
//! # fn example() -> doc_cache::Result<()> {
//! let config = SharedCacheConfig::builder()
//!     .default_ttl(Duration::from_secs(60))
//!     .max_entries(10_000)
//!     .build();
//!
//! let cache = SharedCache::try_new(config)?;
//! let key = CacheKey::new("cars", "MyCar")?;
//!
//! cache.set_nil(key.clone());
//! assert!(cache.get(&key)?.is_absent());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod invalidation;
pub mod session;
pub mod shared;
pub mod types;

pub use config::{SharedCacheConfig, SharedCacheConfigBuilder};
pub use entry::{CacheEntry, EntityFields, EntryMetadata, SharedEntry};
pub use invalidation::{InvalidationEvent, InvalidationReason};
pub use session::SessionCache;
pub use shared::{start_auto_cleanup, SharedCache, SweeperHandle};
pub use types::{CacheKey, CacheStats, CacheTier};
