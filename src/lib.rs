//! # doc-cache
//!
//! A two-tier cache for document database object mappers.
//!
//! ## Features
//!
//! - Session tier scoped to one unit of work (read-your-own-writes)
//! - Shared tier across all units of work, TTL-based with a background sweeper
//! - Negative caching of known-missing documents
//! - Transactions that stage shared cache mutations and replay them on commit,
//!   discarding them on error, panic or cancellation
//! - A pluggable [`DocumentStore`] seam, with an in-memory implementation
//!
//! ## Reading and Writing
//!
//! [`EntityClient`] writes through the store and keeps both tiers coherent.
//! Reads are served by the session tier, then the shared tier, and only then
//! by the store.
//!
//! ```no_run
//! use doc_cache::{
//!     CacheCoordinator, Document, EntityClient, MemoryStore, SharedCache, SharedCacheConfig,
//!     UnitOfWork,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let shared = Arc::new(SharedCache::try_new(SharedCacheConfig::from_env()?)?);
//!     let client = EntityClient::new(
//!         Arc::new(MemoryStore::new()),
//!         CacheCoordinator::new(shared),
//!     );
//!
//!     let uow = UnitOfWork::new();
//!     let car = Document::new("cars", "MyCar").with_field("make", "Toyota");
//!     client.create(&uow, &car).await?;
//!
//!     let fields = client.get(&uow, &car).await?;
//!     println!("Loaded: {:?}", fields);
//!     Ok(())
//! }
//! ```
//!
//! ## Transactions
//!
//! Inside [`EntityClient::transaction`] store writes are batched and the
//! shared tier sees nothing until the closure returns `Ok` and the batch is
//! persisted.
//!
//! ```no_run
//! use doc_cache::{
//!     CacheCoordinator, CacheError, Document, EntityClient, MemoryStore, SharedCache,
//!     SharedCacheConfig, TransactionError, UnitOfWork,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = EntityClient::new(
//!         Arc::new(MemoryStore::new()),
//!         CacheCoordinator::new(Arc::new(SharedCache::new(SharedCacheConfig::default()))),
//!     );
//!     let uow = UnitOfWork::new();
//!
//!     let result: Result<(), TransactionError<CacheError>> = client
//!         .transaction(&uow, |tx| {
//!             let client = client.clone();
//!             async move {
//!                 let car = Document::new("cars", "MyCar").with_field("make", "Toyota");
//!                 client.create(&tx, &car).await?;
//!                 Ok(())
//!             }
//!         })
//!         .await;
//!
//!     println!("Committed: {}", result.is_ok());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod context;
pub mod coordinator;
pub mod entity;
pub mod error;
pub mod store;
pub mod transaction;

// Re-export main types for convenience
pub use cache::{
    start_auto_cleanup, CacheEntry, CacheKey, CacheStats, CacheTier, EntityFields,
    InvalidationEvent, InvalidationReason, SessionCache, SharedCache, SharedCacheConfig,
    SharedCacheConfigBuilder, SweeperHandle,
};
pub use client::EntityClient;
pub use context::UnitOfWork;
pub use coordinator::{CacheCoordinator, CacheHit};
pub use entity::{cache_key, Document, Entity};
pub use error::{CacheError, Result, StoreError};
pub use store::{DocumentStore, MemoryStore, Mutation};
pub use transaction::{StagedMutation, TransactionError, TransactionState, TransactionStatus};
