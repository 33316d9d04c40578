//! Request-level entity operations
//!
//! [`EntityClient`] is what an object mapper calls: it writes through the
//! [`DocumentStore`] and keeps both cache tiers coherent via the
//! [`CacheCoordinator`]. Inside a transaction, store writes are queued and
//! flushed in one batch just before the cache commit; a failed flush rolls
//! the transaction back.

use crate::cache::{CacheEntry, EntityFields};
use crate::context::UnitOfWork;
use crate::coordinator::CacheCoordinator;
use crate::entity::Entity;
use crate::error::{CacheError, Result};
use crate::store::{DocumentStore, Mutation};
use crate::transaction::TransactionError;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Entity operations backed by a store and the two-tier cache
#[derive(Clone)]
pub struct EntityClient {
    store: Arc<dyn DocumentStore>,
    coordinator: CacheCoordinator,
}

impl EntityClient {
    pub fn new(store: Arc<dyn DocumentStore>, coordinator: CacheCoordinator) -> Self {
        Self { store, coordinator }
    }

    pub fn coordinator(&self) -> &CacheCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Create an entity in the store, then cache it
    pub async fn create<E: Entity + ?Sized>(&self, uow: &UnitOfWork, entity: &E) -> Result<()> {
        let key = self.coordinator.compute_key(entity)?;
        self.write(uow, Mutation::Create { key, fields: entity.fields() })
            .await?;
        self.coordinator.on_create(uow, entity)
    }

    /// Replace an entity in the store, then overwrite its cache entry
    pub async fn update<E: Entity + ?Sized>(&self, uow: &UnitOfWork, entity: &E) -> Result<()> {
        let key = self.coordinator.compute_key(entity)?;
        self.write(uow, Mutation::Update { key, fields: entity.fields() })
            .await?;
        self.coordinator.on_update(uow, entity)
    }

    /// Delete an entity from the store, then tombstone/evict it
    pub async fn delete<E: Entity + ?Sized>(&self, uow: &UnitOfWork, entity: &E) -> Result<()> {
        let key = self.coordinator.compute_key(entity)?;
        self.write(uow, Mutation::Delete { key }).await?;
        self.coordinator.on_delete(uow, entity)
    }

    /// Load an entity's fields; `None` when it does not exist
    ///
    /// Served from the session or shared tier when possible; otherwise the
    /// store is asked and the answer, found or not, is cached.
    pub async fn get<E: Entity + ?Sized>(
        &self,
        uow: &UnitOfWork,
        entity: &E,
    ) -> Result<Option<EntityFields>> {
        let key = self.coordinator.compute_key(entity)?;

        match self.coordinator.read_key(uow, &key) {
            Ok(hit) => return Ok(hit.entry.into_fields()),
            Err(e) if e.is_miss() => {}
            Err(e) => return Err(e),
        }

        // No cache lock is held here; a racing fetch of the same key is harmless
        let fetched = self.store.fetch(&key).await?;
        debug!("Fetched {} from store (found: {})", key, fetched.is_some());

        self.coordinator
            .write_through_key(uow, key, CacheEntry::from(fetched.clone()));
        Ok(fetched)
    }

    /// Run `f` as a transaction covering both the store writes and the cache
    pub async fn transaction<F, Fut, T, E>(
        &self,
        uow: &UnitOfWork,
        f: F,
    ) -> std::result::Result<T, TransactionError<E>>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<CacheError>,
    {
        let store = self.store.clone();

        self.coordinator
            .transaction_with_hook(uow, f, move |state| async move {
                let writes = state.take_writes();
                if writes.is_empty() {
                    return Ok(());
                }
                debug!("Flushing {} store writes for transaction {}", writes.len(), state.id());
                store
                    .persist_all(writes)
                    .await
                    .map_err(|e| E::from(CacheError::from(e)))
            })
            .await
    }

    async fn write(&self, uow: &UnitOfWork, mutation: Mutation) -> Result<()> {
        let mutation = match uow.active_transaction() {
            Some(state) if !state.flushes_writes() => {
                warn!(
                    "Rejected store {} of {}: transaction {} has no store flush",
                    mutation.op(),
                    mutation.key(),
                    state.id()
                );
                return Err(CacheError::UnflushedWrite {
                    transaction: state.id().to_string(),
                });
            }
            Some(state) => match state.stage_write(mutation) {
                Ok(()) => return Ok(()),
                Err(mutation) => mutation,
            },
            None => mutation,
        };

        self.store.persist(mutation).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTier, SharedCache, SharedCacheConfig};
    use crate::entity::Document;
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn setup() -> (EntityClient, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let shared = Arc::new(SharedCache::new(SharedCacheConfig::default()));
        let client = EntityClient::new(store.clone(), CacheCoordinator::new(shared));
        (client, store)
    }

    fn car(make: &str) -> Document {
        Document::new("cars", "MyCar").with_field("make", make)
    }

    #[tokio::test]
    async fn test_get_falls_through_once() {
        let (client, store) = setup();
        client.create(&UnitOfWork::new(), &car("Toyota")).await.unwrap();
        client.coordinator().shared().clear();

        let uow = UnitOfWork::new();
        let first = client.get(&uow, &car("")).await.unwrap().unwrap();
        let second = client.get(&uow, &car("")).await.unwrap().unwrap();

        assert_eq!(first["make"], json!("Toyota"));
        assert_eq!(first, second);
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_entity_is_negatively_cached() {
        let (client, store) = setup();

        assert!(client.get(&UnitOfWork::new(), &car("")).await.unwrap().is_none());
        assert!(client.get(&UnitOfWork::new(), &car("")).await.unwrap().is_none());

        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_cache_untouched() {
        let (client, store) = setup();
        let uow = UnitOfWork::new();
        client.create(&uow, &car("Toyota")).await.unwrap();

        store.set_offline(true);
        let err = client.update(&uow, &car("Jeep")).await.unwrap_err();
        assert!(matches!(err, CacheError::Store(StoreError::Unavailable(_))));

        let hit = client.coordinator().read(&uow, &car("")).unwrap();
        assert_eq!(hit.tier, CacheTier::Session);
        assert_eq!(hit.entry.field("make"), Some(&json!("Toyota")));
    }

    #[tokio::test]
    async fn test_transaction_flushes_writes_on_commit() {
        let (client, store) = setup();
        let uow = UnitOfWork::new();

        let result: std::result::Result<(), TransactionError<CacheError>> = client
            .transaction(&uow, |tx| {
                let client = client.clone();
                async move {
                    client.create(&tx, &car("Toyota")).await?;
                    assert!(store_is_empty(&client).await);
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_flush_evicts_touched_keys() {
        let (client, store) = setup();
        let uow = UnitOfWork::new();
        client.create(&uow, &car("Toyota")).await.unwrap();

        // Second create of the same id conflicts at flush time
        let result: std::result::Result<(), TransactionError<CacheError>> = client
            .transaction(&uow, |tx| {
                let client = client.clone();
                async move {
                    client.create(&tx, &car("Jeep")).await?;
                    Ok(())
                }
            })
            .await;

        let cause = result.unwrap_err().into_cause().unwrap();
        assert!(matches!(cause, CacheError::Store(StoreError::Conflict { .. })));

        // The store may hold part of a failed batch, so nobody keeps a cached copy
        let key = client.coordinator().compute_key(&car("")).unwrap();
        assert!(client.coordinator().shared().get(&key).unwrap_err().is_miss());
        assert!(!uow.session().contains_key(&key));
        assert_eq!(store.persist_count(), 1);

        let fields = client.get(&uow, &car("")).await.unwrap().unwrap();
        assert_eq!(fields["make"], json!("Toyota"));
    }

    #[tokio::test]
    async fn test_cache_only_transaction_rejects_store_writes() {
        let (client, store) = setup();
        let uow = UnitOfWork::new();

        let result: std::result::Result<(), TransactionError<CacheError>> = client
            .coordinator()
            .transaction(&uow, |tx| {
                let client = client.clone();
                async move {
                    client.create(&tx, &car("Toyota")).await?;
                    Ok(())
                }
            })
            .await;

        let cause = result.unwrap_err().into_cause().unwrap();
        assert!(matches!(cause, CacheError::UnflushedWrite { .. }));
        assert!(client.coordinator().shared().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_client_transaction_joining_cache_only_transaction() {
        let (client, store) = setup();
        let uow = UnitOfWork::new();

        let result: std::result::Result<(), TransactionError<CacheError>> = client
            .coordinator()
            .transaction(&uow, |tx| {
                let client = client.clone();
                async move {
                    let inner: std::result::Result<(), TransactionError<CacheError>> = client
                        .transaction(&tx, |inner_tx| {
                            let client = client.clone();
                            async move {
                                client.create(&inner_tx, &car("Toyota")).await?;
                                Ok(())
                            }
                        })
                        .await;

                    let cause = inner.unwrap_err().into_cause().unwrap();
                    assert!(matches!(cause, CacheError::UnflushedWrite { .. }));
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(client.coordinator().shared().is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_cache_only_transaction_nested_in_client_transaction() {
        let (client, store) = setup();
        let uow = UnitOfWork::new();

        let result: std::result::Result<(), TransactionError<CacheError>> = client
            .transaction(&uow, |tx| {
                let client = client.clone();
                async move {
                    let inner: std::result::Result<(), TransactionError<CacheError>> = client
                        .coordinator()
                        .transaction(&tx, |inner_tx| {
                            let client = client.clone();
                            async move {
                                client.create(&inner_tx, &car("Toyota")).await?;
                                Ok(())
                            }
                        })
                        .await;
                    assert!(inner.is_ok());
                    Ok(())
                }
            })
            .await;

        // The outer transaction owns the flush
        assert!(result.is_ok());
        assert_eq!(store.len().await, 1);
        assert_eq!(client.coordinator().shared().len(), 1);
    }

    async fn store_is_empty(client: &EntityClient) -> bool {
        let key = client.coordinator().compute_key(&car("")).unwrap();
        client.store().fetch(&key).await.unwrap().is_none()
    }
}
