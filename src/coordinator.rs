//! Cache coordinator: the single path between entity operations and the
//! two cache tiers
//!
//! The coordinator decides:
//! - how an entity maps to a [`CacheKey`]
//! - read precedence: session, then shared, then "ask the store"
//! - when a mutation reaches the shared tier: immediately outside a
//!   transaction, at commit inside one
//!
//! It never calls the external store and holds no lock while the caller
//! does, so concurrent units of work may fetch the same key twice.

use crate::cache::{CacheEntry, CacheKey, CacheTier, EntityFields, SharedCache};
use crate::context::UnitOfWork;
use crate::entity::{cache_key, Entity};
use crate::error::Result;
use crate::transaction::StagedMutation;
use std::sync::Arc;
use tracing::debug;

/// Result of a cache read
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    /// Entity fields, or an absence marker
    pub entry: CacheEntry,

    /// Tier that answered
    pub tier: CacheTier,
}

impl CacheHit {
    /// Whether the hit says the entity does not exist
    pub fn is_absent(&self) -> bool {
        self.entry.is_absent()
    }
}

/// Coordinates reads and writes across the session and shared tiers
#[derive(Clone)]
pub struct CacheCoordinator {
    shared: Arc<SharedCache>,
}

impl CacheCoordinator {
    /// Create a coordinator over an injected shared cache
    pub fn new(shared: Arc<SharedCache>) -> Self {
        Self { shared }
    }

    /// The shared tier
    pub fn shared(&self) -> &Arc<SharedCache> {
        &self.shared
    }

    /// Derive the cache key of an entity
    pub fn compute_key<E: Entity + ?Sized>(&self, entity: &E) -> Result<CacheKey> {
        cache_key(entity)
    }

    /// Read an entity through both tiers
    ///
    /// `Err(CacheMiss)` means neither tier knows the key and the caller should
    /// fetch from the store, then call [`write_through`](Self::write_through).
    pub fn read<E: Entity + ?Sized>(&self, uow: &UnitOfWork, entity: &E) -> Result<CacheHit> {
        let key = self.compute_key(entity)?;
        self.read_key(uow, &key)
    }

    /// Read by key through both tiers
    pub fn read_key(&self, uow: &UnitOfWork, key: &CacheKey) -> Result<CacheHit> {
        if let Ok(entry) = uow.session().get(key) {
            return Ok(CacheHit {
                entry,
                tier: CacheTier::Session,
            });
        }

        let entry = self.shared.get(key)?;
        // Later reads in this unit of work stay on the session tier
        uow.session().set(key.clone(), entry.clone());
        debug!("Promoted {} into session {}", key, uow.session().id());

        Ok(CacheHit {
            entry,
            tier: CacheTier::Shared,
        })
    }

    /// Populate both tiers after a store fetch; `None` caches the absence
    pub fn write_through<E: Entity + ?Sized>(
        &self,
        uow: &UnitOfWork,
        entity: &E,
        fields: Option<EntityFields>,
    ) -> Result<()> {
        let key = self.compute_key(entity)?;
        self.write_through_key(uow, key, CacheEntry::from(fields));
        Ok(())
    }

    /// Populate both tiers for a key
    pub fn write_through_key(&self, uow: &UnitOfWork, key: CacheKey, entry: CacheEntry) {
        uow.session().set(key.clone(), entry.clone());
        self.apply(uow, StagedMutation::Put { key, entry });
    }

    /// Cache a newly created entity
    pub fn on_create<E: Entity + ?Sized>(&self, uow: &UnitOfWork, entity: &E) -> Result<()> {
        self.put_entity(uow, entity)
    }

    /// Overwrite the cached entity with its new fields
    pub fn on_update<E: Entity + ?Sized>(&self, uow: &UnitOfWork, entity: &E) -> Result<()> {
        self.put_entity(uow, entity)
    }

    /// Tombstone the entity in the session and evict it from the shared tier
    pub fn on_delete<E: Entity + ?Sized>(&self, uow: &UnitOfWork, entity: &E) -> Result<()> {
        let key = self.compute_key(entity)?;
        uow.session().delete(key.clone());
        self.apply(uow, StagedMutation::Delete { key });
        Ok(())
    }

    /// Drop an entity from both tiers so the next read goes to the store
    pub fn invalidate<E: Entity + ?Sized>(&self, uow: &UnitOfWork, entity: &E) -> Result<()> {
        let key = self.compute_key(entity)?;
        uow.session().forget(&key);
        self.apply(uow, StagedMutation::Invalidate { key });
        Ok(())
    }

    /// [`on_create`](Self::on_create) for each entity, stopping at the first
    /// invalid identity
    pub fn on_create_all<E: Entity>(&self, uow: &UnitOfWork, entities: &[E]) -> Result<()> {
        entities.iter().try_for_each(|entity| self.on_create(uow, entity))
    }

    /// [`on_update`](Self::on_update) for each entity
    pub fn on_update_all<E: Entity>(&self, uow: &UnitOfWork, entities: &[E]) -> Result<()> {
        entities.iter().try_for_each(|entity| self.on_update(uow, entity))
    }

    /// [`on_delete`](Self::on_delete) for each entity
    pub fn on_delete_all<E: Entity>(&self, uow: &UnitOfWork, entities: &[E]) -> Result<()> {
        entities.iter().try_for_each(|entity| self.on_delete(uow, entity))
    }

    fn put_entity<E: Entity + ?Sized>(&self, uow: &UnitOfWork, entity: &E) -> Result<()> {
        let key = self.compute_key(entity)?;
        let entry = CacheEntry::Entity(entity.fields());
        uow.session().set(key.clone(), entry.clone());
        self.apply(uow, StagedMutation::Put { key, entry });
        Ok(())
    }

    // Shared tier now, or at commit when a transaction is active
    fn apply(&self, uow: &UnitOfWork, mutation: StagedMutation) {
        let mutation = match uow.active_transaction() {
            Some(state) => match state.stage(mutation) {
                Ok(()) => return,
                // Finished between the check and the push
                Err(mutation) => mutation,
            },
            None => mutation,
        };
        mutation.apply_to_shared(&self.shared);
    }
}
