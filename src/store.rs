//! External document store seam
//!
//! The cache core reaches the database only through [`DocumentStore`]:
//! fetch one document by key, persist one mutation. [`MemoryStore`] is an
//! in-process implementation for tests, demos and single-node setups.

use crate::cache::{CacheKey, EntityFields};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A write sent to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    /// Insert a new document; fails if it exists
    Create { key: CacheKey, fields: EntityFields },
    /// Replace an existing document; fails if it is missing
    Update { key: CacheKey, fields: EntityFields },
    /// Remove a document; removing a missing document succeeds
    Delete { key: CacheKey },
}

impl Mutation {
    /// Key the mutation targets
    pub fn key(&self) -> &CacheKey {
        match self {
            Mutation::Create { key, .. } | Mutation::Update { key, .. } | Mutation::Delete { key } => {
                key
            }
        }
    }

    /// Operation name for log lines
    pub fn op(&self) -> &'static str {
        match self {
            Mutation::Create { .. } => "create",
            Mutation::Update { .. } => "update",
            Mutation::Delete { .. } => "delete",
        }
    }
}

/// The external document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document; `Ok(None)` when it does not exist
    async fn fetch(&self, key: &CacheKey) -> Result<Option<EntityFields>, StoreError>;

    /// Apply one mutation
    async fn persist(&self, mutation: Mutation) -> Result<(), StoreError>;

    /// Apply mutations in order, stopping at the first failure
    async fn persist_all(&self, mutations: Vec<Mutation>) -> Result<(), StoreError> {
        for mutation in mutations {
            self.persist(mutation).await?;
        }
        Ok(())
    }
}

/// In-memory document store
///
/// Counts fetches and persists so callers can observe when the cache
/// actually fell through, and can be switched offline to simulate outages.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<HashMap<CacheKey, EntityFields>>,
    fetches: AtomicU64,
    persists: AtomicU64,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `fetch` calls served so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of mutations applied so far
    pub fn persist_count(&self) -> u64 {
        self.persists.load(Ordering::Relaxed)
    }

    /// Make every call fail with [`StoreError::Unavailable`]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// Check if the store holds nothing
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Read a document without counting it as a fetch
    pub async fn peek(&self, key: &CacheKey) -> Option<EntityFields> {
        self.documents.read().await.get(key).cloned()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::Relaxed) {
            warn!("Memory store is offline");
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }

    fn validate(
        documents: &HashMap<CacheKey, EntityFields>,
        mutation: &Mutation,
    ) -> Result<(), StoreError> {
        match mutation {
            Mutation::Create { key, .. } if documents.contains_key(key) => {
                Err(StoreError::Conflict { key: key.clone() })
            }
            Mutation::Update { key, .. } if !documents.contains_key(key) => {
                Err(StoreError::Conflict { key: key.clone() })
            }
            _ => Ok(()),
        }
    }

    fn apply(documents: &mut HashMap<CacheKey, EntityFields>, mutation: Mutation) {
        match mutation {
            Mutation::Create { key, fields } | Mutation::Update { key, fields } => {
                documents.insert(key, fields);
            }
            Mutation::Delete { key } => {
                documents.remove(&key);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn fetch(&self, key: &CacheKey) -> Result<Option<EntityFields>, StoreError> {
        self.check_online()?;
        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!("Memory store fetch: {}", key);
        Ok(self.documents.read().await.get(key).cloned())
    }

    async fn persist(&self, mutation: Mutation) -> Result<(), StoreError> {
        self.check_online()?;
        let mut documents = self.documents.write().await;
        Self::validate(&documents, &mutation)?;
        debug!("Memory store {}: {}", mutation.op(), mutation.key());
        Self::apply(&mut documents, mutation);
        self.persists.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// All-or-nothing: every mutation is validated against the evolving
    /// state before any is applied
    async fn persist_all(&self, mutations: Vec<Mutation>) -> Result<(), StoreError> {
        self.check_online()?;
        let mut documents = self.documents.write().await;

        let mut preview = documents.clone();
        for mutation in &mutations {
            Self::validate(&preview, mutation)?;
            Self::apply(&mut preview, mutation.clone());
        }

        self.persists
            .fetch_add(mutations.len() as u64, Ordering::Relaxed);
        *documents = preview;
        Ok(())
    }
}
