//! Transaction boundary
//!
//! [`CacheCoordinator::transaction`] runs a closure on a derived unit of work
//! with its own session cache. Shared cache mutations issued inside are
//! staged and replayed in order on commit. Any other outcome (an `Err`, a
//! panic, cancellation of the unit of work, or the future being dropped)
//! rolls back: the staged log and the transaction's session cache are
//! discarded and the shared cache is left untouched.
//!
//! A transaction started on a handle that is already inside one joins the
//! outer transaction; only the outermost boundary commits or rolls back.
//!
//! Store writes can only be queued on a transaction that flushes them
//! (one opened by [`EntityClient::transaction`](crate::client::EntityClient::transaction)).
//! Once that flush succeeds the transaction commits, even if the unit of work
//! is cancelled meanwhile. If the flush fails or is interrupted, every key
//! the transaction touched is evicted from the shared cache and the caller's
//! session, since the store may hold part of the batch.

use crate::cache::{CacheEntry, CacheKey, SessionCache, SharedCache};
use crate::context::UnitOfWork;
use crate::coordinator::CacheCoordinator;
use crate::store::Mutation;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// No transaction bound
    Idle,
    /// Staging mutations
    Active,
    /// Staged mutations were applied
    Committed,
    /// Staged mutations were discarded
    RolledBack,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Idle => write!(f, "idle"),
            TransactionStatus::Active => write!(f, "active"),
            TransactionStatus::Committed => write!(f, "committed"),
            TransactionStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// A shared cache mutation waiting for commit
#[derive(Debug, Clone, PartialEq)]
pub enum StagedMutation {
    /// Set the key (entity fields or absence marker)
    Put { key: CacheKey, entry: CacheEntry },
    /// Entity deleted: evict from the shared tier, tombstone in sessions
    Delete { key: CacheKey },
    /// Forget the key everywhere
    Invalidate { key: CacheKey },
}

impl StagedMutation {
    /// Key the mutation targets
    pub fn key(&self) -> &CacheKey {
        match self {
            StagedMutation::Put { key, .. }
            | StagedMutation::Delete { key }
            | StagedMutation::Invalidate { key } => key,
        }
    }

    pub(crate) fn apply_to_shared(self, shared: &SharedCache) {
        match self {
            StagedMutation::Put { key, entry } => shared.set(key, entry),
            StagedMutation::Delete { key } | StagedMutation::Invalidate { key } => {
                shared.delete(&key);
            }
        }
    }

    pub(crate) fn apply_to_session(&self, session: &SessionCache) {
        match self {
            StagedMutation::Put { key, entry } => session.set(key.clone(), entry.clone()),
            StagedMutation::Delete { key } => session.delete(key.clone()),
            StagedMutation::Invalidate { key } => {
                session.forget(key);
            }
        }
    }
}

/// Failure of a transaction; the shared cache was not modified
#[derive(Error, Debug)]
pub enum TransactionError<E> {
    /// The closure returned an error; it is carried unchanged
    #[error("Transaction aborted: {0}")]
    Aborted(E),

    /// The closure panicked
    #[error("Transaction panicked: {0}")]
    Panicked(String),

    /// The unit of work was cancelled before commit
    #[error("Transaction cancelled before commit")]
    Cancelled,
}

impl<E> TransactionError<E> {
    /// The closure's own error, if that is what aborted the transaction
    pub fn into_cause(self) -> Option<E> {
        match self {
            TransactionError::Aborted(cause) => Some(cause),
            _ => None,
        }
    }

    /// Borrow the closure's own error
    pub fn cause(&self) -> Option<&E> {
        match self {
            TransactionError::Aborted(cause) => Some(cause),
            _ => None,
        }
    }
}

/// State shared by every handle of one transaction
pub struct TransactionState {
    id: String,
    parent_session: Arc<SessionCache>,
    flushes_writes: bool,
    inner: Mutex<TransactionInner>,
}

struct TransactionInner {
    status: TransactionStatus,
    staged: Vec<StagedMutation>,
    writes: Vec<Mutation>,
}

impl TransactionState {
    fn new(parent_session: Arc<SessionCache>, flushes_writes: bool) -> Self {
        Self {
            id: format!("tx-{}", Uuid::new_v4().to_string().split('-').next().unwrap_or_default()),
            parent_session,
            flushes_writes,
            inner: Mutex::new(TransactionInner {
                status: TransactionStatus::Active,
                staged: Vec::new(),
                writes: Vec::new(),
            }),
        }
    }

    /// Transaction id used in log lines
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether queued store writes are flushed before commit
    pub fn flushes_writes(&self) -> bool {
        self.flushes_writes
    }

    /// Current status
    pub fn status(&self) -> TransactionStatus {
        self.lock().status
    }

    /// Whether mutations are still being staged
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// Number of cache mutations waiting for commit
    pub fn staged_len(&self) -> usize {
        self.lock().staged.len()
    }

    /// Copy of the staged cache mutations in issue order
    pub fn staged(&self) -> Vec<StagedMutation> {
        self.lock().staged.clone()
    }

    /// Queue a cache mutation; hands it back if the transaction already ended
    pub(crate) fn stage(&self, mutation: StagedMutation) -> Result<(), StagedMutation> {
        let mut inner = self.lock();
        if inner.status != TransactionStatus::Active {
            return Err(mutation);
        }
        debug!("Transaction {} staged mutation for {}", self.id, mutation.key());
        inner.staged.push(mutation);
        Ok(())
    }

    /// Queue a store write; hands it back if the transaction already ended
    ///
    /// Callers check [`flushes_writes`](Self::flushes_writes) first.
    pub(crate) fn stage_write(&self, write: Mutation) -> Result<(), Mutation> {
        debug_assert!(self.flushes_writes);
        let mut inner = self.lock();
        if inner.status != TransactionStatus::Active {
            return Err(write);
        }
        inner.writes.push(write);
        Ok(())
    }

    // Keys of the staged mutations, sorted and deduplicated
    fn staged_keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.lock().staged.iter().map(|m| m.key().clone()).collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Take the store writes queued so far
    pub(crate) fn take_writes(&self) -> Vec<Mutation> {
        std::mem::take(&mut self.lock().writes)
    }

    // Transition out of Active; returns the staged log when committing
    fn finish(&self, status: TransactionStatus) -> Vec<StagedMutation> {
        let mut inner = self.lock();
        inner.status = status;
        inner.writes.clear();
        let staged = std::mem::take(&mut inner.staged);
        if status == TransactionStatus::Committed {
            staged
        } else {
            Vec::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransactionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionState")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("staged", &self.staged_len())
            .finish()
    }
}

// Rolls back unless disarmed by a commit, including when the transaction
// future is dropped mid-flight
struct RollbackGuard {
    state: Arc<TransactionState>,
    session: Arc<SessionCache>,
    shared: Arc<SharedCache>,
    armed: bool,
    // Set once the store flush starts; rollback must then evict
    store_touched: bool,
}

impl RollbackGuard {
    fn rollback(&mut self, reason: &str) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let evicted = if self.store_touched {
            self.state.staged_keys()
        } else {
            Vec::new()
        };
        let discarded = self.state.staged_len();
        self.state.finish(TransactionStatus::RolledBack);
        self.session.clear();

        for key in &evicted {
            self.state.parent_session.forget(key);
            self.shared.delete(key);
        }

        warn!(
            "Rolled back transaction {} ({}); discarded {} staged mutations, evicted {} keys",
            self.state.id,
            reason,
            discarded,
            evicted.len()
        );
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        self.rollback("dropped before completion");
    }
}

impl CacheCoordinator {
    /// Run `f` as a cache-only transaction
    ///
    /// `f` receives a derived unit of work whose session cache starts empty.
    /// On `Ok` the staged mutations reach the shared cache in issue order and
    /// the caller's session; on any other outcome they are discarded.
    ///
    /// Nothing here talks to the store, so
    /// [`EntityClient`](crate::client::EntityClient) writes inside `f` fail
    /// with [`CacheError::UnflushedWrite`](crate::error::CacheError::UnflushedWrite).
    pub async fn transaction<F, Fut, T, E>(
        &self,
        uow: &UnitOfWork,
        f: F,
    ) -> Result<T, TransactionError<E>>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_transaction(uow, f, false, |_| async { Ok(()) }).await
    }

    /// Like [`transaction`](Self::transaction), with a flush step that runs
    /// after `f` succeeds and before the cache commit; its failure rolls back
    pub(crate) async fn transaction_with_hook<F, Fut, H, HFut, T, E>(
        &self,
        uow: &UnitOfWork,
        f: F,
        before_commit: H,
    ) -> Result<T, TransactionError<E>>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        H: FnOnce(Arc<TransactionState>) -> HFut,
        HFut: Future<Output = Result<(), E>>,
    {
        self.run_transaction(uow, f, true, before_commit).await
    }

    async fn run_transaction<F, Fut, H, HFut, T, E>(
        &self,
        uow: &UnitOfWork,
        f: F,
        flushes_writes: bool,
        before_commit: H,
    ) -> Result<T, TransactionError<E>>
    where
        F: FnOnce(UnitOfWork) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        H: FnOnce(Arc<TransactionState>) -> HFut,
        HFut: Future<Output = Result<(), E>>,
    {
        if let Some(outer) = uow.active_transaction() {
            debug!("Joining transaction {}", outer.id());
            return f(uow.derive()).await.map_err(TransactionError::Aborted);
        }

        let state = Arc::new(TransactionState::new(uow.session().clone(), flushes_writes));
        let tx_uow = uow.begin_transaction(state.clone());
        let handle = tx_uow.clone();
        let mut guard = RollbackGuard {
            state: state.clone(),
            session: tx_uow.session().clone(),
            shared: self.shared().clone(),
            armed: true,
            store_touched: false,
        };
        info!("Began transaction {} on {}", state.id(), uow.id());

        let outcome = AssertUnwindSafe(async move { f(tx_uow).await })
            .catch_unwind()
            .await;

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(cause)) => {
                guard.rollback("closure returned an error");
                return Err(TransactionError::Aborted(cause));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                guard.rollback("closure panicked");
                return Err(TransactionError::Panicked(message));
            }
        };

        if handle.is_cancelled() {
            guard.rollback("cancelled");
            return Err(TransactionError::Cancelled);
        }

        guard.store_touched = flushes_writes;
        if let Err(cause) = before_commit(state.clone()).await {
            guard.rollback("store flush failed");
            return Err(TransactionError::Aborted(cause));
        }

        // The store holds the batch now; cancellation no longer rolls back
        if handle.is_cancelled() {
            debug!("Transaction {} cancelled after its store flush; committing", state.id());
        }

        guard.disarm();
        self.commit(&state, handle.session());
        Ok(value)
    }

    fn commit(&self, state: &TransactionState, session: &SessionCache) {
        let staged = state.finish(TransactionStatus::Committed);
        let count = staged.len();

        for mutation in staged {
            mutation.apply_to_session(&state.parent_session);
            mutation.apply_to_shared(self.shared());
        }
        session.clear();

        info!("Committed transaction {} ({} mutations)", state.id(), count);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
