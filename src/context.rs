//! Unit-of-work handles
//!
//! A [`UnitOfWork`] is the explicit context every cache operation receives.
//! It carries:
//! - the session cache of the current request or transaction
//! - the active transaction, if any
//! - a node in the cancellation tree
//!
//! Handles form a tree: [`UnitOfWork::derive`] creates a child that shares
//! the parent's session and transaction, and cancelling a handle cancels
//! every handle derived from it, never its parent.

use crate::cache::SessionCache;
use crate::transaction::{TransactionState, TransactionStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

/// Handle on one logical unit of work
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    id: String,
    parent_id: Option<String>,
    session: Arc<SessionCache>,
    transaction: Option<Arc<TransactionState>>,
    cancellation: Arc<CancelNode>,
}

impl UnitOfWork {
    /// Start a request-scoped unit of work with an empty session cache
    pub fn new() -> Self {
        let uow = Self {
            id: new_id(),
            parent_id: None,
            session: Arc::new(SessionCache::new()),
            transaction: None,
            cancellation: Arc::new(CancelNode::default()),
        };
        debug!("Started unit of work {} ({})", uow.id, uow.session.id());
        uow
    }

    /// Unique id of this handle
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the handle this one was derived from
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Session cache of this unit of work
    pub fn session(&self) -> &Arc<SessionCache> {
        &self.session
    }

    /// Child handle sharing session and transaction, with its own
    /// cancellation scope
    pub fn derive(&self) -> Self {
        Self {
            id: new_id(),
            parent_id: Some(self.id.clone()),
            session: self.session.clone(),
            transaction: self.transaction.clone(),
            cancellation: CancelNode::child_of(&self.cancellation),
        }
    }

    /// Child handle bound to a new transaction with a fresh session cache
    pub(crate) fn begin_transaction(&self, state: Arc<TransactionState>) -> Self {
        Self {
            id: new_id(),
            parent_id: Some(self.id.clone()),
            session: Arc::new(SessionCache::new()),
            transaction: Some(state),
            cancellation: CancelNode::child_of(&self.cancellation),
        }
    }

    /// Transaction this handle belongs to while it is still active
    pub fn active_transaction(&self) -> Option<&Arc<TransactionState>> {
        self.transaction.as_ref().filter(|state| state.is_active())
    }

    /// Whether shared cache writes are currently deferred
    pub fn in_transaction(&self) -> bool {
        self.active_transaction().is_some()
    }

    /// Status of the transaction bound to this handle, `Idle` if none
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction
            .as_ref()
            .map(|state| state.status())
            .unwrap_or(TransactionStatus::Idle)
    }

    /// Cancel this handle and everything derived from it
    pub fn cancel(&self) {
        debug!("Cancelling unit of work {}", self.id);
        self.cancellation.cancel();
    }

    /// Whether this handle or one of its ancestors was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Wait until the handle is cancelled
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

fn new_id() -> String {
    format!("uow-{}", Uuid::new_v4().to_string().split('-').next().unwrap_or_default())
}

/// Node in the cancellation tree
#[derive(Debug, Default)]
struct CancelNode {
    cancelled: AtomicBool,
    notify: Notify,
    children: Mutex<Vec<Weak<CancelNode>>>,
}

impl CancelNode {
    fn child_of(parent: &Arc<CancelNode>) -> Arc<CancelNode> {
        let child = Arc::new(CancelNode::default());

        let mut children = parent.children.lock().unwrap_or_else(PoisonError::into_inner);
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child));
        // Checked under the lock so a concurrent cancel cannot skip the child
        if parent.is_cancelled() {
            child.cancel();
        }
        drop(children);

        child
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        let children: Vec<Arc<CancelNode>> = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in children {
            child.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
