//! Error types for cache operations
//!
//! This module defines the error conditions surfaced by the cache tiers,
//! the coordinator and the external store collaborator.

use crate::cache::CacheKey;
use thiserror::Error;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key absent or expired - recoverable, fall back to the next tier or the store
    #[error("Cache miss: {key}")]
    CacheMiss { key: CacheKey },

    /// Entity has no usable cache key
    #[error("Invalid identity in collection '{collection}': {reason}")]
    InvalidIdentity { collection: String, reason: String },

    /// Store write inside a transaction that has no store flush; open it
    /// with `EntityClient::transaction` instead
    #[error("Transaction {transaction} cannot carry store writes")]
    UnflushedWrite { transaction: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// External store failure (wrapper)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CacheError {
    /// Build a miss for the given key
    pub fn miss(key: &CacheKey) -> Self {
        CacheError::CacheMiss { key: key.clone() }
    }

    /// Whether this error only signals "ask the next tier"
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::CacheMiss { .. })
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors reported by a [`DocumentStore`](crate::store::DocumentStore) implementation
///
/// The cache core treats these as opaque: a failed store call simply leaves
/// the cache untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing database could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A create hit an existing document, or an update a missing one
    #[error("Conflicting write on {key}")]
    Conflict { key: CacheKey },

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl From<String> for StoreError {
    fn from(s: String) -> Self {
        StoreError::Other(s)
    }
}

impl From<&str> for StoreError {
    fn from(s: &str) -> Self {
        StoreError::Other(s.to_string())
    }
}
