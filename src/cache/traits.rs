//! Core trait and types for the cache store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::{RequestKey, Response};

/// A response snapshot read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  /// The stored snapshot
  pub response: Response,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Writes to the same key race; the last one wins.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Open a namespace, creating it if needed.
  async fn open(&self, namespace: &str) -> Result<()>;

  /// Store a single entry, replacing any previous entry for the same key.
  async fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store several entries atomically: either all are written or none are.
  async fn put_all(&self, namespace: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Look up an entry in one namespace.
  async fn match_in(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Look up an entry across all namespaces in creation order; first hit wins.
  async fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Existing namespace keys in creation order.
  async fn keys(&self) -> Result<Vec<String>>;

  /// Delete a namespace and its entries. Returns false if it did not exist.
  async fn delete(&self, namespace: &str) -> Result<bool>;

  /// Number of entries held by a namespace.
  async fn entry_count(&self, namespace: &str) -> Result<usize>;
}
