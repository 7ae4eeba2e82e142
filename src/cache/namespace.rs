//! Versioned namespace naming on top of a [`CacheStorage`].

use color_eyre::Result;
use std::sync::Arc;

use super::traits::CacheStorage;
use crate::config::NAMESPACE_SEPARATOR;

/// Holds the static offline shell and fallback assets.
pub const OFFLINE: &str = "offline";
/// Holds opportunistically cached network responses.
pub const RESOURCES: &str = "resources";

/// Builds `<version>:<purpose>` keys and manages the namespaces behind them.
pub struct NamespaceManager<S: CacheStorage> {
  storage: Arc<S>,
  version: String,
}

impl<S: CacheStorage> NamespaceManager<S> {
  pub fn new(storage: Arc<S>, version: impl Into<String>) -> Self {
    Self {
      storage,
      version: version.into(),
    }
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Deterministic key for a purpose tag under the current build version.
  pub fn key(&self, purpose: &str) -> String {
    [self.version.as_str(), purpose].join(NAMESPACE_SEPARATOR)
  }

  /// Open (or create) the namespace for a purpose tag and return its key.
  pub async fn open(&self, purpose: &str) -> Result<String> {
    let key = self.key(purpose);
    self.storage.open(&key).await?;
    Ok(key)
  }

  pub async fn list_all(&self) -> Result<Vec<String>> {
    self.storage.keys().await
  }

  /// Delete a namespace; deleting one that does not exist is a no-op.
  pub async fn delete(&self, key: &str) -> Result<bool> {
    self.storage.delete(key).await
  }

  /// Whether a namespace key was created by the current build.
  pub fn is_current(&self, key: &str) -> bool {
    key
      .strip_prefix(self.version.as_str())
      .is_some_and(|rest| rest.starts_with(NAMESPACE_SEPARATOR))
  }
}

impl<S: CacheStorage> Clone for NamespaceManager<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      version: self.version.clone(),
    }
  }
}
