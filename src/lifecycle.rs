//! Lifecycle controller: install, activate and fetch signals.
//!
//! The hosting runtime owns dispatch. It calls one method per signal and keeps
//! the signal alive until the returned future completes.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

use crate::cache::{CacheStorage, NamespaceManager, OFFLINE};
use crate::classify::{Classifier, Strategy};
use crate::config::Config;
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;
use crate::offline::OfflineResolver;
use crate::strategy::{DetachedWrites, Served, StrategyEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Uninstalled,
  Installing,
  Active,
  Activating,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LifecycleState::Uninstalled => write!(f, "uninstalled"),
      LifecycleState::Installing => write!(f, "installing"),
      LifecycleState::Active => write!(f, "active"),
      LifecycleState::Activating => write!(f, "activating"),
    }
  }
}

/// Outcome of pruning stale namespaces on activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
  pub deleted: Vec<String>,
  pub retained: Vec<String>,
}

/// One method per inbound signal.
#[async_trait]
pub trait FetchHandler: Send + Sync {
  /// Populate the offline namespace. Fails if any offline resource fails.
  async fn on_install(&self) -> Result<()>;

  /// Delete every namespace not created by the current build.
  async fn on_activate(&self) -> Result<PruneReport>;

  /// Answer an intercepted request. Never fails.
  async fn on_fetch(&self, request: &Request) -> Served;
}

pub struct Controller<S: CacheStorage + 'static, N: Network> {
  classifier: Classifier,
  engine: StrategyEngine<S, N>,
  network: Arc<N>,
  /// Absolute URLs of the offline resources
  offline_resources: Vec<String>,
  state: Mutex<LifecycleState>,
}

impl<S: CacheStorage + 'static, N: Network> Controller<S, N> {
  pub fn new(
    classifier: Classifier,
    engine: StrategyEngine<S, N>,
    network: Arc<N>,
    offline_resources: Vec<String>,
  ) -> Self {
    info!(target: "sw", "ready, build version {}", engine.namespaces().version());
    Self {
      classifier,
      engine,
      network,
      offline_resources,
      state: Mutex::new(LifecycleState::Uninstalled),
    }
  }

  /// Wire every component from one config.
  pub fn from_config(
    config: &Config,
    storage: Arc<S>,
    network: Arc<N>,
    writes: DetachedWrites,
  ) -> Result<Self> {
    let namespaces = NamespaceManager::new(Arc::clone(&storage), config.version.clone());
    let offline = OfflineResolver::from_config(storage, config)?;
    let engine = StrategyEngine::new(namespaces, Arc::clone(&network), offline, writes);
    let offline_resources = config
      .offline_resources
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self::new(
      Classifier::from_config(config)?,
      engine,
      network,
      offline_resources,
    ))
  }

  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: LifecycleState) -> LifecycleState {
    let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *current, state)
  }

  /// Move to `next` only if nothing else changed the state since `expected` was set.
  fn restore_state(&self, expected: LifecycleState, next: LifecycleState) -> bool {
    let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if *current != expected {
      return false;
    }
    *current = next;
    true
  }

  pub fn classify(&self, request: &Request) -> Strategy {
    self.classifier.classify(request)
  }

  pub fn engine(&self) -> &StrategyEngine<S, N> {
    &self.engine
  }

  pub fn namespaces(&self) -> &NamespaceManager<S> {
    self.engine.namespaces()
  }

  /// Fetch every offline resource and store them all in the offline namespace.
  ///
  /// Fetches run concurrently; a transport failure or a non-2xx status on any
  /// of them aborts before anything is written.
  pub async fn update_static_cache(&self) -> Result<()> {
    let namespaces = self.namespaces();
    let namespace = namespaces.open(OFFLINE).await?;

    let fetches = self.offline_resources.iter().map(|url| async move {
      let request = Request::get(url.as_str());
      let response = self.network.fetch(&request).await?;
      if !response.is_ok() {
        return Err(eyre!("{} answered with status {}", url, response.status));
      }
      Ok::<(RequestKey, Response), color_eyre::Report>((request.key(), response))
    });

    let entries = try_join_all(fetches)
      .await
      .map_err(|e| eyre!("Failed to populate {}: {}", namespace, e))?;

    namespaces.storage().put_all(&namespace, &entries).await?;

    info!(target: "sw", "installation complete! {} entries in {}", entries.len(), namespace);
    Ok(())
  }

  /// Delete all namespaces not prefixed by the current build version.
  ///
  /// Deletions run concurrently and all of them are awaited; if any failed the
  /// whole operation fails, naming every key that could not be deleted.
  pub async fn remove_old_cache(&self) -> Result<PruneReport> {
    let namespaces = self.namespaces();
    let (retained, stale): (Vec<String>, Vec<String>) = namespaces
      .list_all()
      .await?
      .into_iter()
      .partition(|key| namespaces.is_current(key));

    let results = join_all(stale.iter().map(|key| async move {
      debug!(target: "sw", "(prune) {}", key);
      (key, namespaces.delete(key).await)
    }))
    .await;

    let mut report = PruneReport {
      deleted: Vec::new(),
      retained,
    };
    let mut failures = Vec::new();
    for (key, result) in results {
      match result {
        Ok(_) => report.deleted.push(key.clone()),
        Err(e) => failures.push(format!("{}: {}", key, e)),
      }
    }

    if !failures.is_empty() {
      return Err(eyre!(
        "Failed to delete {} stale namespace(s): {}",
        failures.len(),
        failures.join("; ")
      ));
    }

    info!(target: "sw", "removeOldCache completed, {} deleted", report.deleted.len());
    Ok(report)
  }
}

#[async_trait]
impl<S: CacheStorage + 'static, N: Network> FetchHandler for Controller<S, N> {
  async fn on_install(&self) -> Result<()> {
    info!(target: "sw", "install event in progress.");
    let previous = self.set_state(LifecycleState::Installing);

    match self.update_static_cache().await {
      Ok(()) => {
        self.set_state(LifecycleState::Active);
        Ok(())
      }
      Err(e) => {
        // An activation that finished meanwhile already left the state Active
        if !self.restore_state(LifecycleState::Installing, previous) {
          debug!(target: "sw", "install failed after state moved to {}", self.state());
        }
        Err(e)
      }
    }
  }

  async fn on_activate(&self) -> Result<PruneReport> {
    let state = self.state();
    if state != LifecycleState::Active {
      return Err(eyre!("Cannot activate while {}", state));
    }

    info!(target: "sw", "activate event in progress.");
    self.set_state(LifecycleState::Activating);
    let result = self.remove_old_cache().await;
    self.set_state(LifecycleState::Active);
    result
  }

  async fn on_fetch(&self, request: &Request) -> Served {
    let strategy = self.classify(request);
    debug!(target: "sw", "[{}] {} {}", strategy, request.method, request.url);
    self.engine.handle(strategy, request).await
  }
}
