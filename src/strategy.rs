//! Caching strategies.
//!
//! Every strategy resolves to a [`Served`]: network and store failures are
//! absorbed here and turned into the next fallback (cache, then offline artifact).

use chrono::{DateTime, Utc};
use color_eyre::Result;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{CacheStorage, CachedResponse, NamespaceManager, RESOURCES};
use crate::classify::Strategy;
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;
use crate::offline::OfflineResolver;

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// A previously stored copy of the request itself
  Cache,
  /// One of the canned offline artifacts
  Offline,
}

/// Result of handling a request, including where the response came from.
#[derive(Debug, Clone)]
pub struct Served {
  /// The response; `None` only when the offline artifact was never installed
  pub response: Option<Response>,
  pub source: ResponseSource,
  /// When the response was cached (cache and offline hits)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: Response) -> Self {
    Self {
      response: Some(response),
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(hit: CachedResponse) -> Self {
    Self {
      response: Some(hit.response),
      source: ResponseSource::Cache,
      cached_at: Some(hit.cached_at),
    }
  }

  pub fn offline(hit: Option<CachedResponse>) -> Self {
    Self {
      cached_at: hit.as_ref().map(|h| h.cached_at),
      response: hit.map(|h| h.response),
      source: ResponseSource::Offline,
    }
  }
}

/// A background cache write that failed.
#[derive(Debug, Clone)]
pub struct WriteFailure {
  pub namespace: String,
  pub key: RequestKey,
  pub error: String,
}

/// Fire-and-forget cache writes.
///
/// Callers never wait on a write; failures are logged and, if a channel was
/// attached, reported on it. [`DetachedWrites::settle`] waits for quiescence.
///
/// Writes are plain `tokio::spawn` tasks. Dropping this value (or the engine
/// owning it) detaches them; they still run to completion.
#[derive(Default)]
pub struct DetachedWrites {
  tasks: Mutex<Vec<JoinHandle<()>>>,
  failures: Option<mpsc::UnboundedSender<WriteFailure>>,
}

impl DetachedWrites {
  pub fn new(failures: Option<mpsc::UnboundedSender<WriteFailure>>) -> Self {
    Self {
      tasks: Mutex::new(Vec::new()),
      failures,
    }
  }

  /// Run `write` in the background. Must be called from within a tokio runtime.
  pub fn spawn<F>(&self, namespace: String, key: RequestKey, write: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    let failures = self.failures.clone();
    let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

    // Forget finished writes so the list only holds in-flight ones
    tasks.retain(|handle| !handle.is_finished());

    tasks.push(tokio::spawn(async move {
      if let Err(e) = write.await {
        warn!(target: "sw", "(cache write failed) {} in {}: {}", key, namespace, e);
        if let Some(tx) = failures {
          // Receiver gone means nobody is listening any more
          let _ = tx.send(WriteFailure {
            namespace,
            key,
            error: e.to_string(),
          });
        }
      }
    }));
  }

  /// Wait until every write spawned so far (and any spawned meanwhile) has finished.
  pub async fn settle(&self) {
    loop {
      let pending = {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *tasks)
      };
      if pending.is_empty() {
        return;
      }
      for handle in pending {
        // A panicked write has nothing left to wait for
        let _ = handle.await;
      }
    }
  }
}

/// Runs the three strategies against a store, a network and an offline resolver.
pub struct StrategyEngine<S: CacheStorage + 'static, N: Network> {
  namespaces: NamespaceManager<S>,
  network: Arc<N>,
  offline: OfflineResolver<S>,
  writes: DetachedWrites,
}

impl<S: CacheStorage + 'static, N: Network> StrategyEngine<S, N> {
  pub fn new(
    namespaces: NamespaceManager<S>,
    network: Arc<N>,
    offline: OfflineResolver<S>,
    writes: DetachedWrites,
  ) -> Self {
    Self {
      namespaces,
      network,
      offline,
      writes,
    }
  }

  pub async fn handle(&self, strategy: Strategy, request: &Request) -> Served {
    match strategy {
      Strategy::AlwaysNetwork => self.networked_or_offline(request).await,
      Strategy::FetchAndCache => self.networked_or_cached(request).await,
      Strategy::CacheFirst => self.cached_or_networked(request).await,
    }
  }

  /// Network only; offline artifact when the network fails.
  pub async fn networked_or_offline(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => {
        debug!(target: "sw", "(network) {} {}", request.method, request.url);
        Served::from_network(response)
      }
      Err(e) => {
        debug!(target: "sw", "(network failed) {} {}: {}", request.method, request.url, e);
        self.offline_response(request).await
      }
    }
  }

  /// Network with cache write; stored copy or offline artifact when the network fails.
  pub async fn networked_or_cached(&self, request: &Request) -> Served {
    match self.networked_and_cache(request).await {
      Ok(response) => Served::from_network(response),
      Err(e) => {
        debug!(target: "sw", "(network failed) {} {}: {}", request.method, request.url, e);
        self.cached_or_offline(request).await
      }
    }
  }

  /// Stored copy first; network with cache write on a miss; offline artifact last.
  pub async fn cached_or_networked(&self, request: &Request) -> Served {
    if let Some(hit) = self.lookup(request).await {
      debug!(target: "sw", "(cached) {} {}", request.method, request.url);
      return Served::from_cache(hit);
    }

    debug!(target: "sw", "(network: cache miss) {} {}", request.method, request.url);
    match self.networked_and_cache(request).await {
      Ok(response) => Served::from_network(response),
      Err(e) => {
        debug!(target: "sw", "(network failed) {} {}: {}", request.method, request.url, e);
        self.offline_response(request).await
      }
    }
  }

  /// Fetch from the network and write a copy into the resources namespace in the background.
  ///
  /// The response is returned without waiting for the write; write failures never
  /// reach the caller.
  pub async fn networked_and_cache(&self, request: &Request) -> Result<Response> {
    let response = self.network.fetch(request).await?;

    let copy = response.clone();
    let storage = Arc::clone(self.namespaces.storage());
    let namespace = self.namespaces.key(RESOURCES);
    let key = request.key();
    let write = {
      let namespace = namespace.clone();
      let key = key.clone();
      async move {
        storage.open(&namespace).await?;
        storage.put(&namespace, &key, &copy).await
      }
    };
    self.writes.spawn(namespace, key, write);

    debug!(target: "sw", "(network: cache write) {} {}", request.method, request.url);
    Ok(response)
  }

  /// Stored copy, else offline artifact.
  pub async fn cached_or_offline(&self, request: &Request) -> Served {
    match self.lookup(request).await {
      Some(hit) => Served::from_cache(hit),
      None => self.offline_response(request).await,
    }
  }

  pub async fn offline_response(&self, request: &Request) -> Served {
    Served::offline(self.offline.resolve(request).await)
  }

  /// Wait for all background cache writes to finish.
  pub async fn settle(&self) {
    self.writes.settle().await;
  }

  pub fn namespaces(&self) -> &NamespaceManager<S> {
    &self.namespaces
  }

  /// Look the request up across every namespace; store errors count as a miss.
  async fn lookup(&self, request: &Request) -> Option<CachedResponse> {
    match self.namespaces.storage().match_any(&request.key()).await {
      Ok(hit) => hit,
      Err(e) => {
        warn!(target: "sw", "(cache read failed) {} {}: {}", request.method, request.url, e);
        None
      }
    }
  }
}
