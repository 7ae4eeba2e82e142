//! Test doubles for the store and network collaborators.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::cache::{CacheStorage, CachedResponse, MemoryStorage, NamespaceManager};
use crate::config::DEFAULT_IMAGE_PATTERN;
use crate::http::{Request, RequestKey, Response};
use crate::matcher::PatternSet;
use crate::network::Network;
use crate::offline::OfflineResolver;
use crate::strategy::{DetachedWrites, StrategyEngine};

pub const PAGE_URL: &str = "https://example.com/offline/index.html";
pub const IMAGE_URL: &str = "https://example.com/offline/placeholder.svg";

/// Shared open/closed switch that suspends a double's calls while closed.
#[derive(Clone)]
pub struct Gate {
  tx: Arc<watch::Sender<bool>>,
}

impl Default for Gate {
  fn default() -> Self {
    Self {
      tx: Arc::new(watch::channel(true).0),
    }
  }
}

impl Gate {
  pub fn open(&self) {
    self.tx.send_replace(true);
  }

  pub fn close(&self) {
    self.tx.send_replace(false);
  }

  /// Wait until the gate is open.
  pub async fn pass(&self) {
    let mut rx = self.tx.subscribe();
    // The sender lives in self, so the channel cannot close while waiting
    let _ = rx.wait_for(|open| *open).await;
  }
}

#[derive(Default)]
struct Script {
  responses: HashMap<String, Response>,
  calls: HashMap<String, usize>,
  offline: bool,
}

/// Network that answers from a fixed table; unknown URLs fail like a dropped connection.
#[derive(Clone, Default)]
pub struct ScriptedNetwork {
  script: Arc<Mutex<Script>>,
  gate: Gate,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(self, url: &str, response: Response) -> Self {
    self.set_response(url, response);
    self
  }

  pub fn set_response(&self, url: &str, response: Response) {
    self
      .script
      .lock()
      .unwrap()
      .responses
      .insert(url.to_string(), response);
  }

  /// Suspend every fetch until the returned gate is opened.
  pub fn hold_fetches(&self) -> Gate {
    self.gate.close();
    self.gate.clone()
  }

  pub fn go_offline(&self) {
    self.script.lock().unwrap().offline = true;
  }

  pub fn calls(&self, url: &str) -> usize {
    self
      .script
      .lock()
      .unwrap()
      .calls
      .get(url)
      .copied()
      .unwrap_or(0)
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.gate.pass().await;
    let mut script = self.script.lock().unwrap();
    *script.calls.entry(request.url.clone()).or_default() += 1;
    if script.offline {
      return Err(eyre!("network unreachable"));
    }
    script
      .responses
      .get(&request.url)
      .cloned()
      .ok_or_else(|| eyre!("connection refused: {}", request.url))
  }
}

/// Store wrapper that fails selected operations on demand.
pub struct FailingStorage<S: CacheStorage> {
  inner: S,
  reads: AtomicBool,
  writes: AtomicBool,
  deletes: Mutex<HashSet<String>>,
  delete_gate: Gate,
}

impl<S: CacheStorage> FailingStorage<S> {
  pub fn new(inner: S) -> Self {
    Self {
      inner,
      reads: AtomicBool::new(false),
      writes: AtomicBool::new(false),
      deletes: Mutex::new(HashSet::new()),
      delete_gate: Gate::default(),
    }
  }

  pub fn fail_reads(&self, fail: bool) {
    self.reads.store(fail, Ordering::SeqCst);
  }

  pub fn fail_writes(&self, fail: bool) {
    self.writes.store(fail, Ordering::SeqCst);
  }

  pub fn fail_delete_of(&self, namespace: &str) {
    self.deletes.lock().unwrap().insert(namespace.to_string());
  }

  /// Suspend every delete until the returned gate is opened.
  pub fn hold_deletes(&self) -> Gate {
    self.delete_gate.close();
    self.delete_gate.clone()
  }

  fn check_read(&self) -> Result<()> {
    if self.reads.load(Ordering::SeqCst) {
      return Err(eyre!("disk I/O error"));
    }
    Ok(())
  }

  fn check_write(&self) -> Result<()> {
    if self.writes.load(Ordering::SeqCst) {
      return Err(eyre!("quota exceeded"));
    }
    Ok(())
  }
}

#[async_trait]
impl<S: CacheStorage> CacheStorage for FailingStorage<S> {
  async fn open(&self, namespace: &str) -> Result<()> {
    self.check_write()?;
    self.inner.open(namespace).await
  }

  async fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.check_write()?;
    self.inner.put(namespace, key, response).await
  }

  async fn put_all(&self, namespace: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    self.check_write()?;
    self.inner.put_all(namespace, entries).await
  }

  async fn match_in(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.check_read()?;
    self.inner.match_in(namespace, key).await
  }

  async fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    self.check_read()?;
    self.inner.match_any(key).await
  }

  async fn keys(&self) -> Result<Vec<String>> {
    self.check_read()?;
    self.inner.keys().await
  }

  async fn delete(&self, namespace: &str) -> Result<bool> {
    if self.deletes.lock().unwrap().contains(namespace) {
      return Err(eyre!("database is locked"));
    }
    self.delete_gate.pass().await;
    self.inner.delete(namespace).await
  }

  async fn entry_count(&self, namespace: &str) -> Result<usize> {
    self.check_read()?;
    self.inner.entry_count(namespace).await
  }
}

/// Engine over a memory store whose `v1:offline` namespace already holds both artifacts.
pub async fn engine(
  network: ScriptedNetwork,
) -> (
  StrategyEngine<MemoryStorage, ScriptedNetwork>,
  Arc<MemoryStorage>,
) {
  let storage = Arc::new(MemoryStorage::new());
  storage
    .put_all(
      "v1:offline",
      &[
        (
          RequestKey::get(PAGE_URL),
          Response::new(200, "<h1>offline</h1>"),
        ),
        (RequestKey::get(IMAGE_URL), Response::new(200, "<svg/>")),
      ],
    )
    .await
    .unwrap();

  let namespaces = NamespaceManager::new(Arc::clone(&storage), "v1");
  let offline = OfflineResolver::new(
    Arc::clone(&storage),
    PatternSet::compile([DEFAULT_IMAGE_PATTERN]).unwrap(),
    PAGE_URL.to_string(),
    IMAGE_URL.to_string(),
  );
  let engine = StrategyEngine::new(
    namespaces,
    Arc::new(network),
    offline,
    DetachedWrites::default(),
  );

  (engine, storage)
}
