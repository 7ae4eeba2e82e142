//! Cache storage implementations: SQLite for persistence, memory for ephemeral runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use super::traits::{CacheStorage, CachedResponse};
use crate::http::{HeaderList, RequestKey, Response};

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A private database that disappears with the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Namespaces, in creation order
CREATE TABLE IF NOT EXISTS namespaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request identity
CREATE TABLE IF NOT EXISTS entries (
    namespace TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    digest TEXT NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (namespace, method, url)
);

CREATE INDEX IF NOT EXISTS idx_entries_request ON entries(method, url);
"#;

/// Raw entry columns as read from SQLite.
type EntryRow = (String, u16, String, Vec<u8>, String, String);

fn insert_namespace(conn: &Connection, namespace: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO namespaces (name) VALUES (?)",
      params![namespace],
    )
    .map_err(|e| eyre!("Failed to create namespace {}: {}", namespace, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  namespace: &str,
  key: &RequestKey,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (namespace, method, url, status, headers, body, digest, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        namespace,
        key.method,
        key.url,
        response.status,
        headers,
        response.body,
        body_digest(&response.body),
        Utc::now().to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store {} in {}: {}", key, namespace, e))?;

  Ok(())
}

/// Rebuild a snapshot, rejecting rows whose body no longer matches its digest.
fn decode_entry(key: &RequestKey, row: EntryRow) -> Result<Option<CachedResponse>> {
  let (namespace, status, headers, body, digest, cached_at) = row;

  if body_digest(&body) != digest {
    warn!(target: "sw", "(corrupt entry) {} in {}", key, namespace);
    return Ok(None);
  }

  let headers: HeaderList = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;

  Ok(Some(CachedResponse {
    response: Response {
      status,
      headers,
      body,
    },
    cached_at: parse_datetime(&cached_at)?,
  }))
}

#[async_trait]
impl CacheStorage for SqliteStorage {
  async fn open(&self, namespace: &str) -> Result<()> {
    insert_namespace(&*self.lock()?, namespace)
  }

  async fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    insert_namespace(&conn, namespace)?;
    insert_entry(&conn, namespace, key, response)
  }

  async fn put_all(&self, namespace: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    insert_namespace(&tx, namespace)?;
    for (key, response) in entries {
      insert_entry(&tx, namespace, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  async fn match_in(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT namespace, status, headers, body, digest, cached_at FROM entries
         WHERE namespace = ? AND method = ? AND url = ?",
        params![namespace, key.method, key.url],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?;

    match row {
      Some(row) => decode_entry(key, row),
      None => Ok(None),
    }
  }

  async fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT e.namespace, e.status, e.headers, e.body, e.digest, e.cached_at FROM entries e
         INNER JOIN namespaces n ON n.name = e.namespace
         WHERE e.method = ? AND e.url = ?
         ORDER BY n.id",
      )
      .map_err(|e| eyre!("Failed to prepare lookup: {}", e))?;

    let rows: Vec<EntryRow> = stmt
      .query_map(params![key.method, key.url], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to look up {}: {}", key, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entry for {}: {}", key, e))?;

    for row in rows {
      if let Some(hit) = decode_entry(key, row)? {
        return Ok(Some(hit));
      }
    }

    Ok(None)
  }

  async fn keys(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM namespaces ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespace: {}", e))?;

    Ok(keys)
  }

  async fn delete(&self, namespace: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE namespace = ?", params![namespace])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", namespace, e))?;
    let removed = tx
      .execute("DELETE FROM namespaces WHERE name = ?", params![namespace])
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", namespace, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  async fn entry_count(&self, namespace: &str) -> Result<usize> {
    let count: i64 = self
      .lock()?
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE namespace = ?",
        params![namespace],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", namespace, e))?;

    Ok(count as usize)
  }
}

/// In-process storage with the same semantics as [`SqliteStorage`].
#[derive(Default)]
pub struct MemoryStorage {
  namespaces: Mutex<Vec<(String, BTreeMap<RequestKey, CachedResponse>)>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Vec<(String, BTreeMap<RequestKey, CachedResponse>)>>> {
    self.namespaces.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn namespace_mut<'a>(
  namespaces: &'a mut Vec<(String, BTreeMap<RequestKey, CachedResponse>)>,
  name: &str,
) -> &'a mut BTreeMap<RequestKey, CachedResponse> {
  let index = match namespaces.iter().position(|(n, _)| n == name) {
    Some(index) => index,
    None => {
      namespaces.push((name.to_string(), BTreeMap::new()));
      namespaces.len() - 1
    }
  };
  &mut namespaces[index].1
}

fn snapshot(response: &Response) -> CachedResponse {
  CachedResponse {
    response: response.clone(),
    cached_at: Utc::now(),
  }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  async fn open(&self, namespace: &str) -> Result<()> {
    namespace_mut(&mut *self.lock()?, namespace);
    Ok(())
  }

  async fn put(&self, namespace: &str, key: &RequestKey, response: &Response) -> Result<()> {
    namespace_mut(&mut *self.lock()?, namespace).insert(key.clone(), snapshot(response));
    Ok(())
  }

  async fn put_all(&self, namespace: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    // Nothing here can fail halfway, so a single locked pass is atomic.
    let mut namespaces = self.lock()?;
    let ns = namespace_mut(&mut namespaces, namespace);
    for (key, response) in entries {
      ns.insert(key.clone(), snapshot(response));
    }
    Ok(())
  }

  async fn match_in(&self, namespace: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    Ok(
      self
        .lock()?
        .iter()
        .find(|(n, _)| n == namespace)
        .and_then(|(_, entries)| entries.get(key).cloned()),
    )
  }

  async fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    Ok(
      self
        .lock()?
        .iter()
        .find_map(|(_, entries)| entries.get(key).cloned()),
    )
  }

  async fn keys(&self) -> Result<Vec<String>> {
    Ok(self.lock()?.iter().map(|(n, _)| n.clone()).collect())
  }

  async fn delete(&self, namespace: &str) -> Result<bool> {
    let mut namespaces = self.lock()?;
    let before = namespaces.len();
    namespaces.retain(|(n, _)| n != namespace);
    Ok(namespaces.len() < before)
  }

  async fn entry_count(&self, namespace: &str) -> Result<usize> {
    Ok(
      self
        .lock()?
        .iter()
        .find(|(n, _)| n == namespace)
        .map_or(0, |(_, entries)| entries.len()),
    )
  }
}

/// SHA-256 of a body, hex encoded.
fn body_digest(body: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(body);
  hex::encode(hasher.finalize())
}

/// Parse a timestamp written by [`insert_entry`].
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn page(body: &str) -> Response {
    Response::new(200, body).with_header("content-type", "text/html")
  }

  async fn exercise_store(store: &dyn CacheStorage) {
    let a = RequestKey::get("https://example.com/a");
    let b = RequestKey::get("https://example.com/b");

    store.open("v1:offline").await.unwrap();
    store.put("v1:resources", &a, &page("first")).await.unwrap();
    store.put("v1:resources", &a, &page("second")).await.unwrap();
    store
      .put_all("v2:offline", &[(a.clone(), page("v2")), (b.clone(), page("b"))])
      .await
      .unwrap();

    assert_eq!(
      store.keys().await.unwrap(),
      vec!["v1:offline", "v1:resources", "v2:offline"]
    );
    assert_eq!(store.entry_count("v1:resources").await.unwrap(), 1);
    assert_eq!(store.entry_count("v1:offline").await.unwrap(), 0);

    let hit = store.match_in("v1:resources", &a).await.unwrap().unwrap();
    assert_eq!(hit.response.body, b"second");
    assert_eq!(hit.response.header("content-type"), Some(&b"text/html"[..]));

    // Creation order decides between namespaces holding the same key
    let any = store.match_any(&a).await.unwrap().unwrap();
    assert_eq!(any.response.body, b"second");
    assert!(store.match_in("v1:offline", &b).await.unwrap().is_none());
    assert_eq!(
      store.match_any(&b).await.unwrap().unwrap().response.body,
      b"b"
    );

    let head = RequestKey {
      method: "HEAD".to_string(),
      url: a.url.clone(),
    };
    assert!(store.match_any(&head).await.unwrap().is_none());

    assert!(store.delete("v1:resources").await.unwrap());
    assert!(!store.delete("v1:resources").await.unwrap());
    assert_eq!(store.keys().await.unwrap(), vec!["v1:offline", "v2:offline"]);
    assert_eq!(
      store.match_any(&a).await.unwrap().unwrap().response.body,
      b"v2"
    );

    // Header fields replay exactly: repeats, order and non-ASCII bytes
    let download = RequestKey::get("https://example.com/report");
    let response = Response::new(200, "csv")
      .with_header("set-cookie", "a=1")
      .with_header("content-disposition", "attachment; filename=\"caf\u{e9}.csv\"")
      .with_header("set-cookie", "b=2")
      .with_header("x-raw", vec![0x80u8, 0xff]);
    store.put("v2:resources", &download, &response).await.unwrap();
    let hit = store.match_in("v2:resources", &download).await.unwrap().unwrap();
    assert_eq!(hit.response, response);
  }

  #[tokio::test]
  async fn test_memory_storage() {
    exercise_store(&MemoryStorage::new()).await;
  }

  #[tokio::test]
  async fn test_sqlite_storage() {
    exercise_store(&SqliteStorage::open_in_memory().unwrap()).await;
  }

  #[tokio::test]
  async fn test_sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let key = RequestKey::get("https://example.com/logo.png");
    let body = vec![0u8, 159, 146, 150, 255];

    {
      let store = SqliteStorage::open_at(&path).unwrap();
      store
        .put("v1:resources", &key, &Response::new(200, body.clone()))
        .await
        .unwrap();
    }

    let store = SqliteStorage::open_at(&path).unwrap();
    let hit = store.match_in("v1:resources", &key).await.unwrap().unwrap();
    assert_eq!(hit.response.body, body);
    assert!(hit.cached_at <= Utc::now());
  }

  #[tokio::test]
  async fn test_sqlite_corrupt_entry_is_a_miss() {
    let store = SqliteStorage::open_in_memory().unwrap();
    let key = RequestKey::get("https://example.com/a");
    store.put("v1:resources", &key, &page("ok")).await.unwrap();

    store
      .lock()
      .unwrap()
      .execute("UPDATE entries SET body = X'00'", [])
      .unwrap();

    assert!(store.match_in("v1:resources", &key).await.unwrap().is_none());
    assert!(store.match_any(&key).await.unwrap().is_none());
  }
}
