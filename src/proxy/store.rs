//! Named cache stores for the proxy, kept in their own SQLite database.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use url::Url;

use crate::config::Config;
use crate::transport::{Response, ResponseKind};

const ACTIVE_GENERATION_KEY: &str = "active_generation";

/// Generation-tagged response stores.
///
/// A store is a named bag of responses keyed by request URL. Entries are only
/// ever inserted whole or deleted with their store.
pub struct ProxyStore {
  conn: Mutex<Connection>,
}

impl ProxyStore {
  /// Open the proxy database at the default location.
  pub fn open() -> Result<Self> {
    let path = Config::data_dir()?.join("proxy.db");

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open proxy database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(PROXY_SCHEMA)
      .map_err(|e| eyre!("Failed to run proxy migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Create the store if it doesn't exist yet.
  pub fn open_store(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_store(&conn, name)
  }

  pub fn store_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  /// Delete a store and every entry in it. Returns false if it didn't exist.
  pub fn delete_store(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE store = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let deleted = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(deleted > 0)
  }

  /// Store a response under the exact request URL, replacing any previous one.
  pub fn put(&self, store: &str, url: &Url, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    ensure_store(&conn, store)?;
    insert_entry(&conn, store, url, response)
  }

  /// Store a response as the only copy of its URL once the query is ignored.
  /// Older variants of the same URL in this store are deleted.
  pub fn put_latest(&self, store: &str, url: &Url, response: &Response) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_store(&tx, store)?;
    tx.execute(
      "DELETE FROM cache_entries WHERE store = ? AND base_url = ?",
      params![store, base_url(url)],
    )
    .map_err(|e| eyre!("Failed to drop older copies of {}: {}", url, e))?;
    insert_entry(&tx, store, url, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  /// Store several responses at once; either all land or none do.
  pub fn put_all(&self, store: &str, entries: &[(Url, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_store(&tx, store)?;
    for (url, response) in entries {
      insert_entry(&tx, store, url, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  pub fn match_exact(&self, store: &str, url: &Url) -> Result<Option<Response>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT status, kind, content_type, body FROM cache_entries
         WHERE store = ? AND entry_key = ?",
        params![store, entry_key(url)],
        read_response,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", url, e))
  }

  /// Most recently stored response for the URL with its query string ignored.
  pub fn match_ignoring_query(&self, store: &str, url: &Url) -> Result<Option<Response>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT status, kind, content_type, body FROM cache_entries
         WHERE store = ? AND base_url = ?
         ORDER BY id DESC LIMIT 1",
        params![store, base_url(url)],
        read_response,
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", url, e))
  }

  pub fn entry_count(&self, store: &str) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE store = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", store, e))?;
    Ok(count.max(0) as usize)
  }

  pub fn active_generation(&self) -> Result<Option<String>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT value FROM proxy_meta WHERE key = ?",
        params![ACTIVE_GENERATION_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read active generation: {}", e))
  }

  pub fn set_active_generation(&self, generation: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO proxy_meta (key, value) VALUES (?, ?)",
        params![ACTIVE_GENERATION_KEY, generation],
      )
      .map_err(|e| eyre!("Failed to record active generation: {}", e))?;
    Ok(())
  }
}

/// Schema for proxy tables.
const PROXY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- AUTOINCREMENT keeps ids growing, so the highest id is the newest entry
CREATE TABLE IF NOT EXISTS cache_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    store TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    base_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    UNIQUE (store, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_base
    ON cache_entries(store, base_url);

CREATE TABLE IF NOT EXISTS proxy_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

fn ensure_store(conn: &Connection, name: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create store {}: {}", name, e))?;
  Ok(())
}

fn insert_entry(conn: &Connection, store: &str, url: &Url, response: &Response) -> Result<()> {
  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (store, entry_key, url, base_url, status, kind, content_type, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        store,
        entry_key(url),
        url.as_str(),
        base_url(url),
        response.status,
        response.kind.as_str(),
        response.content_type,
        response.body,
        Utc::now().to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", url, e))?;
  Ok(())
}

fn read_response(row: &rusqlite::Row<'_>) -> rusqlite::Result<Response> {
  let kind: String = row.get(1)?;
  Ok(Response {
    status: row.get(0)?,
    kind: ResponseKind::parse(&kind),
    content_type: row.get(2)?,
    body: row.get(3)?,
    from_cache: false,
  })
}

/// SHA256 of the URL without its fragment, for stable fixed-length keys.
fn entry_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);

  let mut hasher = Sha256::new();
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

fn base_url(url: &Url) -> String {
  let mut url = url.clone();
  url.set_query(None);
  url.set_fragment(None);
  url.to_string()
}
