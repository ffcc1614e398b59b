//! Snapshot storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::config::Config;
use crate::error::StorageError;

const DATASET_KEY: &str = "dataset_text_v1";
const CAPTURED_AT_KEY: &str = "dataset_captured_at_v1";

/// The last dataset text that loaded successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
  pub text: String,
  pub captured_at: Option<DateTime<Utc>>,
}

/// Durable, best-effort storage for the local snapshot.
///
/// Both operations replace or read the whole snapshot; there is no partial
/// update.
pub trait SnapshotStore: Send + Sync {
  fn read(&self) -> Result<Option<Snapshot>, StorageError>;

  fn write(&self, text: &str, captured_at: DateTime<Utc>) -> Result<(), StorageError>;
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Box<S> {
  fn read(&self) -> Result<Option<Snapshot>, StorageError> {
    (**self).read()
  }

  fn write(&self, text: &str, captured_at: DateTime<Utc>) -> Result<(), StorageError> {
    (**self).write(text, captured_at)
  }
}

/// Storage implementation that doesn't keep anything.
/// Used when the durable store cannot be opened.
pub struct NoopStorage;

impl SnapshotStore for NoopStorage {
  fn read(&self) -> Result<Option<Snapshot>, StorageError> {
    Ok(None) // Always miss
  }

  fn write(&self, _text: &str, _captured_at: DateTime<Utc>) -> Result<(), StorageError> {
    Ok(()) // Discard
  }
}

/// SQLite-based key/value snapshot store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the snapshot database at the default location.
  pub fn open() -> Result<Self> {
    let path = Config::data_dir()?.join("snapshot.db");

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    Self::open_at(&path)
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open snapshot database at {}: {}", path.display(), e))?;
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
      .execute_batch(SNAPSHOT_SCHEMA)
      .map_err(|e| eyre!("Failed to run snapshot migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError(format!("Lock poisoned: {}", e)))
  }
}

const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS local_kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl SnapshotStore for SqliteStorage {
  fn read(&self) -> Result<Option<Snapshot>, StorageError> {
    let conn = self.lock()?;

    let mut stmt = conn.prepare("SELECT value FROM local_kv WHERE key = ?")?;

    let text: Option<String> = stmt
      .query_row(params![DATASET_KEY], |row| row.get(0))
      .optional()?;
    let captured_at: Option<String> = stmt
      .query_row(params![CAPTURED_AT_KEY], |row| row.get(0))
      .optional()?;

    Ok(text.filter(|t| !t.is_empty()).map(|text| Snapshot {
      text,
      captured_at: captured_at
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::from_timestamp_millis),
    }))
  }

  fn write(&self, text: &str, captured_at: DateTime<Utc>) -> Result<(), StorageError> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;

    tx.execute(
      "INSERT OR REPLACE INTO local_kv (key, value) VALUES (?, ?)",
      params![DATASET_KEY, text],
    )?;
    tx.execute(
      "INSERT OR REPLACE INTO local_kv (key, value) VALUES (?, ?)",
      params![CAPTURED_AT_KEY, captured_at.timestamp_millis().to_string()],
    )?;

    tx.commit()?;
    Ok(())
  }
}
