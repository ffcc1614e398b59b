//! Domain error taxonomy.
//!
//! Application plumbing (config, opening databases, the CLI) reports through
//! `color_eyre`. The types here are the failures callers branch on.

use std::time::Duration;
use thiserror::Error;

/// A network call that did not produce a usable response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("request to {url} timed out after {budget:?}")]
  Timeout { url: String, budget: Duration },
  #[error("request to {url} failed: {message}")]
  Connection { url: String, message: String },
  #[error("{url} answered with status {status}")]
  Status { url: String, status: u16 },
}

/// Malformed tabular text or a malformed save response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
  #[error("dataset text contains no rows")]
  EmptyDataset,
  #[error("save response is not a result object: {0}")]
  MalformedResponse(String),
  #[error("could not encode save request: {0}")]
  Encoding(String),
}

/// Form contents rejected before anything is sent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
  #[error("name is required")]
  MissingName,
  #[error("level must be a whole number, got {0:?}")]
  InvalidLevel(String),
  #[error("{field} must be a number, got {value:?}")]
  InvalidStat { field: &'static str, value: String },
}

/// Everything that can end a save attempt.
#[derive(Debug, Error)]
pub enum SaveError {
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error("a save is already in progress")]
  InFlight,
  #[error("offline, cannot save right now")]
  Offline,
  #[error("no dataset schema is loaded, reload before saving")]
  NoSchema,
  #[error("nothing is open for editing")]
  NoSession,
  #[error(transparent)]
  Network(#[from] TransportError),
  #[error(transparent)]
  Parse(#[from] ParseError),
  #[error("save rejected: {0}")]
  Rejected(String),
}

impl SaveError {
  /// True when the attempt was stopped locally without touching the network.
  pub fn is_local(&self) -> bool {
    matches!(
      self,
      SaveError::Validation(_)
        | SaveError::InFlight
        | SaveError::Offline
        | SaveError::NoSchema
        | SaveError::NoSession
    )
  }
}

/// The durable local store could not be read or written.
#[derive(Debug, Error)]
#[error("durable storage unavailable: {0}")]
pub struct StorageError(pub String);

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    StorageError(e.to_string())
  }
}
