//! Loader that prefers live data and falls back to the local snapshot.

use chrono::{TimeDelta, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ParseError, TransportError};
use crate::sheet::Dataset;
use crate::transport::{send_with_budget, Request, Transport};

use super::provenance::Provenance;
use super::storage::SnapshotStore;

/// Query parameter appended to defeat intermediary caches.
const CACHE_BUST_PARAM: &str = "_ts";

/// Result of one load attempt.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
  /// The dataset to adopt; empty when `provenance` is `Unavailable`
  pub dataset: Dataset,
  pub provenance: Provenance,
}

#[derive(Debug)]
enum LiveFailure {
  Network(TransportError),
  Parse(ParseError),
  /// An intermediary answered with a stored copy; the text is kept as a last resort
  Stored(String),
}

impl std::fmt::Display for LiveFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LiveFailure::Network(e) => write!(f, "{}", e),
      LiveFailure::Parse(e) => write!(f, "{}", e),
      LiveFailure::Stored(_) => write!(f, "network unreachable, got a stored copy"),
    }
  }
}

/// Loads the published sheet.
///
/// 1. Read the sheet over the network within `budget`
/// 2. On success, persist the raw text as the local snapshot
/// 3. On any failure, adopt the snapshot and report its age
/// 4. With no usable snapshot, report the dataset as unavailable
///
/// No path is fatal; each failure degrades to the next step.
pub struct DatasetLoader<T, S> {
  transport: T,
  snapshots: S,
  dataset_url: Url,
  budget: Duration,
}

impl<T: Transport, S: SnapshotStore> DatasetLoader<T, S> {
  pub fn new(transport: T, snapshots: S, dataset_url: Url, budget: Duration) -> Self {
    Self {
      transport,
      snapshots,
      dataset_url,
      budget,
    }
  }

  pub async fn load(&self, force_refresh: bool) -> LoadOutcome {
    let stored = match self.fetch_live(force_refresh).await {
      Ok((text, dataset)) => {
        if let Err(e) = self.snapshots.write(&text, Utc::now()) {
          warn!("Could not persist dataset snapshot: {}", e);
        }
        info!(records = dataset.records().len(), "loaded live dataset");
        return LoadOutcome {
          dataset,
          provenance: Provenance::Live,
        };
      }
      Err(LiveFailure::Stored(text)) => {
        warn!("Live dataset load failed, the proxy answered from its store");
        Some(text)
      }
      Err(e) => {
        warn!("Live dataset load failed: {}", e);
        None
      }
    };

    if let Some(outcome) = self.read_snapshot() {
      return outcome;
    }

    // The proxy's copy has no capture time, so its age is unknown
    if let Some(dataset) = stored.and_then(|text| Dataset::parse_tsv(&text).ok()) {
      info!(records = dataset.records().len(), "serving proxy copy of dataset");
      return LoadOutcome {
        dataset,
        provenance: Provenance::Cached { age: None },
      };
    }

    warn!("No usable dataset snapshot, dataset unavailable");
    LoadOutcome {
      dataset: Dataset::empty(),
      provenance: Provenance::Unavailable,
    }
  }

  async fn fetch_live(&self, force_refresh: bool) -> Result<(String, Dataset), LiveFailure> {
    let url = if force_refresh {
      cache_bust(&self.dataset_url)
    } else {
      self.dataset_url.clone()
    };
    debug!(%url, force_refresh, "fetching dataset");

    let mut request = Request::get(url.clone());
    if force_refresh {
      request = request.bypassing_cache();
    }

    let response = send_with_budget(&self.transport, request, self.budget)
      .await
      .map_err(LiveFailure::Network)?;
    if !response.is_ok() {
      return Err(LiveFailure::Network(TransportError::Status {
        url: url.to_string(),
        status: response.status,
      }));
    }

    let text = response.text();
    if response.from_cache {
      return Err(LiveFailure::Stored(text));
    }
    let dataset = Dataset::parse_tsv(&text).map_err(LiveFailure::Parse)?;
    Ok((text, dataset))
  }

  fn read_snapshot(&self) -> Option<LoadOutcome> {
    let snapshot = match self.snapshots.read() {
      Ok(Some(snapshot)) => snapshot,
      Ok(None) => return None,
      Err(e) => {
        warn!("Could not read dataset snapshot: {}", e);
        return None;
      }
    };

    let dataset = match Dataset::parse_tsv(&snapshot.text) {
      Ok(dataset) => dataset,
      Err(e) => {
        warn!("Dataset snapshot is unusable: {}", e);
        return None;
      }
    };

    let age = snapshot
      .captured_at
      .map(|at| (Utc::now() - at).max(TimeDelta::zero()));
    info!(records = dataset.records().len(), ?age, "serving dataset snapshot");

    Some(LoadOutcome {
      dataset,
      provenance: Provenance::Cached { age },
    })
  }
}

/// Replace any previous cache-busting parameter with the current time.
pub fn cache_bust(url: &Url) -> Url {
  let kept: Vec<(String, String)> = url
    .query_pairs()
    .filter(|(k, _)| k != CACHE_BUST_PARAM)
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();

  let mut busted = url.clone();
  busted
    .query_pairs_mut()
    .clear()
    .extend_pairs(kept)
    .append_pair(CACHE_BUST_PARAM, &Utc::now().timestamp_millis().to_string());
  busted
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{Snapshot, SqliteStorage};
  use crate::error::StorageError;
  use crate::transport::testing::ScriptedTransport;
  use crate::transport::Response;
  use chrono::DateTime;
  use std::sync::Arc;

  const URL: &str = "https://docs.google.com/spreadsheets/d/e/x/pub?gid=1&single=true&output=tsv";
  const SHEET: &str = "_id\tNombre\tCategoría\n1\tKuriboh\tMonster\n";

  fn loader(
    transport: &Arc<ScriptedTransport>,
  ) -> DatasetLoader<Arc<ScriptedTransport>, SqliteStorage> {
    DatasetLoader::new(
      transport.clone(),
      SqliteStorage::open_in_memory().unwrap(),
      Url::parse(URL).unwrap(),
      Duration::from_millis(200),
    )
  }

  struct BrokenStore;

  impl SnapshotStore for BrokenStore {
    fn read(&self) -> Result<Option<Snapshot>, StorageError> {
      Err(StorageError("disk gone".to_string()))
    }

    fn write(&self, _text: &str, _at: DateTime<Utc>) -> Result<(), StorageError> {
      Err(StorageError("disk gone".to_string()))
    }
  }

  #[tokio::test]
  async fn test_live_load_persists_snapshot() {
    let transport = ScriptedTransport::new();
    transport.respond(URL, 200, SHEET);
    let loader = loader(&transport);

    let outcome = loader.load(false).await;
    assert_eq!(outcome.provenance, Provenance::Live);
    assert_eq!(outcome.dataset.records().len(), 1);

    let snapshot = loader.snapshots.read().unwrap().unwrap();
    assert_eq!(snapshot.text, SHEET);
    assert!(snapshot.captured_at.is_some());
  }

  #[tokio::test]
  async fn test_network_failure_serves_aged_snapshot() {
    let transport = ScriptedTransport::new();
    transport.fail(URL);
    let loader = loader(&transport);
    loader
      .snapshots
      .write(SHEET, Utc::now() - TimeDelta::minutes(5))
      .unwrap();

    let outcome = loader.load(false).await;
    match outcome.provenance {
      Provenance::Cached { age: Some(age) } => {
        assert!(age >= TimeDelta::minutes(5));
        assert!(age < TimeDelta::minutes(6));
      }
      other => panic!("expected cached provenance, got {:?}", other),
    }
    assert_eq!(outcome.dataset, Dataset::parse_tsv(SHEET).unwrap());
  }

  #[tokio::test]
  async fn test_error_status_and_empty_body_fall_back() {
    let transport = ScriptedTransport::new();
    let loader = loader(&transport);
    loader.snapshots.write(SHEET, Utc::now()).unwrap();

    transport.respond(URL, 500, "boom");
    let outcome = loader.load(false).await;
    assert!(matches!(outcome.provenance, Provenance::Cached { .. }));

    transport.respond(URL, 200, "\n\n");
    let outcome = loader.load(false).await;
    assert!(matches!(outcome.provenance, Provenance::Cached { .. }));

    // The failed loads must not have clobbered the snapshot
    assert_eq!(loader.snapshots.read().unwrap().unwrap().text, SHEET);
  }

  #[tokio::test]
  async fn test_no_network_and_no_snapshot_is_unavailable() {
    let transport = ScriptedTransport::new();
    transport.set_offline(true);
    let loader = loader(&transport);

    for force in [false, true] {
      let outcome = loader.load(force).await;
      assert_eq!(outcome.provenance, Provenance::Unavailable);
      assert_eq!(outcome.dataset, Dataset::empty());
    }
  }

  #[tokio::test]
  async fn test_slow_network_times_out_to_snapshot() {
    let transport = ScriptedTransport::new();
    transport.respond(URL, 200, SHEET);
    transport.set_delay(Duration::from_millis(500));
    let loader = loader(&transport);
    loader.snapshots.write(SHEET, Utc::now()).unwrap();

    let outcome = loader.load(false).await;
    assert!(matches!(outcome.provenance, Provenance::Cached { .. }));
  }

  #[tokio::test]
  async fn test_broken_storage_does_not_break_loading() {
    let transport = ScriptedTransport::new();
    transport.respond(URL, 200, SHEET);
    let loader = DatasetLoader::new(
      transport.clone(),
      BrokenStore,
      Url::parse(URL).unwrap(),
      Duration::from_millis(200),
    );
    assert_eq!(loader.load(false).await.provenance, Provenance::Live);

    transport.set_offline(true);
    assert_eq!(
      loader.load(false).await.provenance,
      Provenance::Unavailable
    );
  }

  #[tokio::test]
  async fn test_stored_copy_from_proxy_is_not_live() {
    let transport = ScriptedTransport::new();
    transport.respond_with(URL, Response::synthetic(200, SHEET).served_from_cache());
    let loader = loader(&transport);
    let captured = Utc::now() - TimeDelta::days(3);
    loader.snapshots.write(SHEET, captured).unwrap();

    let outcome = loader.load(false).await;
    match outcome.provenance {
      Provenance::Cached { age: Some(age) } => assert!(age >= TimeDelta::days(3)),
      other => panic!("expected aged snapshot, got {:?}", other),
    }

    // The snapshot keeps its capture time
    let snapshot = loader.snapshots.read().unwrap().unwrap();
    assert!(Utc::now() - snapshot.captured_at.unwrap() >= TimeDelta::days(3));
  }

  #[tokio::test]
  async fn test_stored_copy_is_last_resort_without_snapshot() {
    let transport = ScriptedTransport::new();
    transport.respond_with(URL, Response::synthetic(200, SHEET).served_from_cache());
    let loader = loader(&transport);

    let outcome = loader.load(false).await;
    assert_eq!(outcome.provenance, Provenance::Cached { age: None });
    assert_eq!(outcome.dataset.records().len(), 1);
    assert!(loader.snapshots.read().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_force_refresh_busts_caches() {
    let transport = ScriptedTransport::new();
    transport.respond(URL, 200, SHEET);
    let loader = loader(&transport);

    loader.load(true).await;
    let calls = transport.calls();
    let sent = &calls[0];
    assert!(sent.bypass_cache);
    assert!(sent.url.query_pairs().any(|(k, _)| k == CACHE_BUST_PARAM));
    assert!(sent.url.query_pairs().any(|(k, v)| k == "output" && v == "tsv"));
  }

  #[test]
  fn test_cache_bust_replaces_previous_marker() {
    let url = Url::parse("https://example.com/pub?output=tsv&_ts=1").unwrap();
    let busted = cache_bust(&url);
    let markers = busted
      .query_pairs()
      .filter(|(k, _)| k == CACHE_BUST_PARAM)
      .count();
    assert_eq!(markers, 1);
    assert!(busted.as_str().contains("output=tsv"));
  }
}
