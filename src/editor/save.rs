//! Save protocol for the remote write endpoint.
//!
//! The endpoint accepts a single `text/plain` POST carrying a JSON request and
//! answers with a JSON result. `text/plain` keeps the request "simple" so no
//! preflight is negotiated; the endpoint cannot answer one.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ParseError, SaveError, TransportError};
use crate::sheet::FieldMap;
use crate::transport::{send_with_budget, Request, Transport};

use super::record::{build, validate, FormValues, Selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveAction {
  Add,
  Update,
}

#[derive(Debug, Serialize)]
struct SaveRequest<'a> {
  action: SaveAction,
  #[serde(rename = "rowIndex")]
  row_index: String,
  row: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SaveResponse {
  ok: bool,
  #[serde(default)]
  msg: Option<String>,
  #[serde(default)]
  error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
  pub action: SaveAction,
  pub message: String,
}

/// Sends records to the write endpoint, one at a time.
pub struct SaveClient<T> {
  transport: T,
  write_url: Url,
  budget: Duration,
  in_flight: AtomicBool,
}

/// Clears the in-flight flag however the save ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl<T: Transport> SaveClient<T> {
  pub fn new(transport: T, write_url: Url, budget: Duration) -> Self {
    Self {
      transport,
      write_url,
      budget,
      in_flight: AtomicBool::new(false),
    }
  }

  /// Validate, build and transmit one record.
  ///
  /// The action is `update` when the selection has a remote row position and
  /// `add` otherwise. A call made while another is pending is rejected, not
  /// queued.
  pub async fn save(
    &self,
    form: &FormValues,
    selection: Option<&Selection>,
    fields: &FieldMap,
  ) -> Result<SaveOutcome, SaveError> {
    let _guard = InFlightGuard::acquire(&self.in_flight).ok_or(SaveError::InFlight)?;

    validate(form)?;

    let row_position = selection.and_then(|s| s.row_position);
    let action = match row_position {
      Some(_) => SaveAction::Update,
      None => SaveAction::Add,
    };
    let row = build(form, selection, fields);

    let body = serde_json::to_string(&SaveRequest {
      action,
      row_index: row_position.map(|p| p.to_string()).unwrap_or_default(),
      row: &row,
    })
    .map_err(|e| ParseError::Encoding(e.to_string()))?;

    debug!(?action, ?row_position, "sending save");
    let request = Request::post_text(self.write_url.clone(), body);
    let response = send_with_budget(&self.transport, request, self.budget)
      .await
      .inspect_err(|e| warn!("Save failed: {}", e))?;

    if !response.is_ok() {
      warn!(status = response.status, "Save endpoint returned an error status");
      return Err(
        TransportError::Status {
          url: self.write_url.to_string(),
          status: response.status,
        }
        .into(),
      );
    }

    let result: SaveResponse = serde_json::from_str(&response.text())
      .map_err(|e| ParseError::MalformedResponse(e.to_string()))?;

    if !result.ok {
      let detail = result
        .error
        .or(result.msg)
        .unwrap_or_else(|| "the endpoint did not accept the record".to_string());
      warn!("Save rejected: {}", detail);
      return Err(SaveError::Rejected(detail));
    }

    info!(?action, "record saved");
    Ok(SaveOutcome {
      action,
      message: result.msg.unwrap_or_else(|| "Saved".to_string()),
    })
  }
}
