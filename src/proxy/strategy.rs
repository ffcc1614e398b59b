//! Request classification and the per-route caching strategies.

use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;
use crate::transport::{send_with_budget, Request, RequestMode, Response, Transport};

use super::worker::CacheProxy;
use super::ProxySettings;

/// Which strategy answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Top-level page load: network first, stored page as fallback
  Navigation,
  /// The published dataset: network first under a budget, newest stored copy as fallback
  Dataset,
  /// Same-origin file: serve stored copy, refresh in the background
  SameOriginAsset,
  /// Anything else: stored copy first
  Other,
}

pub fn classify(request: &Request, settings: &ProxySettings) -> Route {
  if request.mode == RequestMode::Navigate {
    Route::Navigation
  } else if is_dataset(&request.url, settings) {
    Route::Dataset
  } else if request.url.origin() == settings.origin.origin() {
    Route::SameOriginAsset
  } else {
    Route::Other
  }
}

/// A data host plus either `output=tsv` or a `.tsv` path.
fn is_dataset(url: &Url, settings: &ProxySettings) -> bool {
  let Some(host) = url.host_str() else {
    return false;
  };
  if !settings.data_hosts.contains(&host.to_lowercase()) {
    return false;
  }

  url
    .query_pairs()
    .any(|(key, value)| key == "output" && value.eq_ignore_ascii_case("tsv"))
    || url.path().to_lowercase().ends_with(".tsv")
}

const PAGE_OFFLINE: &str = "This page is not available offline";
const DATA_OFFLINE: &str = "Offline and no cached data";

impl<T: Transport + 'static> CacheProxy<T> {
  pub(super) async fn network_first_page(
    &self,
    request: Request,
  ) -> Result<Response, TransportError> {
    let static_store = self.settings.static_store();
    let fallback = &self.settings.fallback_url;

    match send_with_budget(self.network.as_ref(), request, self.settings.request_budget).await {
      Ok(response) => {
        self.remember(&static_store, fallback, &response);
        Ok(response)
      }
      Err(e) => {
        warn!("Navigation failed, serving offline page: {}", e);
        Ok(
          self
            .lookup(self.store.match_exact(&static_store, fallback))
            .unwrap_or_else(|| Response::synthetic(503, PAGE_OFFLINE)),
        )
      }
    }
  }

  pub(super) async fn network_first_data(
    &self,
    request: Request,
  ) -> Result<Response, TransportError> {
    let data_store = self.settings.data_store();
    let url = request.url.clone();

    debug!(%url, "fetching dataset through proxy");
    match send_with_budget(self.network.as_ref(), request, self.settings.data_budget).await {
      Ok(response) => {
        self.remember_latest(&data_store, &url, &response);
        Ok(response)
      }
      Err(e) => {
        warn!("Dataset fetch failed, trying stored copy: {}", e);
        Ok(
          self
            .lookup(self.store.match_ignoring_query(&data_store, &url))
            .unwrap_or_else(|| Response::synthetic(503, DATA_OFFLINE)),
        )
      }
    }
  }

  pub(super) async fn stale_while_revalidate(
    &self,
    request: Request,
  ) -> Result<Response, TransportError> {
    let static_store = self.settings.static_store();
    let url = request.url.clone();

    if let Some(stale) = self.lookup(self.store.match_ignoring_query(&static_store, &url)) {
      let network = Arc::clone(&self.network);
      let store = Arc::clone(&self.store);
      let budget = self.settings.request_budget;

      tokio::spawn(async move {
        match send_with_budget(network.as_ref(), request, budget).await {
          Ok(fresh) if fresh.is_cacheable() => {
            if let Err(e) = store.put(&static_store, &url, &fresh) {
              debug!("Background refresh of {} not stored: {}", url, e);
            }
          }
          Ok(fresh) => debug!(%url, status = fresh.status, "background refresh not cacheable"),
          Err(e) => debug!("Background refresh of {} failed: {}", url, e),
        }
      });

      return Ok(stale);
    }

    let response = send_with_budget(self.network.as_ref(), request, self.settings.request_budget).await?;
    self.remember(&static_store, &url, &response);
    Ok(response)
  }

  pub(super) async fn cache_first(&self, request: Request) -> Result<Response, TransportError> {
    let static_store = self.settings.static_store();
    let url = request.url.clone();

    if let Some(hit) = self.lookup(self.store.match_exact(&static_store, &url)) {
      return Ok(hit);
    }

    let response = send_with_budget(self.network.as_ref(), request, self.settings.request_budget).await?;
    self.remember(&static_store, &url, &response);
    Ok(response)
  }
}
