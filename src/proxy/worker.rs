use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::{send_with_budget, Request, Response, Transport};

use super::strategy::{classify, Route};
use super::{ProxySettings, ProxyStore};

/// Lifecycle of a proxy instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyState {
  /// Not controlling requests yet; everything passes through
  Installing,
  /// Controlling requests for this generation
  Active(String),
  /// A newer generation took over; everything passes through
  Superseded,
}

/// The generation a store belongs to: its name up to the last `-`.
pub fn generation_of(store_name: &str) -> &str {
  store_name
    .rsplit_once('-')
    .map(|(generation, _)| generation)
    .unwrap_or(store_name)
}

/// Caching transport in front of the real network.
pub struct CacheProxy<T> {
  pub(super) network: Arc<T>,
  pub(super) store: Arc<ProxyStore>,
  pub(super) settings: Arc<ProxySettings>,
  state: Arc<Mutex<ProxyState>>,
}

impl<T> Clone for CacheProxy<T> {
  fn clone(&self) -> Self {
    Self {
      network: Arc::clone(&self.network),
      store: Arc::clone(&self.store),
      settings: Arc::clone(&self.settings),
      state: Arc::clone(&self.state),
    }
  }
}

impl<T: Transport + 'static> CacheProxy<T> {
  pub fn new(network: T, store: ProxyStore, settings: ProxySettings) -> Self {
    Self::with_shared(Arc::new(network), Arc::new(store), settings)
  }

  /// Build an instance over a network and store that other instances may share.
  pub fn with_shared(network: Arc<T>, store: Arc<ProxyStore>, settings: ProxySettings) -> Self {
    Self {
      network,
      store,
      settings: Arc::new(settings),
      state: Arc::new(Mutex::new(ProxyState::Installing)),
    }
  }

  pub fn settings(&self) -> &ProxySettings {
    &self.settings
  }

  pub fn store(&self) -> &ProxyStore {
    &self.store
  }

  pub fn state(&self) -> ProxyState {
    self
      .state
      .lock()
      .map(|s| s.clone())
      .unwrap_or(ProxyState::Superseded)
  }

  fn set_state(&self, next: ProxyState) {
    if let Ok(mut state) = self.state.lock() {
      *state = next;
    }
  }

  /// Resume if this generation is already the active one, otherwise install.
  pub async fn start(&self) -> Result<()> {
    if self.store.active_generation()?.as_deref() == Some(self.settings.version.as_str()) {
      debug!(version = %self.settings.version, "resuming active cache proxy");
      self.set_state(ProxyState::Active(self.settings.version.clone()));
      return Ok(());
    }
    self.install().await
  }

  /// Precache the shell assets, then activate straight away.
  ///
  /// Every asset is fetched past any intermediary cache. If one of them can't
  /// be fetched nothing is stored and the instance stays `Installing`.
  pub async fn install(&self) -> Result<()> {
    self.set_state(ProxyState::Installing);
    info!(
      version = %self.settings.version,
      assets = self.settings.shell_assets.len(),
      "installing cache proxy"
    );

    let fetches = self
      .settings
      .shell_assets
      .iter()
      .map(|asset| self.precache(asset));
    let assets = try_join_all(fetches).await.inspect_err(|e| {
      warn!("Cache proxy install failed: {}", e);
    })?;

    self.store.put_all(&self.settings.static_store(), &assets)?;
    self.store.open_store(&self.settings.data_store())?;
    self.activate()?;
    Ok(())
  }

  async fn precache(&self, asset: &str) -> Result<(url::Url, Response)> {
    let url = self
      .settings
      .origin
      .join(asset)
      .map_err(|e| eyre!("Invalid shell asset {:?}: {}", asset, e))?;
    let request = Request::get(url.clone()).bypassing_cache();
    let response = send_with_budget(self.network.as_ref(), request, self.settings.request_budget)
      .await
      .map_err(|e| eyre!("Failed to precache {}: {}", url, e))?;
    if !response.is_ok() {
      return Err(eyre!("Failed to precache {}: status {}", url, response.status));
    }
    Ok((url, response))
  }

  /// Delete every store from other generations and take control.
  ///
  /// Returns the names of the deleted stores.
  pub fn activate(&self) -> Result<Vec<String>> {
    let current = self.settings.version.as_str();
    let mut removed = Vec::new();

    for name in self.store.store_names()? {
      if generation_of(&name) != current {
        self.store.delete_store(&name)?;
        removed.push(name);
      }
    }

    self.store.set_active_generation(current)?;
    self.set_state(ProxyState::Active(current.to_string()));
    info!(version = current, removed = ?removed, "cache proxy active");
    Ok(removed)
  }

  /// True while this instance should answer requests itself.
  fn is_controlling(&self) -> bool {
    let ProxyState::Active(generation) = self.state() else {
      return false;
    };

    match self.store.active_generation() {
      Ok(Some(active)) if active != generation => {
        info!(%generation, %active, "cache proxy superseded");
        self.set_state(ProxyState::Superseded);
        false
      }
      Ok(_) => true,
      Err(e) => {
        warn!("Could not read active generation: {}", e);
        false
      }
    }
  }

  /// Store lookups never fail a request; a broken store is a miss. Hits come
  /// back marked as served from cache.
  pub(super) fn lookup(&self, found: Result<Option<Response>>) -> Option<Response> {
    match found {
      Ok(hit) => hit.map(Response::served_from_cache),
      Err(e) => {
        warn!("Proxy cache lookup failed: {}", e);
        None
      }
    }
  }

  /// Store the response if it may be stored.
  pub(super) fn remember(&self, store: &str, url: &url::Url, response: &Response) {
    if !response.is_cacheable() {
      return;
    }
    if let Err(e) = self.store.put(store, url, response) {
      warn!("Failed to store {}: {}", url, e);
    }
  }

  /// Like `remember`, but the response replaces every stored variant of the
  /// URL that differs only in its query.
  pub(super) fn remember_latest(&self, store: &str, url: &url::Url, response: &Response) {
    if !response.is_cacheable() {
      return;
    }
    if let Err(e) = self.store.put_latest(store, url, response) {
      warn!("Failed to store {}: {}", url, e);
    }
  }
}

impl<T: Transport + 'static> Transport for CacheProxy<T> {
  async fn send(&self, request: Request) -> Result<Response, TransportError> {
    if !request.method.is_safe() || !self.is_controlling() {
      return self.network.send(request).await;
    }

    match classify(&request, &self.settings) {
      Route::Navigation => self.network_first_page(request).await,
      Route::Dataset => self.network_first_data(request).await,
      Route::SameOriginAsset => self.stale_while_revalidate(request).await,
      Route::Other => self.cache_first(request).await,
    }
  }
}

/// The client's route to the network: through the proxy when its storage
/// opened, straight to the network when it didn't.
pub enum Gateway<T> {
  Proxied(CacheProxy<T>),
  Direct(Arc<T>),
}

impl<T> Clone for Gateway<T> {
  fn clone(&self) -> Self {
    match self {
      Gateway::Proxied(proxy) => Gateway::Proxied(proxy.clone()),
      Gateway::Direct(network) => Gateway::Direct(Arc::clone(network)),
    }
  }
}

impl<T: Transport + 'static> Gateway<T> {
  pub fn open(network: T, store: Result<ProxyStore>, settings: ProxySettings) -> Self {
    match store {
      Ok(store) => Gateway::Proxied(CacheProxy::new(network, store, settings)),
      Err(e) => {
        warn!("Proxy storage unavailable, requests go straight to the network: {}", e);
        Gateway::Direct(Arc::new(network))
      }
    }
  }

  /// Put the proxy in control. On failure requests keep passing through.
  pub async fn start(&self) {
    if let Gateway::Proxied(proxy) = self {
      if let Err(e) = proxy.start().await {
        warn!("Cache proxy not active, using the network directly: {}", e);
      }
    }
  }
}

impl<T: Transport + 'static> Transport for Gateway<T> {
  async fn send(&self, request: Request) -> Result<Response, TransportError> {
    match self {
      Gateway::Proxied(proxy) => proxy.send(request).await,
      Gateway::Direct(network) => network.send(request).await,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::proxy::fixtures::{serve_shell, settings, DATA_URL, ORIGIN};
  use crate::transport::testing::ScriptedTransport;
  use crate::transport::Method;
  use url::Url;

  fn proxy(
    transport: &Arc<ScriptedTransport>,
    store: &Arc<ProxyStore>,
    version: &str,
  ) -> CacheProxy<ScriptedTransport> {
    CacheProxy::with_shared(transport.clone(), store.clone(), settings(version))
  }

  #[tokio::test]
  async fn test_install_precaches_shell_bypassing_cache() {
    let transport = ScriptedTransport::new();
    serve_shell(&transport);
    let store = Arc::new(ProxyStore::open_in_memory().unwrap());
    let proxy = proxy(&transport, &store, "v1");

    proxy.install().await.unwrap();

    assert_eq!(proxy.state(), ProxyState::Active("v1".to_string()));
    assert_eq!(store.active_generation().unwrap().as_deref(), Some("v1"));
    assert_eq!(store.store_names().unwrap(), ["v1-data", "v1-static"]);

    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|r| r.bypass_cache));

    let app_js = Url::parse(ORIGIN).unwrap().join("app.js").unwrap();
    let cached = store.match_exact("v1-static", &app_js).unwrap().unwrap();
    assert_eq!(cached.text(), "console.log(1)");
  }

  #[tokio::test]
  async fn test_install_fails_when_an_asset_is_missing() {
    let transport = ScriptedTransport::new();
    serve_shell(&transport);
    transport.respond(&format!("{}app.js", ORIGIN), 404, "not found");
    let store = Arc::new(ProxyStore::open_in_memory().unwrap());
    let proxy = proxy(&transport, &store, "v1");

    assert!(proxy.install().await.is_err());
    assert_eq!(proxy.state(), ProxyState::Installing);
    assert!(store.store_names().unwrap().is_empty());
    assert_eq!(store.active_generation().unwrap(), None);

    // Not in control, so requests go straight to the network
    transport.set_offline(true);
    let page = Url::parse(ORIGIN).unwrap();
    assert!(proxy.send(Request::navigate(page)).await.is_err());
  }

  #[tokio::test]
  async fn test_activation_deletes_other_generations() {
    let transport = ScriptedTransport::new();
    let store = Arc::new(ProxyStore::open_in_memory().unwrap());
    store.open_store("v1-static").unwrap();
    store.open_store("v1-data").unwrap();
    store.open_store("v2-static").unwrap();

    let proxy = proxy(&transport, &store, "v2");
    let mut removed = proxy.activate().unwrap();
    removed.sort();

    assert_eq!(removed, ["v1-data", "v1-static"]);
    assert_eq!(store.store_names().unwrap(), ["v2-static"]);
    assert_eq!(proxy.state(), ProxyState::Active("v2".to_string()));
  }

  #[test]
  fn test_generation_of_store_names() {
    assert_eq!(generation_of("cardshelf-v1-static"), "cardshelf-v1");
    assert_eq!(generation_of("v2-data"), "v2");
    assert_eq!(generation_of("plain"), "plain");
  }

  #[tokio::test]
  async fn test_start_resumes_without_refetching() {
    let transport = ScriptedTransport::new();
    let store = Arc::new(ProxyStore::open_in_memory().unwrap());
    store.set_active_generation("v1").unwrap();

    let proxy = proxy(&transport, &store, "v1");
    proxy.start().await.unwrap();

    assert_eq!(proxy.state(), ProxyState::Active("v1".to_string()));
    assert_eq!(transport.call_count(), 0);
  }

  #[tokio::test]
  async fn test_superseded_instance_passes_through() {
    let transport = ScriptedTransport::new();
    serve_shell(&transport);
    let store = Arc::new(ProxyStore::open_in_memory().unwrap());

    let old = proxy(&transport, &store, "v1");
    old.install().await.unwrap();
    let new = proxy(&transport, &store, "v2");
    new.install().await.unwrap();

    // The old instance's stores are gone and it no longer answers from cache
    transport.set_offline(true);
    let page = Url::parse(ORIGIN).unwrap();
    assert!(old.send(Request::navigate(page.clone())).await.is_err());
    assert_eq!(old.state(), ProxyState::Superseded);

    let served = new.send(Request::navigate(page)).await.unwrap();
    assert_eq!(served.text(), "<html>shell</html>");
  }

  #[tokio::test]
  async fn test_mutating_requests_pass_straight_through() {
    let transport = ScriptedTransport::new();
    serve_shell(&transport);
    let write_url = "https://script.google.com/macros/s/x/exec";
    transport.respond(write_url, 200, r#"{"ok":true}"#);
    let store = Arc::new(ProxyStore::open_in_memory().unwrap());
    let proxy = proxy(&transport, &store, "v1");
    proxy.install().await.unwrap();

    let request = Request::post_text(Url::parse(write_url).unwrap(), "{}".to_string());
    let response = proxy.send(request).await.unwrap();
    assert!(response.is_ok());

    let last = transport.calls().pop().unwrap();
    assert_eq!(last.method, Method::Post);
    assert_eq!(last.body.as_deref(), Some("{}"));
    for name in store.store_names().unwrap() {
      assert_eq!(store.match_ignoring_query(&name, &last.url).unwrap(), None);
    }
  }

  #[tokio::test]
  async fn test_gateway_without_storage_goes_direct() {
    let transport = ScriptedTransport::new();
    transport.respond(DATA_URL, 200, "sheet");
    let gateway = Gateway::open(transport.clone(), Err(eyre!("disk full")), settings("v1"));
    assert!(matches!(gateway, Gateway::Direct(_)));

    // Nothing to install, so starting costs no requests
    gateway.start().await;
    assert_eq!(transport.call_count(), 0);

    let response = gateway
      .send(Request::get(Url::parse(DATA_URL).unwrap()))
      .await
      .unwrap();
    assert_eq!(response.text(), "sheet");
    assert!(!response.from_cache);

    transport.set_offline(true);
    assert!(gateway
      .send(Request::get(Url::parse(DATA_URL).unwrap()))
      .await
      .is_err());
  }

  #[tokio::test]
  async fn test_gateway_with_storage_starts_proxy() {
    let transport = ScriptedTransport::new();
    serve_shell(&transport);
    let store = ProxyStore::open_in_memory();
    let gateway = Gateway::open(transport.clone(), store, settings("v1"));

    gateway.start().await;
    let Gateway::Proxied(proxy) = &gateway else {
      panic!("expected a proxied gateway");
    };
    assert_eq!(proxy.state(), ProxyState::Active("v1".to_string()));
  }

  #[tokio::test]
  async fn test_gateway_start_survives_failed_install() {
    let transport = ScriptedTransport::new();
    transport.respond(DATA_URL, 200, "sheet");
    let gateway = Gateway::open(
      transport.clone(),
      ProxyStore::open_in_memory(),
      settings("v1"),
    );

    // No shell assets are served, so install fails and requests pass through
    gateway.start().await;
    let response = gateway
      .send(Request::get(Url::parse(DATA_URL).unwrap()))
      .await
      .unwrap();
    assert_eq!(response.text(), "sheet");
  }
}
