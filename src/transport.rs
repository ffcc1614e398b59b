//! Request/response types and the `Transport` seam every network call goes through.
//!
//! The dataset loader and the save protocol only ever see a `Transport`. At
//! runtime that transport is the cache proxy, which in turn wraps
//! [`HttpTransport`].

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::TransportError;

pub const TEXT_PLAIN_UTF8: &str = "text/plain;charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
}

impl Method {
  /// Safe methods have no side effects on the remote end.
  pub fn is_safe(&self) -> bool {
    matches!(self, Method::Get)
  }
}

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  #[default]
  Cors,
  /// Cross-origin request whose response cannot be inspected
  NoCors,
}

#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub content_type: Option<String>,
  pub body: Option<String>,
  /// Ask intermediaries for a fresh copy
  pub bypass_cache: bool,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::Get,
      url,
      mode: RequestMode::Cors,
      content_type: None,
      body: None,
      bypass_cache: false,
    }
  }

  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// POST with a `text/plain` body. Browsers classify this as a simple request,
  /// so no preflight round trip happens.
  pub fn post_text(url: Url, body: String) -> Self {
    Self {
      method: Method::Post,
      url,
      mode: RequestMode::Cors,
      content_type: Some(TEXT_PLAIN_UTF8.to_string()),
      body: Some(body),
      bypass_cache: false,
    }
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn bypassing_cache(mut self) -> Self {
    self.bypass_cache = true;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
  /// Same-origin
  Basic,
  /// Cross-origin, readable
  Cors,
  /// Cross-origin, contents hidden
  Opaque,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseKind::Basic => "basic",
      ResponseKind::Cors => "cors",
      ResponseKind::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Self {
    match s {
      "basic" => ResponseKind::Basic,
      "cors" => ResponseKind::Cors,
      _ => ResponseKind::Opaque,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub kind: ResponseKind,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  /// Answered from a local store rather than the network
  pub from_cache: bool,
}

impl Response {
  pub fn new(status: u16, kind: ResponseKind, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      kind,
      content_type: None,
      body: body.into(),
      from_cache: false,
    }
  }

  /// A locally produced plain-text response.
  pub fn synthetic(status: u16, text: &str) -> Self {
    Self {
      status,
      kind: ResponseKind::Basic,
      content_type: Some(TEXT_PLAIN_UTF8.to_string()),
      body: text.as_bytes().to_vec(),
      from_cache: false,
    }
  }

  /// Mark a stored copy being handed back in place of a network answer.
  pub fn served_from_cache(mut self) -> Self {
    self.from_cache = true;
    self
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only complete, inspectable responses may be stored.
  pub fn is_cacheable(&self) -> bool {
    self.is_ok() && self.kind != ResponseKind::Opaque
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Something that can carry a request to the network and back.
pub trait Transport: Send + Sync {
  fn send(&self, request: Request) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
  fn send(&self, request: Request) -> impl Future<Output = Result<Response, TransportError>> + Send {
    (**self).send(request)
  }
}

/// Run a request under a wall-clock budget. Exceeding it is reported the same
/// way as any other network failure.
pub async fn send_with_budget<T: Transport + ?Sized>(
  transport: &T,
  request: Request,
  budget: Duration,
) -> Result<Response, TransportError> {
  let url = request.url.to_string();
  match tokio::time::timeout(budget, transport.send(request)).await {
    Ok(result) => result,
    Err(_) => {
      debug!(%url, ?budget, "request exceeded its budget");
      Err(TransportError::Timeout { url, budget })
    }
  }
}

/// The real network, backed by reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  origin: url::Origin,
  timeout: Duration,
}

impl HttpTransport {
  /// `origin` is the origin the application is served from; it decides which
  /// responses count as same-origin.
  pub fn new(timeout: Duration, origin: &Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: origin.origin(),
      timeout,
    })
  }
}

impl Transport for HttpTransport {
  async fn send(&self, request: Request) -> Result<Response, TransportError> {
    let url = request.url.to_string();
    let same_origin = request.url.origin() == self.origin;

    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
    };

    let mut builder = self.client.request(method, request.url.clone());
    if request.bypass_cache {
      builder = builder
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .header(reqwest::header::PRAGMA, "no-cache");
    }
    if let Some(content_type) = &request.content_type {
      builder = builder.header(reqwest::header::CONTENT_TYPE, content_type.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    debug!(%url, method = ?request.method, "sending request");
    let response = builder.send().await.map_err(|e| {
      if e.is_timeout() {
        TransportError::Timeout {
          url: url.clone(),
          budget: self.timeout,
        }
      } else {
        TransportError::Connection {
          url: url.clone(),
          message: e.to_string(),
        }
      }
    })?;

    if request.mode == RequestMode::NoCors && !same_origin {
      return Ok(Response::new(0, ResponseKind::Opaque, Vec::new()));
    }

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .bytes()
      .await
      .map_err(|e| TransportError::Connection {
        url: url.clone(),
        message: e.to_string(),
      })?;

    Ok(Response {
      status,
      kind: if same_origin {
        ResponseKind::Basic
      } else {
        ResponseKind::Cors
      },
      content_type,
      body: body.to_vec(),
      from_cache: false,
    })
  }
}

#[cfg(test)]
pub mod testing {
  //! Scripted transport for tests.

  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;

  #[derive(Debug, Clone)]
  enum Scripted {
    Respond(Response),
    Fail,
  }

  /// Answers from a table keyed by URL. An exact URL wins; otherwise any route
  /// that matches once queries are ignored answers, so cache-busted URLs still
  /// reach their route.
  #[derive(Default)]
  pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<Vec<Request>>,
    delay: Mutex<Option<Duration>>,
    offline: AtomicBool,
  }

  impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
      self.respond_with(url, Response::new(status, ResponseKind::Cors, body));
    }

    pub fn respond_with(&self, url: &str, response: Response) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), Scripted::Respond(response));
    }

    pub fn fail(&self, url: &str) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), Scripted::Fail);
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
      *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<Request> {
      self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
      self.calls.lock().unwrap().len()
    }

    fn lookup(&self, url: &Url) -> Option<Scripted> {
      let routes = self.routes.lock().unwrap();
      if let Some(found) = routes.get(url.as_str()) {
        return Some(found.clone());
      }
      let bare = without_query(url);
      routes
        .iter()
        .find(|(key, _)| Url::parse(key).map(|k| without_query(&k)).ok() == Some(bare.clone()))
        .map(|(_, scripted)| scripted.clone())
    }
  }

  fn without_query(url: &Url) -> Url {
    let mut bare = url.clone();
    bare.set_query(None);
    bare
  }

  impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
      self.calls.lock().unwrap().push(request.clone());
      let delay = *self.delay.lock().unwrap();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }

      let url = request.url.to_string();
      if self.offline.load(Ordering::SeqCst) {
        return Err(TransportError::Connection {
          url,
          message: "offline".to_string(),
        });
      }

      match self.lookup(&request.url) {
        Some(Scripted::Respond(response)) => Ok(response),
        Some(Scripted::Fail) | None => Err(TransportError::Connection {
          url,
          message: "unreachable".to_string(),
        }),
      }
    }
  }
}
