//! Intercepting cache proxy.
//!
//! `CacheProxy` wraps the real network and is itself a [`Transport`], so every
//! request the client makes can be answered from its stores. It owns a
//! versioned pair of stores (`{version}-static` and `{version}-data`) and drops
//! stores from older versions when it activates.
//!
//! [`Transport`]: crate::transport::Transport

mod store;
mod strategy;
mod worker;

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeSet;
use std::time::Duration;
use url::Url;

use crate::config::Config;

pub use store::ProxyStore;
pub use worker::{CacheProxy, Gateway};

/// Everything the proxy needs to know about the deployment.
#[derive(Debug, Clone)]
pub struct ProxySettings {
  /// Generation tag; stores are named after it
  pub version: String,
  /// Where the application itself is served from
  pub origin: Url,
  /// Shell assets precached on install, relative to `origin`
  pub shell_assets: Vec<String>,
  /// Lowercase hosts that serve the dataset
  pub data_hosts: BTreeSet<String>,
  /// Page served to navigations when offline
  pub fallback_url: Url,
  pub request_budget: Duration,
  pub data_budget: Duration,
}

impl ProxySettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.proxy.origin)
      .map_err(|e| eyre!("Invalid proxy origin {:?}: {}", config.proxy.origin, e))?;
    let fallback_url = origin
      .join(&config.proxy.fallback_page)
      .map_err(|e| eyre!("Invalid fallback page {:?}: {}", config.proxy.fallback_page, e))?;

    Ok(Self {
      version: config.proxy.version.clone(),
      origin,
      shell_assets: config.proxy.shell_assets.clone(),
      data_hosts: config.proxy.data_hosts.clone(),
      fallback_url,
      request_budget: config.network.fetch_timeout(),
      data_budget: config.proxy.data_budget(),
    })
  }

  pub fn static_store(&self) -> String {
    format!("{}-static", self.version)
  }

  pub fn data_store(&self) -> String {
    format!("{}-data", self.version)
  }
}

#[cfg(test)]
pub(crate) mod fixtures {
  use super::*;

  pub const ORIGIN: &str = "https://cards.example.com/";
  pub const DATA_URL: &str = "https://docs.google.com/spreadsheets/d/e/x/pub?output=tsv";

  pub fn settings(version: &str) -> ProxySettings {
    let origin = Url::parse(ORIGIN).unwrap();
    ProxySettings {
      version: version.to_string(),
      fallback_url: origin.join("./index.html").unwrap(),
      origin,
      shell_assets: vec!["./".into(), "./index.html".into(), "./app.js".into()],
      data_hosts: ["docs.google.com".to_string()].into_iter().collect(),
      request_budget: Duration::from_millis(300),
      data_budget: Duration::from_millis(300),
    }
  }

  /// Answer every shell asset of `settings` with a small body.
  pub fn serve_shell(transport: &crate::transport::testing::ScriptedTransport) {
    transport.respond(ORIGIN, 200, "<html>shell</html>");
    transport.respond(&format!("{}index.html", ORIGIN), 200, "<html>shell</html>");
    transport.respond(&format!("{}app.js", ORIGIN), 200, "console.log(1)");
  }
}
