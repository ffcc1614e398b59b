use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub sheet: SheetConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub proxy: ProxyConfig,
}

/// Where the inventory lives.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
  /// Published tab-separated export of the sheet
  pub dataset_url: Url,
  /// Script endpoint that accepts add/update requests
  pub write_url: Url,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Budget for a live dataset fetch or a save, in milliseconds
  #[serde(default = "default_fetch_timeout_ms")]
  pub fetch_timeout_ms: u64,
  /// Quiet period before a search query is applied
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
  /// How long a notice stays visible
  #[serde(default = "default_notice_ms")]
  pub notice_ms: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      fetch_timeout_ms: default_fetch_timeout_ms(),
      debounce_ms: default_debounce_ms(),
      notice_ms: default_notice_ms(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
  /// Cache generation; bump it to drop every stored response
  #[serde(default = "default_version")]
  pub version: String,
  /// Origin the application shell is served from
  #[serde(default = "default_origin")]
  pub origin: String,
  #[serde(default = "default_shell_assets")]
  pub shell_assets: Vec<String>,
  /// Hosts serving the dataset (case-insensitive)
  #[serde(
    default = "default_data_hosts",
    deserialize_with = "deserialize_lowercase_set"
  )]
  pub data_hosts: BTreeSet<String>,
  #[serde(default = "default_fallback_page")]
  pub fallback_page: String,
  /// Budget for dataset requests answered by the proxy, in milliseconds
  #[serde(default = "default_fetch_timeout_ms")]
  pub data_budget_ms: u64,
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      version: default_version(),
      origin: default_origin(),
      shell_assets: default_shell_assets(),
      data_hosts: default_data_hosts(),
      fallback_page: default_fallback_page(),
      data_budget_ms: default_fetch_timeout_ms(),
    }
  }
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

fn default_fetch_timeout_ms() -> u64 {
  12_000
}

fn default_debounce_ms() -> u64 {
  120
}

fn default_notice_ms() -> u64 {
  2_400
}

fn default_version() -> String {
  "cardshelf-v1".to_string()
}

fn default_origin() -> String {
  "http://localhost:8000/".to_string()
}

fn default_shell_assets() -> Vec<String> {
  [
    "./",
    "./index.html",
    "./styles.css",
    "./app.js",
    "./manifest.webmanifest",
    "./icon.webp",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn default_data_hosts() -> BTreeSet<String> {
  ["docs.google.com", "docs.googleusercontent.com"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_fallback_page() -> String {
  "./index.html".to_string()
}

impl NetworkConfig {
  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_millis(self.fetch_timeout_ms)
  }

  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.debounce_ms)
  }

  pub fn notice(&self) -> Duration {
    Duration::from_millis(self.notice_ms)
  }
}

impl ProxyConfig {
  pub fn data_budget(&self) -> Duration {
    Duration::from_millis(self.data_budget_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cardshelf.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cardshelf/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/cardshelf/config.yaml\n\
                 It needs at least sheet.dataset_url and sheet.write_url."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cardshelf.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cardshelf").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Directory for databases and logs.
  pub fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
      .map(|d| d.join("cardshelf"))
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
  }

  #[test]
  fn test_minimal_config_gets_defaults() {
    let file = write_config(
      "sheet:\n  dataset_url: https://docs.google.com/pub?output=tsv\n  write_url: https://script.google.com/macros/s/x/exec\n",
    );
    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.network.fetch_timeout(), Duration::from_millis(12_000));
    assert_eq!(config.network.debounce(), Duration::from_millis(120));
    assert_eq!(config.network.notice(), Duration::from_millis(2_400));
    assert_eq!(config.proxy.version, "cardshelf-v1");
    assert_eq!(config.proxy.shell_assets.len(), 6);
    assert!(config.proxy.data_hosts.contains("docs.googleusercontent.com"));
    assert_eq!(config.proxy.data_budget(), Duration::from_millis(12_000));
  }

  #[test]
  fn test_overrides_and_lowercased_hosts() {
    let file = write_config(
      r#"
sheet:
  dataset_url: https://docs.google.com/pub?output=tsv
  write_url: https://script.google.com/macros/s/x/exec
network:
  fetch_timeout_ms: 3000
proxy:
  version: shelf-v7
  origin: https://cards.example.com/
  data_hosts: [Docs.Google.com, SHEETS.example.com]
"#,
    );
    let config = Config::load(Some(file.path())).unwrap();

    assert_eq!(config.network.fetch_timeout(), Duration::from_millis(3000));
    assert_eq!(config.network.debounce_ms, 120);
    assert_eq!(config.proxy.version, "shelf-v7");
    assert_eq!(config.proxy.origin, "https://cards.example.com/");
    assert_eq!(
      config.proxy.data_hosts.iter().collect::<Vec<_>>(),
      ["docs.google.com", "sheets.example.com"]
    );
  }

  #[test]
  fn test_missing_sheet_urls_is_an_error() {
    let file = write_config("network:\n  debounce_ms: 50\n");
    assert!(Config::load(Some(file.path())).is_err());
  }

  #[test]
  fn test_explicit_missing_file_is_an_error() {
    let result = Config::load(Some(Path::new("/nonexistent/cardshelf.yaml")));
    assert!(result.is_err());
  }
}
