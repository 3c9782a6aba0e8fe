use color_eyre::{eyre::eyre, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::MAX_AGE_LIMIT_SECONDS;

const DATA_DIR_ENV: &str = "BREWDEX_DATA_DIR";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub shell: ShellConfig,
  pub images: ImagesConfig,
  pub http: HttpConfig,
  /// Where the cache database, local storage and logs live
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL of the brewery API; its origin decides API routing
  pub base_url: Url,
  pub cache_name: String,
  pub max_entries: usize,
  pub max_age_seconds: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: Url::parse("https://api.openbrewerydb.org/v1/").expect("valid default url"),
      cache_name: "api-cache".to_string(),
      max_entries: 500,
      max_age_seconds: 3600,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
  /// Origin the application shell is served from
  pub origin: Url,
  pub cache_prefix: String,
  /// Bumping this supersedes every earlier shell namespace on activation
  pub version: String,
  /// Paths precached at install time, relative to `origin`
  pub manifest: Vec<String>,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://localhost:3000/").expect("valid default url"),
      cache_prefix: "beer-app-cache".to_string(),
      version: "v1".to_string(),
      manifest: ["/", "/index.html", "/manifest.json", "/static/js/bundle.js", "/beer"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
  pub cache_name: String,
  /// Regex matched against the URL path of hashed image assets
  pub pattern: String,
}

impl Default for ImagesConfig {
  fn default() -> Self {
    Self {
      cache_name: "image-cache".to_string(),
      pattern: r"/dist/.+\.[0-9a-f]{32}\.(?:png|jpg|jpeg|svg|gif)$".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
  pub timeout_seconds: u64,
  pub user_agent: String,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      timeout_seconds: 30,
      user_agent: concat!("brewdex/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./brewdex.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/brewdex/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("brewdex.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("brewdex").join("config.yaml");
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

  /// Reject values the worker cannot run with.
  pub fn validate(&self) -> Result<()> {
    if self.api.max_entries == 0 {
      return Err(eyre!("api.max_entries must be at least 1"));
    }
    if self.api.max_age_seconds > MAX_AGE_LIMIT_SECONDS {
      return Err(eyre!(
        "api.max_age_seconds must be at most {}: {}",
        MAX_AGE_LIMIT_SECONDS,
        self.api.max_age_seconds
      ));
    }
    if !self.api.base_url.path().ends_with('/') {
      return Err(eyre!(
        "api.base_url must end with '/': {}",
        self.api.base_url
      ));
    }
    if self.shell.version.trim().is_empty() {
      return Err(eyre!("shell.version must not be empty"));
    }
    if let Some(entry) = self.shell.manifest.iter().find(|p| !p.starts_with('/')) {
      return Err(eyre!("shell.manifest entries must start with '/': {}", entry));
    }
    Regex::new(&self.images.pattern)
      .map_err(|e| eyre!("Invalid images.pattern '{}': {}", self.images.pattern, e))?;

    Ok(())
  }

  /// Data directory: config value, then $BREWDEX_DATA_DIR, then the
  /// platform data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
      return Ok(PathBuf::from(dir));
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("brewdex"))
  }

  pub fn cache_db_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("cache.db"))
  }

  pub fn local_storage_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("local_storage.db"))
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("logs"))
  }
}
