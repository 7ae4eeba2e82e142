use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::matcher::PatternSet;

/// Matches image URLs, optionally followed by a query string.
pub const DEFAULT_IMAGE_PATTERN: &str = r"\.(jpg|png|gif|svg|jpeg)(\?.*)?$";

/// Separator between the build version and the purpose tag in namespace keys.
pub const NAMESPACE_SEPARATOR: &str = ":";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Base URL every relative path is resolved against
  pub origin: String,
  /// Build version tagging every namespace this build creates
  #[serde(default = "default_version")]
  pub version: String,
  /// Development mode: log everything and always go to the network
  #[serde(default)]
  pub development: bool,
  /// Debug mode: log everything but keep the caching strategies
  #[serde(default)]
  pub debug: bool,
  /// Requests to these URLs bypass the cache entirely
  #[serde(default = "default_ignore_patterns")]
  pub ignore_patterns: Vec<String>,
  /// Paths materialized into the offline namespace on install
  #[serde(default = "default_offline_resources")]
  pub offline_resources: Vec<String>,
  /// Fallback HTML shell
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  /// Fallback for failed image requests
  #[serde(default = "default_offline_image")]
  pub offline_image: String,
  #[serde(default = "default_image_pattern")]
  pub image_pattern: String,
  /// Cache database location (default: $XDG_DATA_HOME/offcache/cache.db)
  pub store_path: Option<PathBuf>,
  /// Write diagnostics to this file instead of stderr
  pub log_file: Option<PathBuf>,
}

/// Falls back to the crate version when no build stamp was provided at compile time.
fn default_version() -> String {
  option_env!("OFFCACHE_BUILD_VERSION")
    .unwrap_or(env!("CARGO_PKG_VERSION"))
    .to_string()
}

pub fn default_ignore_patterns() -> Vec<String> {
  [
    r"https?://www\.google-analytics\.com/",
    r"https?://ajax\.cloudflare\.com/",
    r"https?://fonts\.googleapis\.com/",
    r"https?://fonts\.gstatic\.com/",
    r"https?://cdn\.onesignal\.com/",
    r"https?://onesignal\.com/",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_offline_resources() -> Vec<String> {
  vec![
    "/".to_string(),
    "/offline/index.html".to_string(),
    "/offline/placeholder.svg".to_string(),
  ]
}

fn default_offline_page() -> String {
  "/offline/index.html".to_string()
}

fn default_offline_image() -> String {
  "/offline/placeholder.svg".to_string()
}

fn default_image_pattern() -> String {
  DEFAULT_IMAGE_PATTERN.to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    Self::from_located(Self::locate(explicit_path)?, None)
  }

  /// Like [`Config::load`], with `origin` overriding the file's origin.
  ///
  /// Defaults are used only when no config file exists at all; a file that
  /// exists but does not parse is still an error.
  pub fn load_with_origin(explicit_path: Option<&Path>, origin: Option<&str>) -> Result<Self> {
    Self::from_located(Self::locate(explicit_path)?, origin)
  }

  fn from_located(found: Option<PathBuf>, origin: Option<&str>) -> Result<Self> {
    match (found, origin) {
      (Some(path), Some(origin)) => {
        let config = Config {
          origin: origin.to_string(),
          ..Self::load_from_path(&path)?
        };
        config.validate()?;
        Ok(config)
      }
      (Some(path), None) => Self::load_from_path(&path),
      (None, Some(origin)) => Self::for_origin(origin),
      (None, None) => Err(eyre!(
        "No configuration file found. Create one at ~/.config/offcache/config.yaml \
         or pass --origin."
      )),
    }
  }

  /// Path of the config file to read, if any. An explicit path must exist.
  pub fn locate(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
    match explicit_path {
      Some(p) if p.exists() => Ok(Some(p.to_path_buf())),
      Some(p) => Err(eyre!("Config file not found: {}", p.display())),
      None => Ok(Self::find_config_file()),
    }
  }

  /// Defaults for everything but the origin.
  pub fn for_origin(origin: &str) -> Result<Self> {
    Self::from_yaml(&format!("origin: {:?}\n", origin))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Check everything that would otherwise fail later at request time.
  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;
    if self.version.is_empty() {
      return Err(eyre!("Build version must not be empty"));
    }
    if self.version.contains(NAMESPACE_SEPARATOR) {
      return Err(eyre!(
        "Build version {:?} must not contain {:?}",
        self.version,
        NAMESPACE_SEPARATOR
      ));
    }
    self.ignore_set()?;
    self.image_set()?;
    for path in self
      .offline_resources
      .iter()
      .chain([&self.offline_page, &self.offline_image])
    {
      self.resolve(path)?;
    }
    Ok(())
  }

  /// Whether diagnostics are emitted at all.
  pub fn logging_enabled(&self) -> bool {
    self.development || self.debug
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {:?}: {}", self.origin, e))
  }

  /// Resolve a path (or absolute URL) against the origin.
  pub fn resolve(&self, path: &str) -> Result<String> {
    let url = self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Cannot resolve {:?} against {}: {}", path, self.origin, e))?;
    Ok(url.to_string())
  }

  pub fn ignore_set(&self) -> Result<PatternSet> {
    PatternSet::compile(&self.ignore_patterns)
  }

  pub fn image_set(&self) -> Result<PatternSet> {
    PatternSet::compile([&self.image_pattern])
  }

  /// Cache database path, defaulting under the user data directory.
  pub fn store_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.store_path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offcache").join("cache.db"))
  }
}
