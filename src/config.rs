use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::strategy::FetchRules;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the app being cached.
  pub origin: Url,
  /// Version stamp baked into store names. Bump it to invalidate old caches
  /// on the next activate.
  pub cache_version: String,
  /// Shell assets fetched at install time, as paths on the origin.
  pub shell_manifest: Vec<String>,
  /// Path prefix that marks API routes.
  pub api_prefix: String,
  /// Hostname of the third-party image CDN.
  pub image_host: String,
  /// Cache database location (defaults to the platform data directory).
  pub db_path: Option<PathBuf>,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Sync tag that triggers a queue drain. Other tags are ignored.
  pub tag: String,
  /// Write endpoint pending changes are replayed against, as a path on the
  /// origin.
  pub endpoint: String,
  /// Seconds between drain attempts in watch mode.
  pub poll_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub icon: String,
  pub badge: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      cache_version: "v1".to_string(),
      shell_manifest: default_shell_manifest(),
      api_prefix: "/api".to_string(),
      image_host: "image.tmdb.org".to_string(),
      db_path: None,
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "watchlist-sync".to_string(),
      endpoint: "/api/watchlist".to_string(),
      poll_secs: 30,
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "ReelStream".to_string(),
      icon: "/icons/icon-96.png".to_string(),
      badge: "/icons/badge-96.png".to_string(),
    }
  }
}

fn default_origin() -> Url {
  // The literal is well-formed, so this cannot fail at runtime.
  Url::parse("http://localhost:3000").unwrap()
}

fn default_shell_manifest() -> Vec<String> {
  vec![
    "/".to_string(),
    "/manifest.json".to_string(),
    "/icons/icon-96.png".to_string(),
    "/icons/icon-192.png".to_string(),
    "/icons/icon-512.png".to_string(),
  ]
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./reelcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/reelcache/config.yaml
  /// 4. ~/.config/reelcache/config.yaml
  ///
  /// Every setting has a default, so a missing file is not an error.
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
    let local = PathBuf::from("reelcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("reelcache").join("config.yaml");
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

  fn validate(&self) -> Result<()> {
    if self.origin.host_str().is_none() {
      return Err(eyre!("Config origin must include a host"));
    }
    if self.cache_version.is_empty() {
      return Err(eyre!("Config cache_version must not be empty"));
    }
    if self.shell_manifest.is_empty() {
      return Err(eyre!("Config shell_manifest must list at least one asset"));
    }
    if !self.api_prefix.starts_with('/') {
      return Err(eyre!("Config api_prefix must start with '/'"));
    }

    Ok(())
  }

  /// Get the API token from environment variables, if set.
  ///
  /// Attached only to same-origin requests; never sent to third-party hosts.
  pub fn api_token() -> Option<String> {
    std::env::var("REELCACHE_API_TOKEN").ok()
  }

  pub fn fetch_rules(&self) -> FetchRules {
    FetchRules {
      api_prefix: self.api_prefix.clone(),
      image_host: self.image_host.clone(),
    }
  }

  /// Turn a target into an absolute URL: absolute URLs pass through, paths
  /// are joined onto the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    match Url::parse(target) {
      Ok(url) => Ok(url),
      Err(url::ParseError::RelativeUrlWithoutBase) => self
        .origin
        .join(target)
        .map_err(|e| eyre!("Cannot resolve {} against {}: {}", target, self.origin, e)),
      Err(e) => Err(eyre!("Invalid URL {}: {}", target, e)),
    }
  }

  /// Absolute URL of the sync write endpoint.
  pub fn sync_endpoint(&self) -> Result<Url> {
    self.resolve(&self.sync.endpoint)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.sync.tag, "watchlist-sync");
    assert_eq!(config.cache_version, "v1");
  }

  #[test]
  fn test_partial_yaml_fills_in_defaults() {
    let config: Config =
      serde_yaml::from_str("origin: \"https://reels.example.com\"\ncache_version: v7\n").unwrap();
    assert_eq!(config.origin.as_str(), "https://reels.example.com/");
    assert_eq!(config.cache_version, "v7");
    assert_eq!(config.image_host, "image.tmdb.org");
    assert_eq!(config.sync.endpoint, "/api/watchlist");
  }

  #[test]
  fn test_resolve_joins_paths_and_passes_absolute_urls() {
    let config = Config::default();
    assert_eq!(
      config.resolve("/api/movies").unwrap().as_str(),
      "http://localhost:3000/api/movies"
    );
    assert_eq!(
      config
        .resolve("https://image.tmdb.org/t/p/w500/x.jpg")
        .unwrap()
        .as_str(),
      "https://image.tmdb.org/t/p/w500/x.jpg"
    );
  }

  #[test]
  fn test_validate_rejects_prefix_without_slash() {
    let config = Config {
      api_prefix: "api".to_string(),
      ..Config::default()
    };
    assert!(config.validate().is_err());
  }
}
