use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::PlaylistVideoPurge;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub oauth: OAuthConfig,
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub worker: WorkerConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

/// Installed-application OAuth client registration.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
  pub client_id: String,
  /// May be left out of the file and supplied through YTE_CLIENT_SECRET
  #[serde(default)]
  pub client_secret: String,
  #[serde(default = "default_auth_uri")]
  pub auth_uri: String,
  #[serde(default = "default_token_uri")]
  pub token_uri: String,
}

fn default_auth_uri() -> String {
  "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
  "https://oauth2.googleapis.com/token".to_string()
}

const MAX_API_BATCH: u32 = 50;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  /// Items per page requested from list endpoints
  pub page_size: u32,
  /// Ids per call for endpoints that cap id lists
  pub batch_size: usize,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://www.googleapis.com/youtube/v3".to_string(),
      page_size: MAX_API_BATCH,
      batch_size: MAX_API_BATCH as usize,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Persist fetched data between runs
  pub cache_downloaded_data: bool,
  pub encrypt_cache: bool,
  /// Directory for the cache and credentials files (defaults to the
  /// platform cache directory)
  pub dir: Option<PathBuf>,
  /// What a playlist refresh drops from the cached playlist videos
  pub playlist_video_purge: PlaylistVideoPurge,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      cache_downloaded_data: true,
      encrypt_cache: true,
      dir: None,
      playlist_video_purge: PlaylistVideoPurge::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  pub poll_interval_ms: u64,
  pub shutdown_timeout_ms: u64,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      poll_interval_ms: 250,
      shutdown_timeout_ms: 250,
    }
  }
}

impl WorkerConfig {
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms.max(1))
  }

  pub fn shutdown_timeout(&self) -> Duration {
    Duration::from_millis(self.shutdown_timeout_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive; RUST_LOG takes precedence
  pub level: String,
  /// Log to a daily file in the cache directory instead of stderr
  pub file: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: true,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./yte.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/yte/config.yaml
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
        "No configuration file found. Create one at ~/.config/yte/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("yte.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("yte").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config
      .validate()
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;

    Ok(config.with_env_overrides())
  }

  /// The API caps both page and batch sizes at 50.
  fn validate(&self) -> Result<()> {
    if !(1..=MAX_API_BATCH).contains(&self.api.page_size) {
      return Err(eyre!(
        "api.page_size must be between 1 and {}, got {}",
        MAX_API_BATCH,
        self.api.page_size
      ));
    }
    if !(1..=MAX_API_BATCH as usize).contains(&self.api.batch_size) {
      return Err(eyre!(
        "api.batch_size must be between 1 and {}, got {}",
        MAX_API_BATCH,
        self.api.batch_size
      ));
    }
    Ok(())
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Apply YTE_CLIENT_SECRET over the file's client secret.
  fn with_env_overrides(mut self) -> Self {
    if let Ok(secret) = std::env::var("YTE_CLIENT_SECRET") {
      self.oauth.client_secret = secret;
    }
    self
  }

  /// Refresh token used to create credentials when none are stored yet.
  ///
  /// Read from YTE_REFRESH_TOKEN.
  pub fn bootstrap_refresh_token() -> Option<String> {
    std::env::var("YTE_REFRESH_TOKEN")
      .ok()
      .filter(|token| !token.trim().is_empty())
  }

  /// Directory holding the cache, credentials and log files.
  pub fn cache_dir(&self) -> Result<PathBuf> {
    match &self.cache.dir {
      Some(dir) => Ok(dir.clone()),
      None => dirs::cache_dir()
        .map(|dir| dir.join("yte"))
        .ok_or_else(|| eyre!("No cache directory available; set cache.dir in the config file")),
    }
  }

  pub fn cache_file(&self) -> Result<PathBuf> {
    Ok(self.cache_dir()?.join("cache.json"))
  }

  pub fn credentials_file(&self) -> Result<PathBuf> {
    Ok(self.cache_dir()?.join("credentials.bin"))
  }
}
