use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Base URL of the hosted service, used when no config file overrides it.
const DEFAULT_BASE_URL: &str = "https://api.tally.app";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// API base URL. Self-hosted deployments point this at their instance.
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Per-request timeout in seconds.
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      request_timeout_secs: default_request_timeout(),
    }
  }
}

fn default_base_url() -> String {
  DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tally.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tally/config.yaml
  /// 4. ~/.config/tally/config.yaml
  ///
  /// No file at all is fine: the hosted service needs no configuration.
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
      None => {
        debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tally.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tally").join("config.yaml");
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

  /// Get the account password from the environment.
  ///
  /// Checks TALLY_PASSWORD. Used by the CLI when no `--password` flag is
  /// given, so the password never has to appear in shell history.
  pub fn password_from_env() -> Result<String> {
    std::env::var("TALLY_PASSWORD")
      .map_err(|_| eyre!("Password not found. Pass --password or set TALLY_PASSWORD."))
  }
}
