//! Server configuration, loaded from TOML with full defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default number of match items per `match` reply.
pub const DEFAULT_MATCH_BATCH_SIZE: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config file: {0}")]
  Io(#[from] std::io::Error),
  #[error("Failed to parse config file: {0}")]
  Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub server: ServerSettings,
  pub backend: BackendSettings,
}

/// Settings for the caller-facing RPC listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
  /// Address the RPC transport listens on.
  pub listen_addr: String,
  /// Match items per `match` reply.
  pub match_batch_size: usize,
}

impl Default for ServerSettings {
  fn default() -> Self {
    Self {
      listen_addr: "127.0.0.1:8910".to_string(),
      match_batch_size: DEFAULT_MATCH_BATCH_SIZE,
    }
  }
}

/// Settings for the shared codesearch backend process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
  /// Repository identifier the index was built from.
  pub repo: String,
  /// Reference names to search.
  pub refs: Vec<String>,
  /// Path to the codesearch binary.
  pub binary: PathBuf,
  /// Extra process arguments, passed through before the index arguments.
  pub args: Vec<String>,
  /// Path to the prebuilt index.
  pub index_path: PathBuf,
  /// Address of the backend's query port.
  pub query_addr: String,
}

impl Default for BackendSettings {
  fn default() -> Self {
    Self {
      repo: String::new(),
      refs: vec!["HEAD".to_string()],
      binary: PathBuf::from("codesearch"),
      args: Vec::new(),
      index_path: PathBuf::from("index.cs"),
      query_addr: "127.0.0.1:9800".to_string(),
    }
  }
}

impl Config {
  /// Load config from a TOML file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
  }

  /// Load config from `path` if given, defaults otherwise.
  pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
    match path {
      Some(path) => Self::load(path),
      None => Ok(Self::default()),
    }
  }
}
