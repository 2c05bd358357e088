use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{LogLevel, RelayConfig, Result, ServerConfig};
use super::validate::{secs_to_duration, validate_relay};

/// Values given explicitly on the command line; they win over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerOverrides {
  pub port: Option<u16>,
  pub heartbeat: Option<Duration>,
  pub storage_base: Option<String>,
  pub log_file: Option<PathBuf>,
  pub log_level: Option<LogLevel>,
}

/// Load the server configuration: defaults, then the optional TOML file,
/// then explicit overrides.
pub fn load_server(path: Option<&Path>, overrides: ServerOverrides) -> Result<ServerConfig> {
  let mut cfg = ServerConfig::default();

  if let Some(path) = path {
    let s = fs::read_to_string(path)?;
    let partial: PartialServerConfig = toml::from_str(&s)?;
    cfg = partial.merge_over(cfg)?;
  }

  Ok(overrides.merge_over(cfg))
}

/// Check a relay configuration assembled from flags before anything is spawned.
pub fn finalize_relay(cfg: RelayConfig) -> Result<RelayConfig> {
  validate_relay(&cfg)?;
  Ok(cfg)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialServerConfig {
  pub port: Option<u16>,
  /// Seconds, fractional allowed
  pub heartbeat: Option<f64>,
  pub storage_base: Option<String>,
  pub log_file: Option<PathBuf>,
  pub log_level: Option<LogLevel>,
}

impl PartialServerConfig {
  fn merge_over(self, base: ServerConfig) -> Result<ServerConfig> {
    let PartialServerConfig {
      port,
      heartbeat,
      storage_base,
      log_file,
      log_level,
    } = self;

    Ok(ServerConfig {
      port: port.unwrap_or(base.port),
      heartbeat: match heartbeat {
        Some(secs) => secs_to_duration(secs)?,
        None => base.heartbeat,
      },
      storage_base: storage_base.or(base.storage_base),
      log_file: log_file.or(base.log_file),
      log_level: log_level.unwrap_or(base.log_level),
    })
  }
}

impl ServerOverrides {
  fn merge_over(self, base: ServerConfig) -> ServerConfig {
    ServerConfig {
      port: self.port.unwrap_or(base.port),
      heartbeat: self.heartbeat.unwrap_or(base.heartbeat),
      storage_base: self.storage_base.or(base.storage_base),
      log_file: self.log_file.or(base.log_file),
      log_level: self.log_level.unwrap_or(base.log_level),
    }
  }
}
