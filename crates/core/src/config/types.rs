use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::defaults;

/// Log level for the relay and the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Off,
  #[default]
  Warn,
  Info,
  Debug,
  Trace,
}

impl LogLevel {
  pub fn as_filter(&self) -> &'static str {
    match self {
      LogLevel::Off => "off",
      LogLevel::Warn => "warn",
      LogLevel::Info => "info",
      LogLevel::Debug => "debug",
      LogLevel::Trace => "trace",
    }
  }
}

impl FromStr for LogLevel {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "off" => Ok(LogLevel::Off),
      "warn" => Ok(LogLevel::Warn),
      "info" => Ok(LogLevel::Info),
      "debug" => Ok(LogLevel::Debug),
      "trace" => Ok(LogLevel::Trace),
      _ => Err(ConfigError::InvalidLogLevel(s.to_string())),
    }
  }
}

/// Extra fields stamped on every emitted log line, given as `key=value`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogFields(pub BTreeMap<String, String>);

impl LogFields {
  /// Parse and insert one `key=value` pair. Only the first `=` splits, so
  /// values may contain `=` themselves.
  pub fn insert_pair(&mut self, pair: &str) -> Result<()> {
    let (key, value) = parse_log_field(pair)?;
    self.0.insert(key, value);
    Ok(())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
    self.0.iter()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for LogFields {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let pairs: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
    write!(f, "{}", pairs.join(" "))
  }
}

pub fn parse_log_field(pair: &str) -> Result<(String, String)> {
  match pair.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(ConfigError::InvalidLogField(pair.to_string())),
  }
}

/// Runner and transport settings for one `relay` invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
  /// Accept any TLS certificate from the upload endpoint
  pub insecure: bool,
  /// Dial timeout for the upload connection; zero disables it
  pub connect_timeout: Duration,
  /// Stream-level retries, taken only on connect timeouts
  pub retry: u32,
  /// Transport-level full-body resends on errors and non-2xx responses
  pub stream_retry: u32,
  /// Pause between transport-level resends
  pub sleep_duration: Duration,
  /// Upload endpoint; empty means the output is not uploaded
  pub url: String,
  /// Command followed by its arguments
  pub args: Vec<String>,
  pub log_file: Option<PathBuf>,
  /// Sent as `Request-Id` on every upload attempt
  pub request_id: Option<String>,
  pub log_level: LogLevel,
  pub log_fields: LogFields,
}

impl Default for RelayConfig {
  fn default() -> Self {
    Self {
      insecure: false,
      connect_timeout: defaults::CONNECT_TIMEOUT,
      retry: defaults::RETRY,
      stream_retry: defaults::STREAM_RETRY,
      sleep_duration: defaults::SLEEP_DURATION,
      url: String::new(),
      args: Vec::new(),
      log_file: None,
      request_id: None,
      log_level: LogLevel::Warn,
      log_fields: LogFields::default(),
    }
  }
}

/// Effective server configuration after merging defaults, file and flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
  pub port: u16,
  /// Idle interval after which subscribers receive a keepalive signal; zero
  /// disables keepalives
  #[serde(with = "duration_secs")]
  pub heartbeat: Duration,
  /// `http(s)://` base URL or a directory; `None` disables archiving
  pub storage_base: Option<String>,
  pub log_file: Option<PathBuf>,
  pub log_level: LogLevel,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      port: defaults::port(),
      heartbeat: defaults::HEARTBEAT,
      storage_base: None,
      log_file: None,
      log_level: LogLevel::Info,
    }
  }
}

mod duration_secs {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("toml: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("unexpected log field {0:?}. Format expected: key=value")]
  InvalidLogField(String),
  #[error("unknown log level `{0}`")]
  InvalidLogLevel(String),
  #[error("a command to run is required")]
  MissingCommand,
  #[error("invalid duration: {0}")]
  InvalidDuration(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
