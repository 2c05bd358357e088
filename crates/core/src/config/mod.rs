mod defaults;
mod load;
mod types;
mod validate;

pub use load::{ServerOverrides, finalize_relay, load_server};
pub use types::{
  ConfigError, LogFields, LogLevel, RelayConfig, Result, ServerConfig, parse_log_field,
};
pub use validate::secs_to_duration;

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use std::time::Duration;

  #[test]
  fn relay_defaults_are_correct() {
    let cfg = RelayConfig::default();
    assert!(!cfg.insecure);
    assert_eq!(cfg.connect_timeout, Duration::from_secs(1));
    assert_eq!(cfg.retry, 5);
    assert_eq!(cfg.stream_retry, 60);
    assert_eq!(cfg.sleep_duration, Duration::from_secs(1));
    assert_eq!(cfg.log_level, LogLevel::Warn);
    assert!(cfg.log_fields.is_empty());
  }

  #[test]
  fn log_field_splits_on_first_equals() {
    let mut fields = LogFields::default();
    fields.insert_pair("app=web").unwrap();
    fields.insert_pair("query=a=b").unwrap();
    assert_eq!(fields.0.get("app").map(String::as_str), Some("web"));
    assert_eq!(fields.0.get("query").map(String::as_str), Some("a=b"));
    assert_eq!(fields.to_string(), "app=web query=a=b");
  }

  #[test]
  fn log_field_without_equals_is_rejected() {
    let err = parse_log_field("novalue").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidLogField(ref v) if v == "novalue"));
    assert!(parse_log_field("=value").is_err());
  }

  #[test]
  fn relay_requires_a_command() {
    let err = finalize_relay(RelayConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::MissingCommand));

    let cfg = RelayConfig {
      args: vec!["echo".into(), "hi".into()],
      ..RelayConfig::default()
    };
    assert!(finalize_relay(cfg).is_ok());
  }

  #[test]
  fn server_file_then_overrides_precedence() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("server.toml");
    fs::write(
      &path,
      r#"
port = 7000
heartbeat = 2.5
storage_base = "/var/lib/relay"
log_level = "debug"
"#,
    )
    .unwrap();

    let cfg = load_server(Some(&path), ServerOverrides::default()).unwrap();
    assert_eq!(cfg.port, 7000);
    assert_eq!(cfg.heartbeat, Duration::from_millis(2500));
    assert_eq!(cfg.storage_base.as_deref(), Some("/var/lib/relay"));
    assert_eq!(cfg.log_level, LogLevel::Debug);

    let overrides = ServerOverrides {
      port: Some(8000),
      log_level: Some(LogLevel::Warn),
      ..ServerOverrides::default()
    };
    let cfg = load_server(Some(&path), overrides).unwrap();
    // flags override the file
    assert_eq!(cfg.port, 8000);
    assert_eq!(cfg.log_level, LogLevel::Warn);
    // file still overrides defaults
    assert_eq!(cfg.heartbeat, Duration::from_millis(2500));
  }

  #[test]
  fn server_file_rejects_unknown_keys() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("server.toml");
    fs::write(&path, "enforce_https = true\n").unwrap();
    let err = load_server(Some(&path), ServerOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
  }

  #[test]
  fn negative_heartbeat_in_file_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let path = td.path().join("server.toml");
    fs::write(&path, "heartbeat = -2.0\n").unwrap();
    let err = load_server(Some(&path), ServerOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidDuration(_)));
  }

  #[test]
  fn missing_server_file_is_an_io_error() {
    let td = tempfile::tempdir().unwrap();
    let err = load_server(Some(&td.path().join("nope.toml")), ServerOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
  }

  #[test]
  fn log_level_parses_case_insensitively() {
    assert_eq!("INFO".parse::<LogLevel>().unwrap(), LogLevel::Info);
    assert_eq!("off".parse::<LogLevel>().unwrap(), LogLevel::Off);
    assert!("loud".parse::<LogLevel>().is_err());
  }

  #[test]
  fn negative_seconds_are_rejected() {
    assert!(secs_to_duration(-1.0).is_err());
    assert_eq!(secs_to_duration(0.0).unwrap(), Duration::ZERO);
    assert_eq!(secs_to_duration(1.5).unwrap(), Duration::from_millis(1500));
  }
}
