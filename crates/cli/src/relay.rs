use std::ffi::OsString;
use std::time::Duration;

use clap::Parser;
use relay_core::config::{self, LogFields, LogLevel, RelayConfig};
use relay_core::logging::{self, LogGuard, LogTarget};
use relay_core::upload;

use crate::args::RelayArgs;

/// Exit code for failures of the relay itself, before the command runs.
const RELAY_FAILURE: i32 = 1;

/// Parse the process arguments, run the command and return the exit code.
pub fn run() -> i32 {
  run_from(std::env::args_os())
}

pub fn run_from<I, T>(argv: I) -> i32
where
  I: IntoIterator<Item = T>,
  T: Into<OsString> + Clone,
{
  let args = match RelayArgs::try_parse_from(argv) {
    Ok(args) => args,
    Err(e) => {
      // --help and --version land here too, with exit code 0
      let _ = e.print();
      return e.exit_code();
    }
  };

  let cfg = match relay_config(args) {
    Ok(cfg) => cfg,
    Err(e) => {
      eprintln!("relay: {e}");
      return RELAY_FAILURE;
    }
  };

  let guard = init_logging(&cfg);
  let runtime = match tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
  {
    Ok(rt) => rt,
    Err(e) => {
      eprintln!("relay: failed to start runtime: {e}");
      return RELAY_FAILURE;
    }
  };

  let code = runtime.block_on(upload::run(&cfg));
  // An upload still running past its grace is abandoned here.
  runtime.shutdown_timeout(Duration::from_millis(100));
  if let Some(guard) = guard {
    guard.close();
  }
  code
}

fn relay_config(args: RelayArgs) -> config::Result<RelayConfig> {
  let mut log_fields = LogFields::default();
  for pair in &args.log_fields {
    log_fields.insert_pair(pair)?;
  }

  config::finalize_relay(RelayConfig {
    insecure: args.insecure,
    connect_timeout: config::secs_to_duration(args.connect_timeout)?,
    retry: args.retry,
    stream_retry: args.stream_retry,
    url: args.url,
    args: args.command,
    log_file: args.log_file,
    request_id: args.request_id,
    log_level: if args.verbose {
      LogLevel::Info
    } else {
      LogLevel::Warn
    },
    log_fields,
    ..RelayConfig::default()
  })
}

/// Logs go to the log file when one is given and are discarded otherwise.
/// An unusable log file never stops the command from running.
fn init_logging(cfg: &RelayConfig) -> Option<LogGuard> {
  let target = LogTarget::file_or(cfg.log_file.as_deref(), LogTarget::Discard);
  match logging::init(target, cfg.log_level, &cfg.log_fields) {
    Ok(guard) => Some(guard),
    Err(e) => {
      eprintln!("relay: cannot open log file, logging disabled: {e}");
      logging::init(LogTarget::Discard, cfg.log_level, &cfg.log_fields).ok()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(argv: &[&str]) -> RelayArgs {
    RelayArgs::try_parse_from(argv).unwrap()
  }

  #[test]
  fn flags_become_config() {
    let cfg = relay_config(parse(&[
      "relay",
      "--stream-retry",
      "3",
      "--connect-timeout",
      "2.5",
      "--request-id",
      "abc",
      "--log-field",
      "app=web",
      "http://x/streams/1",
      "--",
      "true",
    ]))
    .unwrap();
    assert_eq!(cfg.stream_retry, 3);
    assert_eq!(cfg.retry, 5);
    assert_eq!(cfg.connect_timeout, Duration::from_millis(2500));
    assert_eq!(cfg.request_id.as_deref(), Some("abc"));
    assert_eq!(cfg.log_fields.to_string(), "app=web");
    assert_eq!(cfg.log_level, LogLevel::Warn);
    assert_eq!(cfg.args, vec!["true"]);
    assert_eq!(cfg.sleep_duration, Duration::from_secs(1));
  }

  #[test]
  fn verbose_switches_to_info() {
    let cfg = relay_config(parse(&["relay", "-v", "", "--", "true"])).unwrap();
    assert_eq!(cfg.log_level, LogLevel::Info);
  }

  #[test]
  fn malformed_log_field_is_a_config_error() {
    let err = relay_config(parse(&["relay", "--log-field", "oops", "", "--", "true"])).unwrap_err();
    assert!(err.to_string().contains("oops"));
  }

  #[test]
  fn negative_connect_timeout_is_rejected() {
    let args = parse(&["relay", "--connect-timeout=-1", "", "--", "true"]);
    assert!(relay_config(args).is_err());
  }

  #[test]
  fn empty_command_is_rejected() {
    let err = relay_config(parse(&["relay", "", "--", ""])).unwrap_err();
    assert!(matches!(err, config::ConfigError::MissingCommand));
  }
}
