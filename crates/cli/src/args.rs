use std::path::PathBuf;

use clap::{ArgAction, Parser};
use relay_core::config::LogLevel;

#[derive(Debug, Parser)]
#[command(
  version,
  about = "Run a command and stream its output to a URL",
  long_about = None,
  bin_name = "relay"
)]
pub struct RelayArgs {
  /// Accept any TLS certificate from the upload endpoint
  #[arg(short = 'k', long)]
  pub insecure: bool,
  /// Upload retries taken when connecting times out
  #[arg(long, default_value_t = 5)]
  pub retry: u32,
  /// Full-body resends on transport errors and non-2xx responses
  #[arg(long, default_value_t = 60)]
  pub stream_retry: u32,
  /// Connect timeout in seconds (0 disables it)
  #[arg(long, value_name = "SECS", default_value_t = 1.0)]
  pub connect_timeout: f64,
  /// Append JSON logs to this file
  #[arg(long, value_name = "PATH")]
  pub log_file: Option<PathBuf>,
  /// Sent as `Request-Id` with every upload attempt
  #[arg(long, value_name = "ID")]
  pub request_id: Option<String>,
  /// Field added to every log line (repeatable)
  #[arg(long = "log-field", value_name = "KEY=VALUE", action = ArgAction::Append)]
  pub log_fields: Vec<String>,
  /// Log at info level instead of warn
  #[arg(short, long)]
  pub verbose: bool,
  /// Upload endpoint; pass "" to only run the command
  pub url: String,
  /// Command to run, after `--`
  #[arg(last = true, required = true, value_name = "COMMAND")]
  pub command: Vec<String>,
}

#[derive(Debug, Parser)]
#[command(
  version,
  about = "Serve live and archived output streams",
  long_about = None,
  bin_name = "relay-server"
)]
pub struct ServerArgs {
  /// TOML config file; flags override its values
  #[arg(long, value_name = "PATH")]
  pub config: Option<PathBuf>,
  #[arg(long)]
  pub port: Option<u16>,
  /// Seconds of silence before a keepalive is sent to subscribers
  #[arg(long, value_name = "SECS")]
  pub heartbeat: Option<f64>,
  /// `http(s)://` base URL or directory for finished streams
  #[arg(long, value_name = "BASE")]
  pub storage_base: Option<String>,
  #[arg(long, value_name = "PATH")]
  pub log_file: Option<PathBuf>,
  /// off, warn, info, debug or trace
  #[arg(long, value_name = "LEVEL")]
  pub log_level: Option<LogLevel>,
}
