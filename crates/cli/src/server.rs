use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use relay_core::config::{self, LogFields, ServerConfig, ServerOverrides};
use relay_core::logging::{self, LogTarget};
use relay_core::server;
use tracing::info;

use crate::args::ServerArgs;

/// Parse the process arguments and serve until a shutdown signal arrives.
pub fn run() -> anyhow::Result<()> {
  run_from(std::env::args_os())
}

pub fn run_from<I, T>(argv: I) -> anyhow::Result<()>
where
  I: IntoIterator<Item = T>,
  T: Into<OsString> + Clone,
{
  let args = match ServerArgs::try_parse_from(argv) {
    Ok(args) => args,
    Err(e) => e.exit(),
  };
  let cfg = server_config(args)?;

  let target = LogTarget::file_or(cfg.log_file.as_deref(), LogTarget::Stderr);
  let guard =
    logging::init(target, cfg.log_level, &LogFields::default()).context("opening log file")?;

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("starting runtime")?;
  let result = runtime.block_on(serve_until_signal(&cfg));
  drop(runtime);
  guard.close();
  result
}

fn server_config(args: ServerArgs) -> anyhow::Result<ServerConfig> {
  let heartbeat = args
    .heartbeat
    .map(config::secs_to_duration)
    .transpose()?;
  let overrides = ServerOverrides {
    port: args.port,
    heartbeat,
    storage_base: args.storage_base,
    log_file: args.log_file,
    log_level: args.log_level,
  };
  config::load_server(args.config.as_deref(), overrides).context("loading server config")
}

async fn serve_until_signal(cfg: &ServerConfig) -> anyhow::Result<()> {
  let handle = server::start(cfg)
    .await
    .with_context(|| format!("binding port {}", cfg.port))?;
  info!(
    event = "server_ready",
    addr = %handle.local_addr(),
    heartbeat_ms = cfg.heartbeat.as_millis() as u64,
    storage_base = cfg.storage_base.as_deref().unwrap_or(""),
    "listening"
  );

  wait_for_shutdown_signal()
    .await
    .context("installing signal handlers")?;

  info!(event = "server_stopping");
  handle.stop();
  handle.wait().await;
  Ok(())
}

/// Completes on SIGINT, SIGTERM or SIGQUIT.
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
  use tokio::signal::unix::{SignalKind, signal};

  let mut sigint = signal(SignalKind::interrupt())?;
  let mut sigterm = signal(SignalKind::terminate())?;
  let mut sigquit = signal(SignalKind::quit())?;

  tokio::select! {
    _ = sigint.recv() => {},
    _ = sigterm.recv() => {},
    _ = sigquit.recv() => {},
  }
  Ok(())
}
