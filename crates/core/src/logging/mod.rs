use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{Subscriber, info, subscriber::set_global_default};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt};

use crate::config::{LogFields, LogLevel};

mod format;
mod scrub;

pub use format::JsonLines;
pub use scrub::scrub_urls;

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
  /// Drop every line
  Discard,
  Stderr,
  /// Append to a file, creating it (and its parent) if missing
  File(PathBuf),
}

impl LogTarget {
  pub fn file_or(path: Option<&Path>, fallback: LogTarget) -> LogTarget {
    match path {
      Some(p) => LogTarget::File(p.to_path_buf()),
      None => fallback,
    }
  }
}

/// Keeps the background log writer alive. Call [`LogGuard::close`] at
/// shutdown so buffered lines are flushed before the process exits.
#[must_use = "dropping the guard stops the log writer"]
pub struct LogGuard {
  worker: Option<WorkerGuard>,
}

impl LogGuard {
  pub fn close(self) {
    drop(self.worker);
  }
}

/// Install the JSON line logger for this process.
///
/// The tracing dispatcher is process-wide, so a second call keeps the first
/// subscriber; the returned guard still owns its own writer.
pub fn init(target: LogTarget, level: LogLevel, fields: &LogFields) -> io::Result<LogGuard> {
  let (worker, installed) = match &target {
    LogTarget::Discard => (None, install(level, fields, io::sink)),
    LogTarget::Stderr => {
      let (nb_writer, guard) = tracing_appender::non_blocking(io::stderr());
      (Some(guard), install(level, fields, move || nb_writer.clone()))
    }
    LogTarget::File(path) => {
      if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
      {
        fs::create_dir_all(parent)?;
      }
      let file = OpenOptions::new().create(true).append(true).open(path)?;
      // Non-blocking writer to avoid stalling on disk IO.
      let (nb_writer, guard) = tracing_appender::non_blocking(file);
      (Some(guard), install(level, fields, move || nb_writer.clone()))
    }
  };

  if installed {
    info!(
      event = "logging_initialized",
      target = ?target,
      level = ?level,
      "logging initialized"
    );
  }
  Ok(LogGuard { worker })
}

fn install<W>(level: LogLevel, fields: &LogFields, make_writer: W) -> bool
where
  W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
  set_global_default(subscriber(level, fields, make_writer)).is_ok()
}

/// Build the subscriber without installing it.
pub fn subscriber<W>(
  level: LogLevel,
  fields: &LogFields,
  make_writer: W,
) -> impl Subscriber + Send + Sync + 'static
where
  W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
  let filter = EnvFilter::new(level.as_filter());
  let json_layer = fmt::layer()
    .event_format(JsonLines::new(fields))
    .with_writer(make_writer);
  Registry::default().with(filter).with(json_layer)
}
