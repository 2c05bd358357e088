//! Runs the relayed command and copies its output into the upload pipe.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::upload::OutputSink;

mod control;
mod signals;

pub use control::{GroupChild, ProcessGroup};
pub use signals::SignalForwarder;

/// Upper bound on waiting for the output copies after the command exits.
pub const COPY_GRACE: Duration = Duration::from_secs(30);

const COPY_CHUNK: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
  #[error("no command given")]
  EmptyCommand,
  #[error("failed to start {program}: {source}")]
  Start {
    program: String,
    #[source]
    source: io::Error,
  },
  #[error("failed to wait for the command: {0}")]
  Wait(#[source] io::Error),
  #[error("command {0}")]
  Exit(ExitStatus),
  #[error("copying output: {0}")]
  Copy(#[source] io::Error),
}

impl RunError {
  /// Exit code for the relay: the command's own code, 128+N when it was
  /// killed by signal N, 1 for anything else.
  pub fn exit_code(&self) -> i32 {
    match self {
      RunError::Exit(status) => status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(1),
      _ => 1,
    }
  }
}

/// Spawns a command in its own process group, tees stdout and stderr into
/// sinks (and the terminal), forwards the first signal received and cleans
/// up the group on exit.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
  args: Vec<String>,
  mirror: bool,
  copy_grace: Duration,
}

impl ProcessRunner {
  pub fn new(args: impl Into<Vec<String>>) -> Self {
    Self {
      args: args.into(),
      mirror: true,
      copy_grace: COPY_GRACE,
    }
  }

  /// Also write the output to this process's stdout and stderr. On by default.
  pub fn mirror_to_terminal(mut self, mirror: bool) -> Self {
    self.mirror = mirror;
    self
  }

  pub fn copy_grace(mut self, grace: Duration) -> Self {
    self.copy_grace = grace;
    self
  }

  /// Run to completion. Both sinks are dropped before this returns, on every
  /// path.
  pub async fn run(&self, stdout: OutputSink, stderr: OutputSink) -> Result<(), RunError> {
    let started = Instant::now();
    let (mut child, out, err) = GroupChild::start(&self.args)?;
    let group = child.process_group();

    let forwarder = match SignalForwarder::install() {
      Ok(f) => Some(tokio::spawn(f.forward_first(group))),
      Err(e) => {
        warn!(event = "signal_forwarding_unavailable", error = %e);
        None
      }
    };

    let out_task = tokio::spawn(copy_output(out, stdout, self.mirror_writer(Stream::Stdout)));
    let err_task = tokio::spawn(copy_output(err, stderr, self.mirror_writer(Stream::Stderr)));

    let status = child.wait().await;
    if let Some(f) = forwarder {
      f.abort();
    }
    if let Err(e) = child.terminate_group() {
      warn!(event = "process_group_terminate_failed", pgid = group.id(), error = %e);
    }

    let copied = self.join_copies(out_task, err_task).await;
    info!(
      event = "process_finished",
      status = ?status.as_ref().ok(),
      elapsed_ms = started.elapsed().as_millis() as u64
    );

    let status = status.map_err(RunError::Wait)?;
    if !status.success() {
      return Err(RunError::Exit(status));
    }
    copied
  }

  async fn join_copies(
    &self,
    out_task: JoinHandle<io::Result<u64>>,
    err_task: JoinHandle<io::Result<u64>>,
  ) -> Result<(), RunError> {
    let aborts = [out_task.abort_handle(), err_task.abort_handle()];
    let joined = tokio::time::timeout(self.copy_grace, async {
      (out_task.await, err_task.await)
    })
    .await;

    let Ok((out, err)) = joined else {
      // dropping the tasks releases their sinks
      for a in aborts {
        a.abort();
      }
      warn!(
        event = "output_copy_timeout",
        grace_ms = self.copy_grace.as_millis() as u64
      );
      return Ok(());
    };

    let mut first_err = None;
    for res in [out, err] {
      let res = res.unwrap_or_else(|join| Err(io::Error::other(join)));
      match res {
        Ok(bytes) => debug!(event = "output_copy_done", bytes),
        Err(e) => {
          first_err.get_or_insert(e);
        }
      }
    }
    match first_err {
      Some(e) => Err(RunError::Copy(e)),
      None => Ok(()),
    }
  }

  fn mirror_writer(&self, stream: Stream) -> Option<Box<dyn AsyncWrite + Send + Unpin>> {
    if !self.mirror {
      return None;
    }
    Some(match stream {
      Stream::Stdout => Box::new(tokio::io::stdout()),
      Stream::Stderr => Box::new(tokio::io::stderr()),
    })
  }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
  Stdout,
  Stderr,
}

/// Copy `src` into `sink`, mirroring to the terminal. A terminal that went
/// away only stops the mirroring.
async fn copy_output<R>(
  mut src: R,
  sink: OutputSink,
  mut mirror: Option<Box<dyn AsyncWrite + Send + Unpin>>,
) -> io::Result<u64>
where
  R: AsyncRead + Unpin,
{
  let mut buf = vec![0u8; COPY_CHUNK];
  let mut total = 0u64;
  loop {
    let n = src.read(&mut buf).await?;
    if n == 0 {
      return Ok(total);
    }
    total += n as u64;
    sink.write(Bytes::copy_from_slice(&buf[..n])).await?;
    if let Some(w) = mirror.as_mut() {
      let mirrored = async {
        w.write_all(&buf[..n]).await?;
        w.flush().await
      };
      if let Err(e) = mirrored.await {
        debug!(event = "terminal_mirror_stopped", error = %e);
        mirror = None;
      }
    }
  }
}
