use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::buffer::OutputBuffer;
use super::pipe::{OutputStream, pipe};
use super::uploader::{UploadError, Uploader};
use crate::config::RelayConfig;
use crate::process::ProcessRunner;

/// How long the relay waits for the upload after the command exited.
pub const UPLOAD_GRACE: Duration = Duration::from_secs(1);

/// Run the configured command, streaming its output to `cfg.url`, and return
/// the exit code the relay should exit with.
///
/// Upload failures are logged and never change the exit code.
pub async fn run(cfg: &RelayConfig) -> i32 {
  run_with(cfg, ProcessRunner::new(cfg.args.clone()), UPLOAD_GRACE).await
}

pub async fn run_with(cfg: &RelayConfig, runner: ProcessRunner, upload_grace: Duration) -> i32 {
  let started = Instant::now();
  let (sink, stream) = pipe();
  let upload = tokio::spawn(post(cfg.clone(), stream));

  let code = match runner.run(sink.clone(), sink).await {
    Ok(()) => 0,
    Err(e) => {
      error!(event = "exec_error", error = %e);
      e.exit_code()
    }
  };

  match tokio::time::timeout(upload_grace, upload).await {
    Ok(Ok(Ok(()))) => {}
    Ok(Ok(Err(e))) => error!(event = "stream_error", url = %cfg.url, error = %e),
    Ok(Err(join)) => error!(event = "stream_error", url = %cfg.url, error = %join),
    Err(_) => warn!(
      event = "upload_timeout",
      grace_ms = upload_grace.as_millis() as u64
    ),
  }

  info!(
    event = "relay_finished",
    exit_code = code,
    elapsed_ms = started.elapsed().as_millis() as u64
  );
  code
}

/// Upload `stream`, or drain it when the upload cannot even be set up so the
/// command never blocks on its output.
async fn post(cfg: RelayConfig, stream: OutputStream) -> Result<(), UploadError> {
  let uploader = match Uploader::from_config(&cfg) {
    Ok(u) => u,
    Err(e) => {
      if matches!(e, UploadError::MissingUrl) {
        warn!(event = "stream_missing_url");
      }
      drain(stream).await;
      return Err(e);
    }
  };
  let (buffer, writer) = match OutputBuffer::create() {
    Ok(pair) => pair,
    Err(e) => {
      drain(stream).await;
      return Err(UploadError::Buffer(e));
    }
  };
  tokio::spawn(writer.fill_from(stream));
  uploader.upload(buffer).await
}

async fn drain(stream: OutputStream) {
  let dropped = stream.drain().await;
  debug!(event = "output_drained", dropped);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cfg(url: &str, cmd: &[&str]) -> RelayConfig {
    RelayConfig {
      url: url.to_string(),
      args: cmd.iter().map(|s| s.to_string()).collect(),
      ..RelayConfig::default()
    }
  }

  fn quiet(cfg: &RelayConfig) -> ProcessRunner {
    ProcessRunner::new(cfg.args.clone()).mirror_to_terminal(false)
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn missing_url_still_runs_the_command() {
    let cfg = cfg("", &["sh", "-c", "echo hi; exit 4"]);
    assert_eq!(run_with(&cfg, quiet(&cfg), UPLOAD_GRACE).await, 4);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn large_output_is_drained_without_an_upload() {
    // far more than the pipe holds; would deadlock without the drain
    let cfg = cfg("", &["sh", "-c", "head -c 3000000 /dev/zero"]);
    assert_eq!(run_with(&cfg, quiet(&cfg), UPLOAD_GRACE).await, 0);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn unreachable_upload_does_not_change_the_exit_code() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut cfg = cfg(&format!("http://{addr}/streams/x"), &["true"]);
    cfg.stream_retry = 0;
    let started = Instant::now();
    assert_eq!(
      run_with(&cfg, quiet(&cfg), Duration::from_millis(500)).await,
      0
    );
    assert!(started.elapsed() < Duration::from_secs(5));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn start_failure_exits_with_one() {
    let cfg = cfg("", &["/definitely/not/here"]);
    assert_eq!(run_with(&cfg, quiet(&cfg), UPLOAD_GRACE).await, 1);
  }
}
