use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

const PIPE_CAPACITY: usize = 64;

/// Write end of the output pipe. Clone one per producer; the stream ends
/// once every sink is dropped.
#[derive(Debug, Clone)]
pub struct OutputSink {
  tx: mpsc::Sender<Bytes>,
}

/// Read end of the output pipe.
#[derive(Debug)]
pub struct OutputStream {
  rx: mpsc::Receiver<Bytes>,
}

pub fn pipe() -> (OutputSink, OutputStream) {
  let (tx, rx) = mpsc::channel(PIPE_CAPACITY);
  (OutputSink { tx }, OutputStream { rx })
}

impl OutputSink {
  pub async fn write(&self, chunk: Bytes) -> io::Result<()> {
    if chunk.is_empty() {
      return Ok(());
    }
    self
      .tx
      .send(chunk)
      .await
      .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output stream closed"))
  }
}

impl OutputStream {
  /// Next chunk, or `None` once all sinks are gone.
  pub async fn recv(&mut self) -> Option<Bytes> {
    self.rx.recv().await
  }

  /// Discard everything still to come so producers never block on a dead
  /// consumer. Returns the number of bytes dropped.
  pub async fn drain(mut self) -> u64 {
    let mut dropped = 0u64;
    while let Some(chunk) = self.rx.recv().await {
      dropped += chunk.len() as u64;
    }
    dropped
  }
}
