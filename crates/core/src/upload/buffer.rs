use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::{NamedTempFile, TempPath};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::pipe::OutputStream;

const READ_CHUNK: u64 = 32 * 1024;

/// Append-only, disk-backed copy of the command output.
///
/// One [`BufferWriter`] appends; any number of [`BufferReader`]s replay the
/// bytes from offset 0, waiting at the end until more bytes arrive or the
/// buffer is sealed. The temp file is removed when the last handle drops.
#[derive(Debug)]
pub struct OutputBuffer {
  path: TempPath,
  state: Mutex<BufferState>,
  notify: Notify,
}

#[derive(Debug, Default)]
struct BufferState {
  len: u64,
  sealed: bool,
  failure: Option<(io::ErrorKind, String)>,
}

/// The single producer side of an [`OutputBuffer`]. Dropping it seals the
/// buffer.
#[derive(Debug)]
pub struct BufferWriter {
  buffer: Arc<OutputBuffer>,
  file: File,
  finished: bool,
}

#[derive(Debug)]
pub struct BufferReader {
  buffer: Arc<OutputBuffer>,
  file: File,
  pos: u64,
}

impl OutputBuffer {
  pub fn create() -> io::Result<(Arc<OutputBuffer>, BufferWriter)> {
    let (file, path) = NamedTempFile::new()?.into_parts();
    let buffer = Arc::new(OutputBuffer {
      path,
      state: Mutex::new(BufferState::default()),
      notify: Notify::new(),
    });
    debug!(event = "output_buffer_created", path = %buffer.path.display());
    let writer = BufferWriter {
      buffer: buffer.clone(),
      file: File::from_std(file),
      finished: false,
    };
    Ok((buffer, writer))
  }

  /// A fresh reader positioned at byte 0.
  pub fn reader(self: &Arc<Self>) -> io::Result<BufferReader> {
    let file = std::fs::File::open(&self.path)?;
    Ok(BufferReader {
      buffer: self.clone(),
      file: File::from_std(file),
      pos: 0,
    })
  }

  pub fn len(&self) -> u64 {
    self.state.lock().len
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_sealed(&self) -> bool {
    self.state.lock().sealed
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl BufferWriter {
  pub async fn append(&mut self, chunk: &[u8]) -> io::Result<()> {
    self.file.write_all(chunk).await?;
    self.file.flush().await?;
    self.buffer.state.lock().len += chunk.len() as u64;
    self.buffer.notify.notify_waiters();
    Ok(())
  }

  pub fn seal(mut self) {
    self.finish(None);
  }

  /// Seal with an error; readers see it once they have consumed the bytes
  /// written so far.
  pub fn fail(mut self, err: &io::Error) {
    self.finish(Some((err.kind(), err.to_string())));
  }

  fn finish(&mut self, failure: Option<(io::ErrorKind, String)>) {
    if self.finished {
      return;
    }
    self.finished = true;
    {
      let mut state = self.buffer.state.lock();
      state.sealed = true;
      state.failure = failure;
    }
    self.buffer.notify.notify_waiters();
  }

  /// Copy `source` into the buffer until it ends, then seal. On a write
  /// failure the rest of `source` is drained.
  pub async fn fill_from(mut self, mut source: OutputStream) {
    while let Some(chunk) = source.recv().await {
      if let Err(e) = self.append(&chunk).await {
        warn!(event = "output_buffer_write_failed", error = %e);
        self.fail(&e);
        // keep the producer moving even though nothing is recorded anymore
        let dropped = source.drain().await;
        debug!(event = "output_buffer_drained", dropped);
        return;
      }
    }
    let len = self.buffer.len();
    self.seal();
    debug!(event = "output_buffer_sealed", len);
  }
}

impl Drop for BufferWriter {
  fn drop(&mut self) {
    self.finish(None);
  }
}

impl BufferReader {
  /// Next run of bytes, waiting while the buffer is open and fully read.
  /// `Ok(None)` once the buffer is sealed and everything was returned.
  pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
    loop {
      let notified = self.buffer.notify.notified();
      tokio::pin!(notified);
      // register before looking at the state so an append in between wakes us
      notified.as_mut().enable();

      let (len, sealed, failure) = {
        let state = self.buffer.state.lock();
        (state.len, state.sealed, state.failure.clone())
      };

      if self.pos < len {
        let want = (len - self.pos).min(READ_CHUNK) as usize;
        let mut buf = vec![0u8; want];
        self.file.read_exact(&mut buf).await?;
        self.pos += want as u64;
        return Ok(Some(Bytes::from(buf)));
      }
      if let Some((kind, msg)) = failure {
        return Err(io::Error::new(kind, msg));
      }
      if sealed {
        return Ok(None);
      }
      notified.await;
    }
  }

  pub fn position(&self) -> u64 {
    self.pos
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::upload::pipe::pipe;
  use std::time::Duration;
  use tokio::time::timeout;

  async fn read_all(mut reader: BufferReader) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = reader.next_chunk().await? {
      out.extend_from_slice(&chunk);
    }
    Ok(out)
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn concurrent_readers_each_see_every_byte_in_order() {
    let (buffer, mut writer) = OutputBuffer::create().unwrap();
    let readers: Vec<_> = (0..4)
      .map(|_| tokio::spawn(read_all(buffer.reader().unwrap())))
      .collect();

    let mut expected = Vec::new();
    for i in 0..50u32 {
      let line = format!("line {i}\n");
      expected.extend_from_slice(line.as_bytes());
      writer.append(line.as_bytes()).await.unwrap();
      if i % 10 == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
    }
    writer.seal();

    for r in readers {
      assert_eq!(r.await.unwrap().unwrap(), expected);
    }
    // a reader opened after sealing replays from zero as well
    assert_eq!(read_all(buffer.reader().unwrap()).await.unwrap(), expected);
  }

  #[tokio::test]
  async fn reader_waits_at_end_until_sealed() {
    let (buffer, mut writer) = OutputBuffer::create().unwrap();
    writer.append(b"abc").await.unwrap();
    let mut reader = buffer.reader().unwrap();
    assert_eq!(reader.next_chunk().await.unwrap().as_deref(), Some(&b"abc"[..]));

    let pending = timeout(Duration::from_millis(50), reader.next_chunk()).await;
    assert!(pending.is_err(), "reader must block on an open buffer");

    writer.append(b"d").await.unwrap();
    assert_eq!(reader.next_chunk().await.unwrap().as_deref(), Some(&b"d"[..]));

    drop(writer);
    assert!(buffer.is_sealed());
    assert_eq!(reader.next_chunk().await.unwrap(), None);
    assert_eq!(reader.position(), 4);
  }

  #[tokio::test]
  async fn failure_is_reported_after_buffered_bytes() {
    let (buffer, mut writer) = OutputBuffer::create().unwrap();
    writer.append(b"partial").await.unwrap();
    writer.fail(&io::Error::other("disk full"));

    let mut reader = buffer.reader().unwrap();
    assert_eq!(
      reader.next_chunk().await.unwrap().as_deref(),
      Some(&b"partial"[..])
    );
    let err = reader.next_chunk().await.unwrap_err();
    assert_eq!(err.to_string(), "disk full");
  }

  #[tokio::test]
  async fn fill_copies_the_pipe_and_seals_at_end() {
    let (sink, stream) = pipe();
    let (buffer, writer) = OutputBuffer::create().unwrap();
    tokio::spawn(writer.fill_from(stream));
    sink.write(Bytes::from_static(b"hello\n")).await.unwrap();
    sink.write(Bytes::from_static(b"world\n")).await.unwrap();
    drop(sink);

    let out = read_all(buffer.reader().unwrap()).await.unwrap();
    assert_eq!(out, b"hello\nworld\n");
    assert!(buffer.is_sealed());
    assert_eq!(buffer.len(), 12);
  }

  #[tokio::test]
  async fn temp_file_is_removed_with_the_buffer() {
    let (buffer, writer) = OutputBuffer::create().unwrap();
    let path = buffer.path().to_path_buf();
    assert!(path.exists());
    drop(writer);
    drop(buffer);
    assert!(!path.exists());
  }
}
