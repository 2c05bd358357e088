//! Archived channel content: where finished streams live once they leave
//! the broker.

use std::future::Future;
use std::io;

use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::StatusCode;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::broker::LiveChannels;
use crate::http::TransportError;

mod fs;
mod http;

pub use fs::FsStorage;
pub use http::HttpStorage;

const READ_CHUNK: usize = 32 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  #[error("{0} not found in storage")]
  NotFound(String),
  #[error("offset {offset} is past the end of {resource}")]
  RangeNotSatisfiable { resource: String, offset: u64 },
  #[error("storage answered {status} for {resource}")]
  Status { resource: String, status: StatusCode },
  #[error("invalid storage location {0:?}")]
  InvalidLocation(String),
  #[error("io: {0}")]
  Io(#[from] io::Error),
  #[error(transparent)]
  Transport(#[from] TransportError),
}

/// Archived content of one resource, from the requested offset on.
pub enum ArchiveReader {
  /// `skip` leading bytes are dropped before anything is returned, for
  /// stores that answer a range request with the whole blob.
  Body {
    body: UnsyncBoxBody<Bytes, io::Error>,
    skip: u64,
  },
  File(File),
}

impl ArchiveReader {
  pub fn body(body: UnsyncBoxBody<Bytes, io::Error>, skip: u64) -> Self {
    ArchiveReader::Body { body, skip }
  }

  pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
    match self {
      ArchiveReader::Body { body, skip } => {
        while let Some(frame) = body.frame().await {
          let Ok(mut data) = frame?.into_data() else {
            continue;
          };
          if *skip > 0 {
            let dropped = (*skip).min(data.len() as u64);
            *skip -= dropped;
            data = data.split_off(dropped as usize);
          }
          if !data.is_empty() {
            return Ok(Some(data));
          }
        }
        Ok(None)
      }
      ArchiveReader::File(file) => {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = file.read(&mut buf).await?;
        if n == 0 {
          return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
      }
    }
  }
}

impl std::fmt::Debug for ArchiveReader {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ArchiveReader::Body { skip, .. } => write!(f, "ArchiveReader::Body {{ skip: {skip} }}"),
      ArchiveReader::File(_) => f.write_str("ArchiveReader::File"),
    }
  }
}

/// Blob storage for finished channels.
pub trait ArchiveStorage: Send + Sync + 'static {
  fn get(
    &self,
    resource: &str,
    base: &str,
    offset: u64,
  ) -> impl Future<Output = Result<ArchiveReader, StorageError>> + Send;

  fn put(
    &self,
    resource: &str,
    base: &str,
    data: Bytes,
  ) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Routes by the base: `http://` and `https://` go over HTTP, anything
/// else is a directory. An empty base means archiving is off.
#[derive(Clone)]
pub struct Archive {
  http: HttpStorage,
  fs: FsStorage,
}

impl Archive {
  pub fn new(http: HttpStorage) -> Self {
    Self {
      http,
      fs: FsStorage,
    }
  }
}

/// Storage resource for a channel key: the key plus the request's query
/// string, which HTTP backends may need (signed URLs).
pub fn resource_path(key: &str, query: Option<&str>) -> String {
  match query {
    Some(q) if !q.is_empty() => format!("{key}?{q}"),
    _ => key.to_string(),
  }
}

fn is_http(base: &str) -> bool {
  base.starts_with("http://") || base.starts_with("https://")
}

impl ArchiveStorage for Archive {
  async fn get(&self, resource: &str, base: &str, offset: u64) -> Result<ArchiveReader, StorageError> {
    if base.is_empty() {
      return Err(StorageError::NotFound(resource.to_string()));
    }
    if is_http(base) {
      self.http.get(resource, base, offset).await
    } else {
      self.fs.get(resource, base, offset).await
    }
  }

  async fn put(&self, resource: &str, base: &str, data: Bytes) -> Result<(), StorageError> {
    if base.is_empty() {
      return Ok(());
    }
    if is_http(base) {
      self.http.put(resource, base, data).await
    } else {
      self.fs.put(resource, base, data).await
    }
  }
}

/// Move a finished channel into storage as `resource` and drop it from the
/// broker. Failures are logged; the channel then stays live.
pub async fn store_output<B, S>(broker: &B, storage: &S, key: &str, resource: &str, base: &str)
where
  B: LiveChannels,
  S: ArchiveStorage,
{
  // without an archive the live channel is the only copy, so it is kept
  if base.is_empty() {
    return;
  }
  let data = match broker.get_all(key) {
    Ok(d) => d,
    Err(e) => {
      warn!(event = "store_output_error", key, error = %e);
      return;
    }
  };
  let len = data.len();
  match storage.put(resource, base, data).await {
    Ok(()) => {
      broker.evict(key);
      info!(event = "store_output_success", key, bytes = len);
    }
    Err(e) => warn!(event = "store_output_error", key, error = %e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::broker::MemoryBroker;
  use crate::http::{ClientOptions, HttpClient};

  fn archive() -> Archive {
    Archive::new(HttpStorage::new(HttpClient::new(ClientOptions::default()).unwrap()))
  }

  async fn read_all(mut r: ArchiveReader) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = r.next_chunk().await.unwrap() {
      out.extend_from_slice(&chunk);
    }
    out
  }

  #[test]
  fn resource_keeps_the_query() {
    assert_eq!(resource_path("1/2/3", Some("foo=bar")), "1/2/3?foo=bar");
    assert_eq!(resource_path("1/2/3", Some("")), "1/2/3");
    assert_eq!(resource_path("1/2/3", None), "1/2/3");
  }

  #[tokio::test]
  async fn empty_base_disables_storage() {
    let archive = archive();
    let err = archive.get("a/b", "", 0).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
    archive.put("a/b", "", Bytes::from_static(b"x")).await.unwrap();
  }

  #[tokio::test]
  async fn body_reader_skips_leading_bytes_across_frames() {
    let (tx, body) = crate::http::channel(4);
    for part in ["hel", "lo wo", "rld"] {
      tx.send_data(Bytes::from_static(part.as_bytes())).await.unwrap();
    }
    drop(tx);
    let reader = ArchiveReader::body(body.boxed_unsync(), 6);
    assert_eq!(read_all(reader).await, b"world");
  }

  #[tokio::test]
  async fn store_output_without_base_keeps_the_channel() {
    let broker = MemoryBroker::new();
    let writer = broker.writer("k");
    writer.write(b"only copy");
    writer.close();
    store_output(&broker, &archive(), "k", "k", "").await;
    assert_eq!(&broker.get_all("k").unwrap()[..], b"only copy");
  }

  #[tokio::test]
  async fn store_output_archives_and_evicts() {
    let td = tempfile::tempdir().unwrap();
    let base = td.path().to_string_lossy().to_string();
    let broker = MemoryBroker::new();
    let writer = broker.writer("app/build/1");
    writer.write(b"log line\n");
    writer.close();

    let archive = archive();
    store_output(&broker, &archive, "app/build/1", "app/build/1", &base).await;

    assert!(broker.reader("app/build/1").is_err());
    let reader = archive.get("app/build/1", &base, 4).await.unwrap();
    assert_eq!(read_all(reader).await, b"line\n");
  }

  #[tokio::test]
  async fn failed_store_keeps_the_channel_live() {
    let td = tempfile::tempdir().unwrap();
    // a file where the directory should be
    let blocker = td.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let base = blocker.to_string_lossy().to_string();

    let broker = MemoryBroker::new();
    let writer = broker.writer("k");
    writer.write(b"x");
    writer.close();
    store_output(&broker, &archive(), "k", "k", &base).await;
    assert!(broker.reader("k").is_ok());
  }
}
