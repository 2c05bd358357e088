use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::header::RANGE;
use hyper::{Method, Request, StatusCode};
use tracing::debug;

use super::{ArchiveReader, ArchiveStorage, StorageError};
use crate::http::{ChannelBody, HttpClient, TransportError};

/// Archive stored behind an HTTP base URL: `GET`/`PUT {base}/{resource}`.
#[derive(Clone)]
pub struct HttpStorage {
  client: HttpClient,
}

impl HttpStorage {
  pub fn new(client: HttpClient) -> Self {
    Self { client }
  }

  fn url(resource: &str, base: &str) -> String {
    format!(
      "{}/{}",
      base.trim_end_matches('/'),
      resource.trim_start_matches('/')
    )
  }
}

impl ArchiveStorage for HttpStorage {
  async fn get(&self, resource: &str, base: &str, offset: u64) -> Result<ArchiveReader, StorageError> {
    let url = Self::url(resource, base);
    let mut builder = Request::builder().method(Method::GET).uri(&url);
    if offset > 0 {
      builder = builder.header(RANGE, format!("bytes={offset}-"));
    }
    let req = builder
      .body(ChannelBody::empty())
      .map_err(|_| StorageError::InvalidLocation(url.clone()))?;

    let resp = self.client.send(req).await?;
    let status = resp.status();
    debug!(event = "archive_get", url = %url, offset, status = status.as_u16());
    match status {
      s if s.is_success() => {
        // a plain 200 carries the whole blob, so the offset is applied here
        let skip = if status == StatusCode::PARTIAL_CONTENT {
          0
        } else {
          offset
        };
        let body = resp
          .into_body()
          .map_err(std::io::Error::other)
          .boxed_unsync();
        Ok(ArchiveReader::body(body, skip))
      }
      StatusCode::NOT_FOUND => Err(StorageError::NotFound(resource.to_string())),
      StatusCode::RANGE_NOT_SATISFIABLE => Err(StorageError::RangeNotSatisfiable {
        resource: resource.to_string(),
        offset,
      }),
      status => Err(StorageError::Status {
        resource: resource.to_string(),
        status,
      }),
    }
  }

  async fn put(&self, resource: &str, base: &str, data: Bytes) -> Result<(), StorageError> {
    let url = Self::url(resource, base);
    let len = data.len();
    let req = Request::builder()
      .method(Method::PUT)
      .uri(&url)
      .header(hyper::header::CONTENT_LENGTH, len)
      .body(ChannelBody::full(data))
      .map_err(|_| StorageError::InvalidLocation(url.clone()))?;

    let resp = self.client.send(req).await?;
    let status = resp.status();
    // drain so the connection can be reused
    resp
      .into_body()
      .collect()
      .await
      .map_err(TransportError::from)?;
    debug!(event = "archive_put", url = %url, bytes = len, status = status.as_u16());
    if !status.is_success() {
      return Err(StorageError::Status {
        resource: resource.to_string(),
        status,
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn joins_base_and_resource() {
    assert_eq!(
      HttpStorage::url("/a/b", "https://store.test/logs/"),
      "https://store.test/logs/a/b"
    );
    assert_eq!(
      HttpStorage::url("a/b", "http://store.test"),
      "http://store.test/a/b"
    );
  }
}
