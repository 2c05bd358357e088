use std::io;
use std::sync::Arc;

use hyper::{Method, Request, StatusCode, Uri};
use tracing::{info, warn};

use super::buffer::OutputBuffer;
use super::transport::{BufferedRetryTransport, Transport};
use crate::config::RelayConfig;
use crate::http::{ClientOptions, HttpClient, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
  #[error("no upload url given")]
  MissingUrl,
  #[error("invalid upload url {0:?}")]
  InvalidUrl(String),
  #[error("output buffer: {0}")]
  Buffer(#[from] io::Error),
  #[error(transparent)]
  Transport(#[from] TransportError),
  #[error("upload rejected with status {0}")]
  Status(StatusCode),
}

/// Streaming POST of an [`OutputBuffer`] with connect-timeout retries on top
/// of the transport's own full-body resends.
#[derive(Debug)]
pub struct Uploader<T> {
  transport: BufferedRetryTransport<T>,
  uri: Uri,
  request_id: Option<String>,
  timeout_retries: u32,
}

impl Uploader<HttpClient> {
  pub fn from_config(cfg: &RelayConfig) -> Result<Self, UploadError> {
    let client = HttpClient::new(ClientOptions {
      insecure: cfg.insecure,
      connect_timeout: cfg.connect_timeout,
    })?;
    let transport = BufferedRetryTransport::new(client, cfg.stream_retry, cfg.sleep_duration);
    Uploader::new(transport, &cfg.url, cfg.request_id.clone(), cfg.retry)
  }
}

impl<T: Transport> Uploader<T> {
  pub fn new(
    transport: BufferedRetryTransport<T>,
    url: &str,
    request_id: Option<String>,
    timeout_retries: u32,
  ) -> Result<Self, UploadError> {
    if url.is_empty() {
      return Err(UploadError::MissingUrl);
    }
    let uri: Uri = url
      .parse()
      .map_err(|_| UploadError::InvalidUrl(url.to_string()))?;
    if uri.host().is_none() {
      return Err(UploadError::InvalidUrl(url.to_string()));
    }
    Ok(Self {
      transport,
      uri,
      request_id,
      timeout_retries,
    })
  }

  pub async fn upload(&self, buffer: Arc<OutputBuffer>) -> Result<(), UploadError> {
    let mut retries = 0u32;
    loop {
      let mut builder = Request::builder()
        .method(Method::POST)
        .uri(self.uri.clone())
        .header(hyper::header::CONTENT_TYPE, "application/octet-stream");
      if let Some(id) = &self.request_id {
        builder = builder.header("Request-Id", id.as_str());
      }
      let req = builder
        .body(buffer.clone())
        .map_err(TransportError::from)?;

      match self.transport.round_trip(req).await {
        Ok(resp) if resp.status().is_success() => {
          info!(event = "stream_success", url = %self.uri, bytes = buffer.len());
          return Ok(());
        }
        Ok(resp) => return Err(UploadError::Status(resp.status())),
        Err(e) if e.is_timeout() && retries < self.timeout_retries => {
          retries += 1;
          warn!(
            event = "stream_retry",
            url = %self.uri,
            retry = retries,
            error = %e
          );
        }
        Err(e) => return Err(e.into()),
      }
    }
  }
}
