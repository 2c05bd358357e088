use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{Request, Response};
use tracing::{info, warn};

use super::buffer::OutputBuffer;
use crate::http::{ChannelBody, HttpClient, TransportError, channel};

const REPLAY_QUEUE: usize = 8;

/// One HTTP exchange. The response body is read to the end.
pub trait Transport: Send + Sync {
  fn round_trip(
    &self,
    req: Request<ChannelBody>,
  ) -> impl Future<Output = Result<Response<Bytes>, TransportError>> + Send;
}

impl Transport for HttpClient {
  async fn round_trip(&self, req: Request<ChannelBody>) -> Result<Response<Bytes>, TransportError> {
    let (parts, body) = self.send(req).await?.into_parts();
    let bytes = body.collect().await?.to_bytes();
    Ok(Response::from_parts(parts, bytes))
  }
}

/// Sends a request whose body is an [`OutputBuffer`], resending the whole
/// buffer from byte 0 after a failed or non-2xx attempt.
#[derive(Debug, Clone)]
pub struct BufferedRetryTransport<T> {
  inner: T,
  max_retries: u32,
  sleep: Duration,
}

impl<T: Transport> BufferedRetryTransport<T> {
  pub fn new(inner: T, max_retries: u32, sleep: Duration) -> Self {
    Self {
      inner,
      max_retries,
      sleep,
    }
  }

  /// Returns the first 2xx response, or the last error or response once
  /// `max_retries` resends are used up.
  pub async fn round_trip(
    &self,
    req: Request<Arc<OutputBuffer>>,
  ) -> Result<Response<Bytes>, TransportError> {
    let (parts, buffer) = req.into_parts();
    let request_id = parts
      .headers
      .get("request-id")
      .and_then(|v| v.to_str().ok())
      .unwrap_or_default()
      .to_string();

    let mut retries = 0u32;
    loop {
      let attempt = retries + 1;
      let mut req = Request::new(replay_body(&buffer)?);
      *req.method_mut() = parts.method.clone();
      *req.uri_mut() = parts.uri.clone();
      *req.version_mut() = parts.version;
      *req.headers_mut() = parts.headers.clone();

      info!(
        event = "upload_attempt_start",
        request_id = %request_id,
        url = %parts.uri,
        attempt
      );
      let started = Instant::now();
      let result = self.inner.round_trip(req).await;
      let elapsed_ms = started.elapsed().as_millis() as u64;

      let failed = match &result {
        Ok(resp) => {
          info!(
            event = "upload_attempt_end",
            request_id = %request_id,
            url = %parts.uri,
            attempt,
            status = resp.status().as_u16(),
            elapsed_ms
          );
          !resp.status().is_success()
        }
        Err(e) => {
          warn!(
            event = "upload_attempt_end",
            request_id = %request_id,
            url = %parts.uri,
            attempt,
            error = %e,
            elapsed_ms
          );
          true
        }
      };

      if !failed || retries >= self.max_retries {
        return result;
      }
      retries += 1;
      tokio::time::sleep(self.sleep).await;
    }
  }
}

/// Body streaming the buffer from byte 0; stops early when the request is
/// dropped.
fn replay_body(buffer: &Arc<OutputBuffer>) -> io::Result<ChannelBody> {
  let mut reader = buffer.reader()?;
  let (tx, body) = channel(REPLAY_QUEUE);
  tokio::spawn(async move {
    loop {
      tokio::select! {
        _ = tx.closed() => return,
        next = reader.next_chunk() => match next {
          Ok(Some(chunk)) => {
            if tx.send_data(chunk).await.is_err() {
              return;
            }
          }
          Ok(None) => return,
          Err(e) => {
            tx.send_error(e).await;
            return;
          }
        },
      }
    }
  });
  Ok(body)
}
