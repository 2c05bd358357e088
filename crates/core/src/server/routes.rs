use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Either, Full};
use hyper::body::Incoming;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use tracing::{debug, info, warn};

use super::App;
use super::middleware;
use crate::broker::LiveChannels;
use crate::http::ChannelBody;
use crate::storage::{ArchiveStorage, resource_path, store_output};
use crate::subscribe::Subscription;

pub type ResponseBody = Either<Full<Bytes>, ChannelBody>;

const STREAMS_PREFIX: &str = "/streams/";

pub async fn handle<B, S>(app: Arc<App<B, S>>, req: Request<Incoming>) -> Response<ResponseBody>
where
  B: LiveChannels,
  S: ArchiveStorage,
{
  let started = Instant::now();
  let method = req.method().clone();
  let path = req.uri().path().to_string();
  let req_headers = req.headers().clone();
  let request_id = middleware::request_id(&req_headers);

  let mut resp = route(app, req).await;
  middleware::apply_default_headers(resp.headers_mut(), &req_headers, &request_id);

  info!(
    event = "request",
    method = %method,
    path = %path,
    status = resp.status().as_u16(),
    request_id = %request_id,
    elapsed_ms = started.elapsed().as_millis() as u64
  );
  resp
}

async fn route<B, S>(app: Arc<App<B, S>>, req: Request<Incoming>) -> Response<ResponseBody>
where
  B: LiveChannels,
  S: ArchiveStorage,
{
  if req.method() == Method::OPTIONS {
    return text(StatusCode::OK, "");
  }
  let path = req.uri().path();
  if path == "/health" {
    return match *req.method() {
      Method::GET | Method::HEAD => text(StatusCode::OK, "OK"),
      _ => text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
    };
  }

  let key = match path.strip_prefix(STREAMS_PREFIX) {
    Some(k) if !k.is_empty() && !k.ends_with('/') => k.to_string(),
    _ => return text(StatusCode::NOT_FOUND, "not found"),
  };
  let query = req.uri().query().map(str::to_string);

  let method = req.method().clone();
  match method {
    Method::GET => {
      let headers = req.headers().clone();
      subscribe(&app, &key, query.as_deref(), &headers).await
    }
    Method::POST => publish(app, key, query, req.into_body()).await,
    _ => text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"),
  }
}

async fn subscribe<B, S>(
  app: &App<B, S>,
  key: &str,
  query: Option<&str>,
  headers: &HeaderMap,
) -> Response<ResponseBody>
where
  B: LiveChannels,
  S: ArchiveStorage,
{
  match app.subscriber.open(key, query, headers).await {
    Ok(Subscription::NoContent) => text(StatusCode::NO_CONTENT, ""),
    Ok(Subscription::Stream { format, body }) => {
      let mut resp = Response::new(Either::Right(body));
      for (name, value) in format.content_headers() {
        resp.headers_mut().insert(name, value);
      }
      resp
    }
    Err(e) => {
      let status = e.status();
      if status.is_server_error() {
        warn!(event = "subscribe_error", key, status = status.as_u16(), error = %e);
      } else {
        debug!(event = "subscribe_rejected", key, status = status.as_u16(), error = %e);
      }
      text(status, &e.to_string())
    }
  }
}

/// Append the request body to the channel. A resent body only adds what the
/// channel does not have yet. The channel is finished, and archived in the
/// background, only when the body arrives complete.
async fn publish<B, S>(
  app: Arc<App<B, S>>,
  key: String,
  query: Option<String>,
  mut body: Incoming,
) -> Response<ResponseBody>
where
  B: LiveChannels,
  S: ArchiveStorage,
{
  let writer = app.broker.writer(&key);
  let mut position = 0u64;
  while let Some(frame) = body.frame().await {
    let frame = match frame {
      Ok(f) => f,
      Err(e) => {
        warn!(event = "publish_interrupted", key = %key, bytes = position, error = %e);
        return text(StatusCode::BAD_REQUEST, "request body interrupted");
      }
    };
    let Ok(data) = frame.into_data() else {
      continue;
    };
    if let Err(e) = writer.write_at(position, &data) {
      warn!(event = "publish_rejected", key = %key, error = %e);
      return text(StatusCode::CONFLICT, &e.to_string());
    }
    position += data.len() as u64;
  }
  writer.close();
  info!(event = "publish_finished", key = %key, bytes = position);

  tokio::spawn(async move {
    let resource = resource_path(&key, query.as_deref());
    store_output(
      app.broker.as_ref(),
      app.storage.as_ref(),
      &key,
      &resource,
      &app.storage_base,
    )
    .await;
  });
  text(StatusCode::OK, "")
}

fn text(status: StatusCode, body: &str) -> Response<ResponseBody> {
  let mut resp = Response::new(Either::Left(Full::new(Bytes::from(body.to_string()))));
  *resp.status_mut() = status;
  resp
}
