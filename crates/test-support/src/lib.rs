use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One request as seen by [`RecordingServer`].
#[derive(Debug, Clone)]
pub struct Recorded {
  pub method: String,
  pub path: String,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl Recorded {
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Upload sink for tests: reads each request body to the end, records it,
/// then answers with the next scripted status (200 once the script is used up).
pub struct RecordingServer {
  addr: SocketAddr,
  requests: Arc<Mutex<Vec<Recorded>>>,
  task: JoinHandle<()>,
}

impl RecordingServer {
  pub async fn start(statuses: impl IntoIterator<Item = u16>) -> Self {
    Self::start_with_body(statuses, Bytes::new()).await
  }

  /// Like [`RecordingServer::start`], answering every request with `body`
  /// no matter what range was asked for.
  pub async fn start_with_body(statuses: impl IntoIterator<Item = u16>, body: Bytes) -> Self {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let script: Arc<Mutex<VecDeque<u16>>> = Arc::new(Mutex::new(statuses.into_iter().collect()));
    let requests: Arc<Mutex<Vec<Recorded>>> = Arc::default();

    let recorded = requests.clone();
    let task = tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        let script = script.clone();
        let recorded = recorded.clone();
        let reply = body.clone();
        tokio::spawn(async move {
          let svc = service_fn(move |req: Request<Incoming>| {
            let script = script.clone();
            let recorded = recorded.clone();
            let reply = reply.clone();
            async move {
              let method = req.method().to_string();
              let path = req.uri().path().to_string();
              let headers = req
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into()))
                .collect();
              let body = req
                .into_body()
                .collect()
                .await
                .map(|c| c.to_bytes())
                .unwrap_or_default();
              recorded.lock().push(Recorded {
                method,
                path,
                headers,
                body,
              });
              let status = script.lock().pop_front().unwrap_or(200);
              let mut resp = Response::new(Full::new(reply));
              *resp.status_mut() = StatusCode::from_u16(status).expect("valid status");
              Ok::<_, Infallible>(resp)
            }
          });
          let _ = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), svc)
            .await;
        });
      }
    });

    Self {
      addr,
      requests,
      task,
    }
  }

  pub fn addr(&self) -> SocketAddr {
    self.addr
  }

  pub fn url(&self, path: &str) -> String {
    format!("http://{}{}", self.addr, path)
  }

  pub fn requests(&self) -> Vec<Recorded> {
    self.requests.lock().clone()
  }
}

impl Drop for RecordingServer {
  fn drop(&mut self) {
    self.task.abort();
  }
}

/// Poll a condition repeatedly until it returns true or times out.
/// Returns true if condition met, false on timeout.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
  F: FnMut() -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  use tokio::time::{Instant, sleep};
  let start = Instant::now();
  loop {
    if check().await {
      return true;
    }
    if start.elapsed() >= timeout {
      return false;
    }
    sleep(interval).await;
  }
}

/// Read a body to the end, panicking on a body error.
pub async fn collect_body<B>(body: B) -> Bytes
where
  B: Body,
  B::Error: std::fmt::Debug,
{
  body.collect().await.expect("body").to_bytes()
}

/// An address on localhost that nothing listens on.
pub fn unused_addr() -> SocketAddr {
  let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
  listener.local_addr().expect("local addr")
}
