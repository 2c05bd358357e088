use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::{Client, Error as LegacyClientError};
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use super::body::ChannelBody;
use super::tls;

const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
  pub insecure: bool,
  /// Zero disables the dial timeout
  pub connect_timeout: Duration,
}

impl Default for ClientOptions {
  fn default() -> Self {
    Self {
      insecure: false,
      connect_timeout: Duration::from_secs(1),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  #[error("client: {0}")]
  Client(#[from] LegacyClientError),
  #[error("http: {0}")]
  Http(#[from] hyper::Error),
  #[error("request: {0}")]
  Request(#[from] hyper::http::Error),
  #[error("io: {0}")]
  Io(#[from] io::Error),
  #[error("tls: {0}")]
  Tls(#[from] rustls::Error),
}

impl TransportError {
  /// True when a dial or read timed out somewhere below this error.
  pub fn is_timeout(&self) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(self);
    while let Some(err) = source {
      if let Some(io_err) = err.downcast_ref::<io::Error>()
        && io_err.kind() == io::ErrorKind::TimedOut
      {
        return true;
      }
      source = err.source();
    }
    false
  }
}

/// HTTP/1 client for `http` and `https` URLs with a bounded dial.
#[derive(Clone)]
pub struct HttpClient {
  inner: Client<HttpsConnector<HttpConnector>, ChannelBody>,
}

impl HttpClient {
  pub fn new(opts: ClientOptions) -> Result<Self, TransportError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_keepalive(Some(TCP_KEEPALIVE));
    if !opts.connect_timeout.is_zero() {
      http.set_connect_timeout(Some(opts.connect_timeout));
    }

    let https = HttpsConnectorBuilder::new()
      .with_tls_config(tls::client_config(opts.insecure)?)
      .https_or_http()
      .enable_http1()
      .wrap_connector(http);

    debug!(
      event = "http_client_built",
      insecure = opts.insecure,
      connect_timeout_ms = opts.connect_timeout.as_millis() as u64
    );
    Ok(Self {
      inner: Client::builder(TokioExecutor::new()).build(https),
    })
  }

  pub async fn send(&self, req: Request<ChannelBody>) -> Result<Response<Incoming>, TransportError> {
    Ok(self.inner.request(req).await?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use hyper::Method;

  #[test]
  fn timeout_is_found_in_the_source_chain() {
    let err = TransportError::Io(io::Error::new(io::ErrorKind::TimedOut, "connect timeout"));
    assert!(err.is_timeout());
    let err = TransportError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
    assert!(!err.is_timeout());
  }

  #[tokio::test]
  async fn refused_connection_is_not_a_timeout() {
    // bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = HttpClient::new(ClientOptions::default()).unwrap();
    let req = Request::builder()
      .method(Method::GET)
      .uri(format!("http://{addr}/"))
      .body(ChannelBody::empty())
      .unwrap();
    let err = client.send(req).await.unwrap_err();
    assert!(matches!(err, TransportError::Client(_)));
    assert!(!err.is_timeout());
  }
}
