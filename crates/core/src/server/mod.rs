//! HTTP front end: publishers POST into live channels, subscribers GET them.

use std::convert::Infallible;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::broker::{LiveChannels, MemoryBroker};
use crate::config::ServerConfig;
use crate::http::{ClientOptions, HttpClient};
use crate::storage::{Archive, ArchiveStorage, HttpStorage};
use crate::subscribe::Subscriber;

mod middleware;
mod routes;

pub use middleware::REQUEST_ID;
pub use routes::ResponseBody;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Shared state behind every connection.
pub struct App<B, S> {
  broker: Arc<B>,
  storage: Arc<S>,
  storage_base: String,
  subscriber: Subscriber<B, S>,
}

impl<B: LiveChannels, S: ArchiveStorage> App<B, S> {
  pub fn new(broker: Arc<B>, storage: Arc<S>, cfg: &ServerConfig) -> Self {
    let storage_base = cfg.storage_base.clone().unwrap_or_default();
    let subscriber = Subscriber::new(
      broker.clone(),
      storage.clone(),
      storage_base.clone(),
      cfg.heartbeat,
    );
    Self {
      broker,
      storage,
      storage_base,
      subscriber,
    }
  }
}

/// Handle to the running server.
pub struct ServerHandle {
  local_addr: SocketAddr,
  shutdown_tx: watch::Sender<bool>,
  task: JoinHandle<()>,
}

impl ServerHandle {
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// Stop accepting connections. In-flight requests finish on their own.
  pub fn stop(&self) {
    let _ = self.shutdown_tx.send(true);
  }

  /// Await the accept loop (after [`ServerHandle::stop`]).
  pub async fn wait(self) {
    let _ = self.task.await;
  }
}

/// Start on `0.0.0.0:<port>` with an in-memory broker and the archive
/// selected by `storage_base`.
pub async fn start(cfg: &ServerConfig) -> io::Result<ServerHandle> {
  let client = HttpClient::new(ClientOptions::default()).map_err(io::Error::other)?;
  let app = App::new(
    Arc::new(MemoryBroker::new()),
    Arc::new(Archive::new(HttpStorage::new(client))),
    cfg,
  );
  let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, cfg.port));
  serve(addr, app).await
}

/// Bind `addr` and spawn the accept loop.
pub async fn serve<B, S>(addr: SocketAddr, app: App<B, S>) -> io::Result<ServerHandle>
where
  B: LiveChannels,
  S: ArchiveStorage,
{
  let listener = TcpListener::bind(addr).await?;
  let local_addr = listener.local_addr()?;
  let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
  let app = Arc::new(app);

  info!(event = "server_started", addr = %local_addr, "server started");

  let task = tokio::spawn(async move {
    loop {
      tokio::select! {
        _ = shutdown_rx.changed() => {
          info!(event = "server_shutdown", "shutdown signal received; stopping accept loop");
          break;
        }
        res = listener.accept() => {
          match res {
            Ok((stream, peer)) => {
              let app = app.clone();
              tokio::spawn(async move {
                let svc = service_fn(move |req| {
                  let app = app.clone();
                  async move { Ok::<_, Infallible>(routes::handle(app, req).await) }
                });
                if let Err(e) = http1::Builder::new()
                  .serve_connection(TokioIo::new(stream), svc)
                  .await
                {
                  debug!(event = "connection_error", peer = %peer, error = %e);
                }
              });
            }
            Err(e) => {
              error!(event = "accept_error", error = %e);
              tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
          }
        }
      }
    }
    info!(event = "server_stopped", addr = %local_addr, "server stopped");
  });

  Ok(ServerHandle {
    local_addr,
    shutdown_tx,
    task,
  })
}
