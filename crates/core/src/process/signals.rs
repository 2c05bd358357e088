use std::future::poll_fn;
use std::io;
use std::task::Poll;

use nix::sys::signal::Signal;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use super::control::ProcessGroup;

const FORWARDED: [(fn() -> SignalKind, Signal); 6] = [
  (SignalKind::interrupt, Signal::SIGINT),
  (SignalKind::terminate, Signal::SIGTERM),
  (SignalKind::hangup, Signal::SIGHUP),
  (SignalKind::quit, Signal::SIGQUIT),
  (SignalKind::user_defined1, Signal::SIGUSR1),
  (SignalKind::user_defined2, Signal::SIGUSR2),
];

/// Listens for the signals a relay should pass on to its child. Installing
/// it replaces the default disposition, so the relay itself survives them.
pub struct SignalForwarder {
  streams: Vec<(tokio::signal::unix::Signal, Signal)>,
}

impl SignalForwarder {
  pub fn install() -> io::Result<Self> {
    let streams = FORWARDED
      .iter()
      .map(|(kind, sig)| Ok((signal(kind())?, *sig)))
      .collect::<io::Result<Vec<_>>>()?;
    Ok(Self { streams })
  }

  /// Wait for the first signal and deliver it to `group`. Later signals are
  /// absorbed.
  pub async fn forward_first(mut self, group: ProcessGroup) -> Signal {
    let received = poll_fn(|cx| {
      for (stream, sig) in self.streams.iter_mut() {
        if stream.poll_recv(cx).is_ready() {
          return Poll::Ready(*sig);
        }
      }
      Poll::Pending
    })
    .await;

    info!(
      event = "signal_forwarded",
      signal = %received,
      pgid = group.id()
    );
    if let Err(e) = group.signal(received) {
      warn!(event = "signal_forward_failed", signal = %received, error = %e);
    }
    received
  }
}
