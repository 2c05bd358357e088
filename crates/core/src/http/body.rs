use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use tokio::sync::mpsc;

/// Streaming body fed from a [`BodySender`].
///
/// Used for upload request bodies and for subscriber responses. Dropping the
/// body (the peer hung up) makes [`BodySender::closed`] resolve.
#[derive(Debug)]
pub struct ChannelBody {
  rx: Option<mpsc::Receiver<io::Result<Bytes>>>,
}

#[derive(Debug, Clone)]
pub struct BodySender {
  tx: mpsc::Sender<io::Result<Bytes>>,
}

pub fn channel(capacity: usize) -> (BodySender, ChannelBody) {
  let (tx, rx) = mpsc::channel(capacity.max(1));
  (BodySender { tx }, ChannelBody { rx: Some(rx) })
}

impl ChannelBody {
  pub fn empty() -> Self {
    Self { rx: None }
  }

  /// A body that yields `bytes` once and ends.
  pub fn full(bytes: Bytes) -> Self {
    let (tx, rx) = mpsc::channel(1);
    if !bytes.is_empty() {
      // capacity 1 and nothing queued yet, so this cannot fail
      let _ = tx.try_send(Ok(bytes));
    }
    Self { rx: Some(rx) }
  }
}

impl Body for ChannelBody {
  type Data = Bytes;
  type Error = io::Error;

  fn poll_frame(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
    let Some(rx) = self.rx.as_mut() else {
      return Poll::Ready(None);
    };
    match ready!(rx.poll_recv(cx)) {
      Some(Ok(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
      Some(Err(e)) => Poll::Ready(Some(Err(e))),
      None => {
        self.rx = None;
        Poll::Ready(None)
      }
    }
  }

  fn is_end_stream(&self) -> bool {
    self.rx.is_none()
  }

  fn size_hint(&self) -> SizeHint {
    if self.rx.is_none() {
      SizeHint::with_exact(0)
    } else {
      SizeHint::default()
    }
  }
}

impl BodySender {
  /// Queue a data frame. Fails with `BrokenPipe` once the body was dropped.
  pub async fn send_data(&self, chunk: Bytes) -> io::Result<()> {
    self
      .tx
      .send(Ok(chunk))
      .await
      .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "body receiver dropped"))
  }

  /// Abort the body with an error; the peer sees a truncated message.
  pub async fn send_error(&self, err: io::Error) {
    let _ = self.tx.send(Err(err)).await;
  }

  /// Resolves once the receiving side is gone.
  pub async fn closed(&self) {
    self.tx.closed().await
  }

  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}
