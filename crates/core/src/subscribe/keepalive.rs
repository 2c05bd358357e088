use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use super::encoder::Encoder;
use crate::http::{BodySender, ChannelBody, channel};

const QUEUE: usize = 4;

/// Stream `encoder` into a response body, emitting the format's idle signal
/// whenever nothing arrived for `heartbeat`. A zero `heartbeat` sends no idle
/// signal at all. Stops as soon as the body is dropped.
pub fn keepalive_body(encoder: Encoder, heartbeat: Duration) -> ChannelBody {
  let (tx, body) = channel(QUEUE);
  tokio::spawn(stream_with_keepalive(encoder, heartbeat, tx));
  body
}

async fn stream_with_keepalive(encoder: Encoder, heartbeat: Duration, tx: BodySender) {
  let idle = Bytes::from_static(encoder.format().idle_signal());
  // reads happen on their own task so a heartbeat never interrupts one
  let (chunk_tx, mut chunk_rx) = mpsc::channel::<io::Result<Bytes>>(QUEUE);
  let reader = tokio::spawn(pump(encoder, chunk_tx));

  loop {
    tokio::select! {
      _ = tx.closed() => {
        debug!(event = "subscriber_disconnected");
        break;
      }
      next = next_or_idle(heartbeat, &mut chunk_rx) => match next {
        Ok(Some(Ok(chunk))) => {
          if tx.send_data(chunk).await.is_err() {
            break;
          }
        }
        Ok(Some(Err(e))) => {
          tx.send_error(e).await;
          break;
        }
        Ok(None) => break,
        Err(_) => {
          if tx.send_data(idle.clone()).await.is_err() {
            break;
          }
        }
      },
    }
  }
  reader.abort();
}

async fn next_or_idle(
  heartbeat: Duration,
  chunk_rx: &mut mpsc::Receiver<io::Result<Bytes>>,
) -> Result<Option<io::Result<Bytes>>, tokio::time::error::Elapsed> {
  if heartbeat.is_zero() {
    return Ok(chunk_rx.recv().await);
  }
  tokio::time::timeout(heartbeat, chunk_rx.recv()).await
}

async fn pump(mut encoder: Encoder, out: mpsc::Sender<io::Result<Bytes>>) {
  loop {
    let item = match encoder.next_chunk().await {
      Ok(Some(chunk)) => Ok(chunk),
      Ok(None) => return,
      Err(e) => Err(e),
    };
    let failed = item.is_err();
    if out.send(item).await.is_err() || failed {
      return;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::broker::{LiveChannels, MemoryBroker};
  use crate::subscribe::{Format, Source};
  use http_body_util::BodyExt;
  use hyper::body::Body;

  fn open(broker: &MemoryBroker, format: Format) -> Encoder {
    Encoder::new(Source::Live(broker.reader("k").unwrap()), format)
  }

  async fn next_data(body: &mut ChannelBody) -> Option<Bytes> {
    body
      .frame()
      .await
      .map(|f| f.unwrap().into_data().unwrap())
  }

  #[tokio::test]
  async fn idle_signal_fills_quiet_periods() {
    let broker = MemoryBroker::new();
    let writer = broker.writer("k");
    let mut body = keepalive_body(open(&broker, Format::Text), Duration::from_millis(30));

    assert_eq!(next_data(&mut body).await.as_deref(), Some(&b"\0"[..]));
    writer.write(b"data");
    // skip any heartbeats that raced the write
    let mut got = next_data(&mut body).await.unwrap();
    while &got[..] == b"\0" {
      got = next_data(&mut body).await.unwrap();
    }
    assert_eq!(&got[..], b"data");
    writer.close();
    let mut rest = Vec::new();
    while let Some(chunk) = next_data(&mut body).await {
      rest.extend_from_slice(&chunk);
    }
    assert!(rest.iter().all(|b| *b == 0));
    assert!(body.is_end_stream());
  }

  #[tokio::test]
  async fn event_stream_heartbeat_is_a_comment() {
    let broker = MemoryBroker::new();
    let _writer = broker.writer("k");
    let mut body = keepalive_body(
      open(&broker, Format::EventStream),
      Duration::from_millis(20),
    );
    assert_eq!(
      next_data(&mut body).await.as_deref(),
      Some(&b":keepalive\n"[..])
    );
  }

  #[tokio::test]
  async fn zero_heartbeat_sends_no_idle_signal() {
    let broker = MemoryBroker::new();
    let writer = broker.writer("k");
    let mut body = keepalive_body(open(&broker, Format::Text), Duration::ZERO);

    let quiet = tokio::time::timeout(Duration::from_millis(100), next_data(&mut body)).await;
    assert!(quiet.is_err(), "idle subscriber received {quiet:?}");

    writer.write(b"late");
    writer.close();
    assert_eq!(next_data(&mut body).await.as_deref(), Some(&b"late"[..]));
    assert_eq!(next_data(&mut body).await, None);
  }

  #[tokio::test]
  async fn finished_source_ends_the_body() {
    let broker = MemoryBroker::new();
    let writer = broker.writer("k");
    writer.write(b"all of it");
    writer.close();
    let body = keepalive_body(open(&broker, Format::Text), Duration::from_secs(10));
    let bytes = body.collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"all of it");
  }

  #[tokio::test]
  async fn dropping_the_body_stops_the_stream() {
    let broker = MemoryBroker::new();
    // open channel: without the disconnect the reader would wait forever
    let _writer = broker.writer("k");
    let (tx, body) = channel(QUEUE);
    let task = tokio::spawn(stream_with_keepalive(
      open(&broker, Format::Text),
      Duration::from_millis(10),
      tx,
    ));
    drop(body);
    tokio::time::timeout(Duration::from_secs(2), task)
      .await
      .expect("stream stops after disconnect")
      .unwrap();
  }
}
