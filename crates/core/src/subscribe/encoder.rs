use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use hyper::HeaderMap;
use hyper::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderValue};

use super::source::Source;

const EVENT_STREAM: &str = "text/event-stream";

/// Wire format of a subscription body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  /// Raw bytes; a NUL byte keeps idle connections open
  Text,
  /// Server-sent events; `id` carries the byte offset to resume from
  EventStream,
}

impl Format {
  pub fn from_accept(headers: &HeaderMap) -> Format {
    let wants_events = headers
      .get_all(ACCEPT)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .any(|v| v.contains(EVENT_STREAM));
    if wants_events {
      Format::EventStream
    } else {
      Format::Text
    }
  }

  pub fn idle_signal(&self) -> &'static [u8] {
    match self {
      Format::Text => b"\0",
      Format::EventStream => b":keepalive\n",
    }
  }

  pub fn content_headers(&self) -> Vec<(hyper::header::HeaderName, HeaderValue)> {
    match self {
      Format::Text => vec![(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
      )],
      Format::EventStream => vec![
        (CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM)),
        (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
      ],
    }
  }
}

/// Frames a [`Source`] in a [`Format`]. Seek before the first read.
#[derive(Debug)]
pub struct Encoder {
  source: Source,
  format: Format,
  offset: u64,
  started: bool,
}

impl Encoder {
  pub fn new(source: Source, format: Format) -> Self {
    Self {
      source,
      format,
      offset: 0,
      started: false,
    }
  }

  pub fn format(&self) -> Format {
    self.format
  }

  pub fn seek(&mut self, offset: u64) -> io::Result<()> {
    if self.started {
      return Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "seek after the first read",
      ));
    }
    self.source.seek(offset);
    self.offset = offset;
    Ok(())
  }

  pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
    self.started = true;
    let Some(chunk) = self.source.next_chunk().await? else {
      return Ok(None);
    };
    self.offset += chunk.len() as u64;
    Ok(Some(match self.format {
      Format::Text => chunk,
      Format::EventStream => event_frame(self.offset, &chunk),
    }))
  }
}

/// `id: <end offset>`, one `data:` line per line of `chunk`, blank line.
fn event_frame(end_offset: u64, chunk: &[u8]) -> Bytes {
  let mut frame = BytesMut::with_capacity(chunk.len() + 32);
  frame.put_slice(format!("id: {end_offset}\n").as_bytes());
  let body = chunk.strip_suffix(b"\n").unwrap_or(chunk);
  for line in body.split(|b| *b == b'\n') {
    frame.put_slice(b"data: ");
    frame.put_slice(line);
    frame.put_u8(b'\n');
  }
  frame.put_u8(b'\n');
  frame.freeze()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::broker::{LiveChannels, MemoryBroker};

  fn live(content: &[u8]) -> Source {
    let broker = MemoryBroker::new();
    let writer = broker.writer("k");
    writer.write(content);
    writer.close();
    Source::Live(broker.reader("k").unwrap())
  }

  async fn encode_all(mut enc: Encoder) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = enc.next_chunk().await.unwrap() {
      out.extend_from_slice(&chunk);
    }
    out
  }

  #[test]
  fn accept_header_picks_the_format() {
    let mut h = HeaderMap::new();
    assert_eq!(Format::from_accept(&h), Format::Text);
    h.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    assert_eq!(Format::from_accept(&h), Format::EventStream);
    assert_eq!(Format::EventStream.idle_signal(), b":keepalive\n");
    assert_eq!(Format::Text.idle_signal(), b"\0");
  }

  #[test]
  fn event_frames() {
    assert_eq!(
      &event_frame(12, b"hello\nworld\n")[..],
      b"id: 12\ndata: hello\ndata: world\n\n"
    );
    assert_eq!(&event_frame(3, b"abc")[..], b"id: 3\ndata: abc\n\n");
  }

  #[tokio::test]
  async fn text_seek_skips_the_prefix() {
    let mut enc = Encoder::new(live(b"hello world"), Format::Text);
    enc.seek(6).unwrap();
    assert_eq!(encode_all(enc).await, b"world");
  }

  #[tokio::test]
  async fn event_ids_count_from_the_seek_offset() {
    let mut enc = Encoder::new(live(b"hello world\n"), Format::EventStream);
    enc.seek(6).unwrap();
    assert_eq!(encode_all(enc).await, b"id: 12\ndata: world\n\n");
  }

  #[tokio::test]
  async fn seek_after_read_is_refused() {
    let mut enc = Encoder::new(live(b"abc"), Format::Text);
    enc.next_chunk().await.unwrap();
    assert!(enc.seek(1).is_err());
  }
}
