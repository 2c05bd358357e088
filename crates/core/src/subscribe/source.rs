use std::io;

use bytes::Bytes;

use crate::broker::ChannelReader;
use crate::storage::ArchiveReader;

/// Where a subscription's bytes come from.
#[derive(Debug)]
pub enum Source {
  Live(ChannelReader),
  /// Already positioned at the requested offset by the storage backend,
  /// even when the backend ignored the range
  Archive(ArchiveReader),
}

/// Outcome of picking a source for a subscription.
#[derive(Debug)]
pub enum Selection {
  Stream(Source),
  /// Nothing exists at or past the requested offset
  NoContent,
}

impl Source {
  pub fn seek(&mut self, offset: u64) {
    match self {
      Source::Live(reader) => reader.seek(offset),
      Source::Archive(_) => {}
    }
  }

  pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
    match self {
      Source::Live(reader) => Ok(reader.next_chunk().await),
      Source::Archive(reader) => reader.next_chunk().await,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Source::Live(_) => "live",
      Source::Archive(_) => "archive",
    }
  }
}
