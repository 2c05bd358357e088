//! Live channels: named, append-only byte buffers that publishers write
//! into and subscribers tail.

use bytes::Bytes;

mod memory;

pub use memory::{ChannelReader, ChannelWriter, MemoryBroker};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BrokerError {
  #[error("channel {0:?} is not registered")]
  NotRegistered(String),
  #[error("write at {position} would leave a gap after {len} bytes in channel {key:?}")]
  OutOfOrder { key: String, position: u64, len: u64 },
}

/// What the relay needs from the live side of a channel.
pub trait LiveChannels: Send + Sync + 'static {
  /// Writer for `key`, registering the channel if needed. A finished channel
  /// is replaced by a fresh one.
  fn writer(&self, key: &str) -> ChannelWriter;

  /// Reader positioned at 0. [`BrokerError::NotRegistered`] when the
  /// channel never existed or was evicted.
  fn reader(&self, key: &str) -> Result<ChannelReader, BrokerError>;

  /// Everything written to `key` so far.
  fn get_all(&self, key: &str) -> Result<Bytes, BrokerError>;

  /// Forget `key`. Open readers keep what they hold.
  fn evict(&self, key: &str);
}
