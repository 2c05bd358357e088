use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use super::{BrokerError, LiveChannels};

const READ_CHUNK: usize = 32 * 1024;

/// In-process [`LiveChannels`] backed by one growing byte vector per key.
#[derive(Debug, Default)]
pub struct MemoryBroker {
  channels: Mutex<HashMap<String, Arc<Channel>>>,
}

#[derive(Debug)]
struct Channel {
  key: String,
  state: Mutex<ChannelState>,
  notify: Notify,
}

#[derive(Debug, Default)]
struct ChannelState {
  data: Vec<u8>,
  closed: bool,
}

#[derive(Debug, Clone)]
pub struct ChannelWriter {
  channel: Arc<Channel>,
}

#[derive(Debug)]
pub struct ChannelReader {
  channel: Arc<Channel>,
  pos: u64,
}

impl MemoryBroker {
  pub fn new() -> Self {
    Self::default()
  }
}

impl LiveChannels for MemoryBroker {
  fn writer(&self, key: &str) -> ChannelWriter {
    let mut channels = self.channels.lock();
    let reusable = channels
      .get(key)
      .filter(|c| !c.state.lock().closed)
      .cloned();
    let channel = match reusable {
      Some(c) => c,
      None => {
        debug!(event = "channel_registered", key);
        let c = Arc::new(Channel {
          key: key.to_string(),
          state: Mutex::new(ChannelState::default()),
          notify: Notify::new(),
        });
        channels.insert(key.to_string(), c.clone());
        c
      }
    };
    ChannelWriter { channel }
  }

  fn reader(&self, key: &str) -> Result<ChannelReader, BrokerError> {
    let channels = self.channels.lock();
    let channel = channels
      .get(key)
      .cloned()
      .ok_or_else(|| BrokerError::NotRegistered(key.to_string()))?;
    Ok(ChannelReader { channel, pos: 0 })
  }

  fn get_all(&self, key: &str) -> Result<Bytes, BrokerError> {
    let channels = self.channels.lock();
    let channel = channels
      .get(key)
      .ok_or_else(|| BrokerError::NotRegistered(key.to_string()))?;
    let data = Bytes::copy_from_slice(&channel.state.lock().data);
    Ok(data)
  }

  fn evict(&self, key: &str) {
    if self.channels.lock().remove(key).is_some() {
      debug!(event = "channel_evicted", key);
    }
  }
}

impl ChannelWriter {
  /// Append the part of `bytes` that lies past the channel's current end,
  /// treating `bytes` as starting at `position`. Resending a prefix is a
  /// no-op. Returns how many bytes were appended.
  pub fn write_at(&self, position: u64, bytes: &[u8]) -> Result<usize, BrokerError> {
    let appended = {
      let mut state = self.channel.state.lock();
      let len = state.data.len() as u64;
      if position > len {
        return Err(BrokerError::OutOfOrder {
          key: self.channel.key.clone(),
          position,
          len,
        });
      }
      let skip = ((len - position) as usize).min(bytes.len());
      state.data.extend_from_slice(&bytes[skip..]);
      bytes.len() - skip
    };
    if appended > 0 {
      self.channel.notify.notify_waiters();
    }
    Ok(appended)
  }

  pub fn write(&self, bytes: &[u8]) {
    self.channel.state.lock().data.extend_from_slice(bytes);
    self.channel.notify.notify_waiters();
  }

  /// Mark the channel finished; readers end once they reach its end.
  pub fn close(&self) {
    self.channel.state.lock().closed = true;
    self.channel.notify.notify_waiters();
  }

  pub fn len(&self) -> u64 {
    self.channel.state.lock().data.len() as u64
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl ChannelReader {
  pub fn seek(&mut self, offset: u64) {
    self.pos = offset;
  }

  pub fn position(&self) -> u64 {
    self.pos
  }

  /// True when nothing will ever be readable at `offset`: it lies past the
  /// bytes present, or the channel is finished and `offset` is at its end.
  pub fn no_content(&self, offset: u64) -> bool {
    let state = self.channel.state.lock();
    let len = state.data.len() as u64;
    offset > len || (state.closed && offset >= len)
  }

  /// Next bytes from the current position, waiting for a publisher while the
  /// channel is open. `None` once a finished channel is fully read.
  pub async fn next_chunk(&mut self) -> Option<Bytes> {
    loop {
      let notified = self.channel.notify.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      {
        let state = self.channel.state.lock();
        let len = state.data.len() as u64;
        if self.pos < len {
          let start = self.pos as usize;
          let end = (start + READ_CHUNK).min(state.data.len());
          self.pos = end as u64;
          return Some(Bytes::copy_from_slice(&state.data[start..end]));
        }
        if state.closed {
          return None;
        }
      }
      notified.await;
    }
  }
}
