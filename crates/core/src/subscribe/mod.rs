//! Subscriber side of a channel: resolve the offset, pick the live or the
//! archived source, encode, and keep the connection alive.

use std::sync::Arc;
use std::time::Duration;

use hyper::{HeaderMap, StatusCode};
use tracing::{debug, info};

use crate::broker::{BrokerError, LiveChannels};
use crate::http::ChannelBody;
use crate::storage::{ArchiveStorage, StorageError, resource_path};

mod encoder;
mod keepalive;
mod offset;
mod source;

pub use encoder::{Encoder, Format};
pub use keepalive::keepalive_body;
pub use offset::{LAST_EVENT_ID, OffsetError, resolve_offset};
pub use source::{Selection, Source};

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
  #[error(transparent)]
  Offset(#[from] OffsetError),
  #[error(transparent)]
  Broker(#[from] BrokerError),
  #[error(transparent)]
  Storage(#[from] StorageError),
}

impl SubscribeError {
  pub fn status(&self) -> StatusCode {
    match self {
      SubscribeError::Offset(OffsetError::InvalidUnit(_)) => StatusCode::RANGE_NOT_SATISFIABLE,
      SubscribeError::Offset(OffsetError::InvalidOffset(_)) => StatusCode::BAD_REQUEST,
      SubscribeError::Broker(BrokerError::NotRegistered(_)) => StatusCode::NOT_FOUND,
      SubscribeError::Broker(_) => StatusCode::INTERNAL_SERVER_ERROR,
      SubscribeError::Storage(e) => match e {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        StorageError::InvalidLocation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
      },
    }
  }
}

/// A ready-to-send subscription.
#[derive(Debug)]
pub enum Subscription {
  NoContent,
  Stream { format: Format, body: ChannelBody },
}

/// Opens subscriptions against a broker, falling back to archived storage.
pub struct Subscriber<B, S> {
  broker: Arc<B>,
  storage: Arc<S>,
  storage_base: String,
  heartbeat: Duration,
}

impl<B, S> Clone for Subscriber<B, S> {
  fn clone(&self) -> Self {
    Self {
      broker: self.broker.clone(),
      storage: self.storage.clone(),
      storage_base: self.storage_base.clone(),
      heartbeat: self.heartbeat,
    }
  }
}

impl<B: LiveChannels, S: ArchiveStorage> Subscriber<B, S> {
  pub fn new(broker: Arc<B>, storage: Arc<S>, storage_base: impl Into<String>, heartbeat: Duration) -> Self {
    Self {
      broker,
      storage,
      storage_base: storage_base.into(),
      heartbeat,
    }
  }

  /// Live channel first; only a channel that is not registered falls back
  /// to storage, where the query string is part of the resource.
  pub async fn select(
    &self,
    key: &str,
    query: Option<&str>,
    offset: u64,
  ) -> Result<Selection, SubscribeError> {
    match self.broker.reader(key) {
      Ok(reader) if reader.no_content(offset) => Ok(Selection::NoContent),
      Ok(reader) => Ok(Selection::Stream(Source::Live(reader))),
      Err(BrokerError::NotRegistered(_)) => {
        debug!(event = "subscribe_archive_fallback", key, offset);
        let resource = resource_path(key, query);
        let reader = self
          .storage
          .get(&resource, &self.storage_base, offset)
          .await?;
        Ok(Selection::Stream(Source::Archive(reader)))
      }
      Err(e) => Err(e.into()),
    }
  }

  pub async fn open(
    &self,
    key: &str,
    query: Option<&str>,
    headers: &HeaderMap,
  ) -> Result<Subscription, SubscribeError> {
    let offset = resolve_offset(headers)?;
    let format = Format::from_accept(headers);
    let source = match self.select(key, query, offset).await? {
      Selection::NoContent => {
        info!(event = "subscribe_no_content", key, offset);
        return Ok(Subscription::NoContent);
      }
      Selection::Stream(source) => source,
    };
    info!(
      event = "subscribe_open",
      key,
      offset,
      source = source.kind(),
      format = ?format
    );

    let mut encoder = Encoder::new(source, format);
    encoder
      .seek(offset)
      .map_err(|e| SubscribeError::Storage(StorageError::Io(e)))?;
    Ok(Subscription::Stream {
      format,
      body: keepalive_body(encoder, self.heartbeat),
    })
  }
}
