use hyper::HeaderMap;
use hyper::header::RANGE;

pub const LAST_EVENT_ID: &str = "last-event-id";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OffsetError {
  #[error("unsupported range unit in {0:?}")]
  InvalidUnit(String),
  #[error("invalid offset {0:?}")]
  InvalidOffset(String),
}

/// Where a subscriber wants to start reading: `Last-Event-ID` if present,
/// else the start of a `Range: bytes=<start>-` header, else 0.
pub fn resolve_offset(headers: &HeaderMap) -> Result<u64, OffsetError> {
  if let Some(id) = header_str(headers, LAST_EVENT_ID)? {
    return id
      .parse()
      .map_err(|_| OffsetError::InvalidOffset(id.to_string()));
  }
  match header_str(headers, RANGE.as_str())? {
    Some(range) => parse_range_start(range),
    None => Ok(0),
  }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, OffsetError> {
  let Some(value) = headers.get(name) else {
    return Ok(None);
  };
  let s = value
    .to_str()
    .map_err(|_| OffsetError::InvalidOffset(String::from_utf8_lossy(value.as_bytes()).into()))?
    .trim();
  Ok((!s.is_empty()).then_some(s))
}

fn parse_range_start(range: &str) -> Result<u64, OffsetError> {
  let Some(("bytes", spec)) = range.split_once('=') else {
    return Err(OffsetError::InvalidUnit(range.to_string()));
  };
  // only the first range counts
  let first = spec.split(',').next().unwrap_or_default().trim();
  let Some((start, _end)) = first.split_once('-') else {
    return Err(OffsetError::InvalidOffset(range.to_string()));
  };
  if start.is_empty() {
    // suffix ranges (`bytes=-500`) replay from the beginning
    return Ok(0);
  }
  start
    .parse()
    .map_err(|_| OffsetError::InvalidOffset(range.to_string()))
}
