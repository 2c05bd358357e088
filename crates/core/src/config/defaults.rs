use std::time::Duration;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub(crate) const RETRY: u32 = 5;
pub(crate) const STREAM_RETRY: u32 = 60;
pub(crate) const SLEEP_DURATION: Duration = Duration::from_secs(1);
pub(crate) const HEARTBEAT: Duration = Duration::from_secs(10);

const DEFAULT_PORT: u16 = 5001;

/// `PORT` from the environment when it parses, otherwise the built-in port.
pub(crate) fn port() -> u16 {
  std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse().ok())
    .unwrap_or(DEFAULT_PORT)
}
