use std::time::Duration;

use super::types::{ConfigError, RelayConfig, Result};

pub(super) fn validate_relay(cfg: &RelayConfig) -> Result<()> {
  if cfg.args.is_empty() || cfg.args[0].is_empty() {
    return Err(ConfigError::MissingCommand);
  }
  Ok(())
}

/// Convert fractional seconds from the command line into a `Duration`.
/// Negative values are rejected; zero is allowed and means "disabled".
pub fn secs_to_duration(secs: f64) -> Result<Duration> {
  Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidDuration(format!("{secs}: {e}")))
}
