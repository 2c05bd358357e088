pub mod args;
pub mod relay;
pub mod server;

#[cfg(test)]
mod tests {
  use super::*;
  use clap::{Parser, error::ErrorKind};

  #[test]
  fn help_flag_triggers_displayhelp() {
    let err = args::RelayArgs::try_parse_from(["relay", "--help"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    let err = args::ServerArgs::try_parse_from(["relay-server", "--help"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisplayHelp);
  }

  #[test]
  fn version_flag_triggers_displayversion() {
    let err = args::RelayArgs::try_parse_from(["relay", "--version"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisplayVersion);
  }
}
