use std::io;
use std::process::{ExitStatus, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

use super::RunError;

/// The process group led by the spawned command. Cheap to copy into the
/// signal forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup(Pid);

impl ProcessGroup {
  pub fn id(&self) -> i32 {
    self.0.as_raw()
  }

  /// Deliver `signal` to every process in the group. A group that is
  /// already gone is not an error.
  pub fn signal(&self, signal: Signal) -> io::Result<()> {
    match killpg(self.0, signal) {
      Ok(()) | Err(Errno::ESRCH) => Ok(()),
      Err(e) => Err(io::Error::from(e)),
    }
  }

  /// SIGTERM whatever is left of the group.
  pub fn terminate(&self) -> io::Result<()> {
    debug!(event = "process_group_terminate", pgid = self.id());
    self.signal(Signal::SIGTERM)
  }
}

/// A child started as the leader of its own process group with stdout and
/// stderr captured.
#[derive(Debug)]
pub struct GroupChild {
  child: Child,
  group: ProcessGroup,
}

impl GroupChild {
  pub fn start(args: &[String]) -> Result<(GroupChild, ChildStdout, ChildStderr), RunError> {
    let Some((program, rest)) = args.split_first() else {
      return Err(RunError::EmptyCommand);
    };
    if program.is_empty() {
      return Err(RunError::EmptyCommand);
    }

    let start_err = |source: io::Error| RunError::Start {
      program: program.clone(),
      source,
    };

    let mut cmd = Command::new(program);
    cmd
      .args(rest)
      .stdin(Stdio::inherit())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .process_group(0);

    let mut child = cmd.spawn().map_err(start_err)?;
    let pid = child
      .id()
      .ok_or_else(|| start_err(io::Error::other("child exited before its pid was read")))?;
    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| start_err(io::Error::other("stdout not captured")))?;
    let stderr = child
      .stderr
      .take()
      .ok_or_else(|| start_err(io::Error::other("stderr not captured")))?;

    // pgid == pid for a group leader
    let group = ProcessGroup(Pid::from_raw(pid as i32));
    debug!(event = "process_started", program = %program, pid);
    Ok((GroupChild { child, group }, stdout, stderr))
  }

  pub fn process_group(&self) -> ProcessGroup {
    self.group
  }

  pub fn forward_signal(&self, signal: Signal) -> io::Result<()> {
    self.group.signal(signal)
  }

  pub fn terminate_group(&self) -> io::Result<()> {
    self.group.terminate()
  }

  pub async fn wait(&mut self) -> io::Result<ExitStatus> {
    self.child.wait().await
  }
}
