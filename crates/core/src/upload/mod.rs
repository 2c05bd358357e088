//! Streaming upload of command output.
//!
//! The command's output flows through an in-process [`pipe`] into an
//! [`OutputBuffer`] on disk. The [`BufferedRetryTransport`] streams that
//! buffer to the remote endpoint while it is still growing and resends it
//! from the start when an attempt fails. [`run`] ties this to the
//! [`ProcessRunner`](crate::process::ProcessRunner).

mod buffer;
mod coordinator;
mod pipe;
mod transport;
mod uploader;

pub use buffer::{BufferReader, BufferWriter, OutputBuffer};
pub use coordinator::{UPLOAD_GRACE, run, run_with};
pub use pipe::{OutputSink, OutputStream, pipe};
pub use transport::{BufferedRetryTransport, Transport};
pub use uploader::{UploadError, Uploader};
