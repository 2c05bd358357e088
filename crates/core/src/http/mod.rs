//! HTTP plumbing shared by the uploader, the archive client and the server.

mod body;
mod client;
mod tls;

pub use body::{BodySender, ChannelBody, channel};
pub use client::{ClientOptions, HttpClient, TransportError};
