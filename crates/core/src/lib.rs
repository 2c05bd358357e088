//! Core library for the relay.
//!
//! Relays the combined output of a spawned process to a remote HTTP endpoint
//! while tolerating flaky links, and serves that output back to subscribers
//! who may resume from any byte offset.
//!
//! Quick start:
//! - Upload side: build a `config::RelayConfig` and call `upload::run`, which
//!   spawns the command through `process::ProcessRunner`, spools its output to
//!   an on-disk `upload::OutputBuffer` and streams it with
//!   `upload::BufferedRetryTransport`.
//! - Subscriber side: start `server::start` with a `broker::MemoryBroker` and a
//!   `storage::Archive`; `GET /streams/{key}` is served by `subscribe::Subscriber`.
//! - Logging: call `logging::init` once and keep the returned guard until exit.

pub mod broker;
pub mod config;
pub mod http;
pub mod logging;
pub mod process;
pub mod server;
pub mod storage;
pub mod subscribe;
pub mod upload;
