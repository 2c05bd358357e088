use std::time::Duration;

use test_support::{RecordingServer, unused_addr};

fn runtime() -> tokio::runtime::Runtime {
  tokio::runtime::Builder::new_multi_thread()
    .worker_threads(2)
    .enable_all()
    .build()
    .unwrap()
}

#[test]
fn exit_code_mirrors_the_command() {
  assert_eq!(cli::relay::run_from(["relay", "", "--", "sh", "-c", "exit 3"]), 3);
  assert_eq!(cli::relay::run_from(["relay", "", "--", "true"]), 0);
}

#[test]
fn relay_level_failures_exit_one() {
  assert_eq!(
    cli::relay::run_from(["relay", "", "--", "/no/such/program"]),
    1
  );
  assert_eq!(
    cli::relay::run_from(["relay", "--log-field", "novalue", "", "--", "true"]),
    1
  );
}

#[test]
fn usage_errors_use_the_clap_exit_code() {
  assert_eq!(cli::relay::run_from(["relay", "http://x"]), 2);
  assert_eq!(cli::relay::run_from(["relay", "--help"]), 0);
}

#[test]
fn output_is_uploaded_with_flags_applied() {
  let rt = runtime();
  let sink = rt.block_on(RecordingServer::start([200]));
  let url = sink.url("/streams/build/1?token=t");

  let code = cli::relay::run_from([
    "relay",
    "--request-id",
    "req-7",
    "--stream-retry",
    "0",
    url.as_str(),
    "--",
    "sh",
    "-c",
    "echo compiled; exit 5",
  ]);
  assert_eq!(code, 5);

  let requests = sink.requests();
  assert_eq!(requests.len(), 1);
  assert_eq!(requests[0].method, "POST");
  assert_eq!(requests[0].path, "/streams/build/1");
  assert_eq!(requests[0].header("request-id"), Some("req-7"));
  assert_eq!(&requests[0].body[..], b"compiled\n");
}

#[test]
fn unreachable_endpoint_keeps_the_exit_code() {
  let url = format!("http://{}/streams/1", unused_addr());
  let started = std::time::Instant::now();
  let code = cli::relay::run_from([
    "relay",
    "--stream-retry",
    "1",
    url.as_str(),
    "--",
    "sh",
    "-c",
    "exit 4",
  ]);
  assert_eq!(code, 4);
  assert!(started.elapsed() < Duration::from_secs(10));
}
