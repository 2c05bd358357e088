fn main() {
  if let Err(e) = cli::server::run() {
    eprintln!("relay-server: {e:#}");
    std::process::exit(1);
  }
}
