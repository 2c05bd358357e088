fn main() {
  std::process::exit(cli::relay::run());
}
