/// Entry point for the `git-history-rewrite` binary.
///
/// Sets up logging from `RUST_LOG`, delegates to the CLI entry function
/// and exits with its code. If an error occurs, exits with status code 1.
fn main() {
    env_logger::init();
    match git_history_rewrite::cli::entry() {
        Ok(code) => std::process::exit(code),
        Err(_) => std::process::exit(1),
    }
}
