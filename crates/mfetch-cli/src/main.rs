use mfetch_core::logging;

mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() {
    // Log to the state dir; fall back to stderr if it is not writable.
    if let Err(e) = logging::init_logging() {
        match logging::init_logging_stderr() {
            Ok(()) => tracing::warn!("file logging unavailable, using stderr: {:#}", e),
            Err(stderr_err) => eprintln!("mfetch: logging disabled: {:#}", stderr_err),
        }
    }

    if let Err(err) = CliCommand::run_from_args().await {
        eprintln!("mfetch error: {:#}", err);
        std::process::exit(1);
    }
}
