//! CLI command handlers, one file per subcommand.

mod check;
mod config_path;
mod fetch;
mod reap;

pub use check::run_check;
pub use config_path::run_config_path;
pub use fetch::run_fetch;
pub use reap::run_reap;
