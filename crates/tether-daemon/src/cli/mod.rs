mod checks;
mod commands;
mod init;
mod run;
mod status;
mod utils;

pub use checks::run_checks;
pub use commands::{Cli, Commands, OutputFormat};
pub use init::init_config;
pub use run::run_agent;
pub use status::show_status;
pub use utils::{init_logging, show_version, Paths};
