//! CLI command handlers. Each command is in its own file.

mod check_config;
mod simulate;

pub use check_config::run_check_config;
pub use simulate::{run_simulate, Signal, SimulateOptions};
