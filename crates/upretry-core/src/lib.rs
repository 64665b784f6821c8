pub mod config;
pub mod error;
pub mod logging;

pub mod cluster;
pub mod retry;
pub mod runtime;
pub mod timer;
