//! Daemon shell pieces: CLI parsing and log setup.

pub mod cli;
pub mod logging;
