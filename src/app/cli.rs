//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "rackfand",
    version,
    about = "Curve-driven BMC fan control for rack servers"
)]
pub struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "rackfand.json")]
    pub config: PathBuf,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Validate the configuration and controller support, then exit
    #[arg(long)]
    pub check: bool,
}
