//! Command-line interface for sift

use std::path::PathBuf;

use clap::{ArgAction, Parser};

pub mod commands;
pub mod output;

pub use commands::Commands;
use output::OutputMode;

#[derive(Parser, Debug)]
#[command(
    name = "sift",
    version,
    about = "Index skills and search them by meaning and by keyword"
)]
pub struct Cli {
    /// Machine-readable JSON output
    #[arg(long, global = true, env = "SIFT_ROBOT")]
    pub robot: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable logging
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file to use instead of the global and project files
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    #[must_use]
    pub const fn output_mode(&self) -> OutputMode {
        if self.robot {
            OutputMode::Robot
        } else {
            OutputMode::Human
        }
    }
}
