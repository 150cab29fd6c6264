//! CLI command implementations
//!
//! Each subcommand has its own module with:
//! - Args struct for command-line arguments
//! - run() function to execute the command

use clap::Subcommand;

pub mod add;
pub mod index;
pub mod remove;
pub mod search;
pub mod stats;

use crate::app::AppContext;
use crate::error::Result;

pub fn run(ctx: &AppContext, command: &Commands) -> Result<()> {
    match command {
        Commands::Add(args) => add::run(ctx, args),
        Commands::Index(args) => index::run(ctx, args),
        Commands::Search(args) => search::run(ctx, args),
        Commands::Stats(args) => stats::run(ctx, args),
        Commands::Remove(args) => remove::run(ctx, args),
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or update a skill
    Add(add::AddArgs),

    /// Embed pending skills
    Index(index::IndexArgs),

    /// Search skills by meaning and keyword
    Search(search::SearchArgs),

    /// Show store and index counters
    Stats(stats::StatsArgs),

    /// Delete a skill and its vector
    Remove(remove::RemoveArgs),
}
