//! sift remove - Delete a skill and its vector

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{emit_json, robot_ok};
use crate::error::{Result, SiftError};
use crate::search::VectorStore;

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Skill id
    pub id: String,
}

#[derive(Serialize)]
struct RemoveReport<'a> {
    id: &'a str,
    removed: bool,
}

pub fn run(ctx: &AppContext, args: &RemoveArgs) -> Result<()> {
    if !ctx.db.delete_skill(&args.id)? {
        return Err(SiftError::NotFound(format!("skill {}", args.id)));
    }
    ctx.vectors.delete(&args.id)?;

    if ctx.robot_mode() {
        return emit_json(&robot_ok(RemoveReport {
            id: &args.id,
            removed: true,
        }));
    }
    println!("{} Removed {}", "✓".green().bold(), args.id);
    Ok(())
}
