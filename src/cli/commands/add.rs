//! sift add - Create or update a skill

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{emit_json, robot_ok};
use crate::core::{Skill, Tag};
use crate::error::{Result, SiftError};

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Skill title
    #[arg(long, required_unless_present = "file")]
    pub title: Option<String>,

    /// Stable id; a random one is generated when omitted
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long, short)]
    pub description: Option<String>,

    #[arg(long)]
    pub summary: Option<String>,

    /// Body text
    #[arg(long, short)]
    pub content: Option<String>,

    /// Tag name (repeatable)
    #[arg(long = "tag", short)]
    pub tags: Vec<String>,

    /// TOML file describing the skill; flags override its fields
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,
}

#[derive(Serialize)]
struct AddReport<'a> {
    id: &'a str,
    title: &'a str,
    pending: bool,
}

pub fn run(ctx: &AppContext, args: &AddArgs) -> Result<()> {
    let skill = build_skill(args)?;
    let saved = ctx.db.save_skill(&skill)?;

    if ctx.robot_mode() {
        return emit_json(&robot_ok(AddReport {
            id: &saved.id,
            title: &saved.title,
            pending: saved.is_pending(),
        }));
    }

    println!("{} Saved {} ({})", "✓".green().bold(), saved.title.bold(), saved.id);
    if saved.is_pending() {
        println!("  run {} to embed it", "sift index".cyan());
    }
    Ok(())
}

fn build_skill(args: &AddArgs) -> Result<Skill> {
    let mut skill = match &args.file {
        Some(path) => {
            let raw = crate::utils::read_optional(path)?
                .ok_or_else(|| SiftError::NotFound(format!("skill file {}", path.display())))?;
            toml::from_str::<Skill>(&raw).map_err(|err| {
                SiftError::Serialization(format!("parse {}: {err}", path.display()))
            })?
        }
        None => Skill::default(),
    };

    if let Some(title) = &args.title {
        skill.title.clone_from(title);
    }
    if let Some(id) = &args.id {
        skill.id.clone_from(id);
    }
    if let Some(description) = &args.description {
        skill.description.clone_from(description);
    }
    if let Some(summary) = &args.summary {
        skill.summary.clone_from(summary);
    }
    if let Some(content) = &args.content {
        skill.content.clone_from(content);
    }
    if !args.tags.is_empty() {
        skill.tags = args.tags.iter().map(Tag::new).collect();
    }

    if skill.title.trim().is_empty() {
        return Err(SiftError::InvalidArgument("skill title is empty".to_string()));
    }
    if skill.id.is_empty() {
        skill = skill.with_id(uuid::Uuid::new_v4().to_string());
    }
    // Embedding state is owned by the indexer.
    skill.embedding_id.clear();
    Ok(skill)
}
