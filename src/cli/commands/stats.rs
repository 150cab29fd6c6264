//! sift stats - Show store and index counters

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit_human, emit_json, robot_ok};
use crate::error::Result;
use crate::search::SearchStats;

#[derive(Args, Debug)]
pub struct StatsArgs {}

#[derive(Serialize)]
struct StatsReport {
    root: String,
    schema_version: u32,
    #[serde(flatten)]
    stats: SearchStats,
}

pub fn run(ctx: &AppContext, _args: &StatsArgs) -> Result<()> {
    let stats = ctx.search_service().stats()?;

    if ctx.robot_mode() {
        return emit_json(&robot_ok(StatsReport {
            root: ctx.root.display().to_string(),
            schema_version: ctx.db.schema_version(),
            stats,
        }));
    }

    let mut layout = HumanLayout::new();
    layout
        .title("sift stats")
        .kv("root", &ctx.root.display().to_string())
        .kv("skills", &stats.total_skills.to_string())
        .kv("pending", &stats.pending.to_string())
        .kv(
            "vectors",
            &stats
                .indexed_vectors
                .map_or_else(|| "unavailable".to_string(), |count| count.to_string()),
        )
        .kv(
            "last updated",
            &stats
                .last_updated
                .map_or_else(|| "never".to_string(), |at| at.to_rfc3339()),
        );
    emit_human(layout);
    Ok(())
}
