//! sift index - Embed pending skills

use clap::Args;
use colored::Colorize;
use crossbeam_channel::bounded;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{emit_json, robot_partial};
use crate::error::{Result, SiftError};
use crate::indexing::{IndexProgress, IndexerConfig, IndexerState};
use crate::utils::{CancelToken, format_elapsed};

const PROGRESS_QUEUE: usize = 16;

#[derive(Args, Debug)]
pub struct IndexArgs {
    /// Skills per embedding batch (overrides config)
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,
}

#[derive(Serialize)]
struct IndexReport {
    state: IndexerState,
    #[serde(flatten)]
    progress: IndexProgress,
}

pub fn run(ctx: &AppContext, args: &IndexArgs) -> Result<()> {
    let config = IndexerConfig {
        batch_size: args.batch_size.unwrap_or(ctx.config.indexer.batch_size),
        ..ctx.config.indexer
    };
    let background = ctx.background_indexer(config);

    let (tx, rx) = bounded::<IndexProgress>(PROGRESS_QUEUE);
    background.start(&CancelToken::new(), tx)?;

    let bar = (!ctx.robot_mode()).then(progress_bar);
    for event in rx {
        if let Some(bar) = &bar {
            if event.total > 0 {
                bar.set_length(event.total as u64);
            }
            bar.set_position(event.processed() as u64);
            bar.set_message(event.message.clone());
        }
    }
    background.wait();

    let (state, summary) = background
        .last_run()
        .ok_or_else(|| SiftError::Thread("indexing run did not report an outcome".to_string()))?;

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if ctx.robot_mode() {
        return emit_json(&robot_partial(
            summary.completed,
            summary.failed,
            IndexReport {
                state,
                progress: summary,
            },
        ));
    }

    if state == IndexerState::Failed {
        println!("{} {}", "✗".red().bold(), summary.message);
        return Ok(());
    }
    if summary.total == 0 {
        println!("{} Nothing to index", "✓".green().bold());
        return Ok(());
    }

    println!(
        "{} Indexed {} of {} skills in {} ({} failed)",
        "✓".green().bold(),
        summary.completed,
        summary.total,
        format_elapsed(summary.duration),
        summary.failed
    );
    if summary.failed > 0 {
        println!(
            "{} {} skills stay pending; run {} again to retry",
            "!".yellow(),
            summary.failed,
            "sift index".cyan()
        );
    }
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}
