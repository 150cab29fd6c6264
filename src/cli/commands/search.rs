//! sift search - Search for skills

use clap::Args;
use colored::Colorize;

use crate::app::AppContext;
use crate::cli::output::{emit_json, robot_ok};
use crate::error::Result;
use crate::search::snippet::highlight_with;
use crate::search::{Match, SearchOptions, SearchResults};
use crate::utils::{format_elapsed, truncate_string};

const DESCRIPTION_WIDTH: usize = 80;

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query
    pub query: String,

    /// Maximum number of results per source
    #[arg(long, short, default_value = "10")]
    pub limit: usize,

    /// Minimum semantic similarity in (0, 1]; 0 or less uses the config default
    #[arg(long, short)]
    pub threshold: Option<f32>,

    /// Skip full-text search
    #[arg(long)]
    pub no_fts: bool,

    /// Skip semantic search
    #[arg(long)]
    pub no_semantic: bool,
}

impl SearchArgs {
    fn options(&self) -> SearchOptions {
        SearchOptions {
            limit: self.limit,
            threshold: self.threshold,
            include_fts: !self.no_fts,
            include_semantic: !self.no_semantic,
        }
    }
}

pub fn run(ctx: &AppContext, args: &SearchArgs) -> Result<()> {
    let results = ctx.search_service().search(&args.query, &args.options())?;

    if ctx.robot_mode() {
        return emit_json(&robot_ok(&results));
    }
    print_human(&results);
    Ok(())
}

fn print_human(results: &SearchResults) {
    if results.total_hits == 0 {
        println!("{} No skills match \"{}\"", "!".yellow(), results.query);
        return;
    }

    if !results.title_matches.is_empty() {
        println!("{}", "Title matches".bold());
        for found in &results.title_matches {
            print_match(found);
        }
        println!();
    }
    if !results.content_matches.is_empty() {
        println!("{}", "Content matches".bold());
        for found in &results.content_matches {
            print_match(found);
            for snippet in &found.snippets {
                let text = highlight_with(snippet, |term| term.yellow().bold().to_string());
                println!("    {}", text.replace('\n', " "));
            }
        }
        println!();
    }

    println!(
        "{} hits in {}",
        results.total_hits,
        format_elapsed(results.duration)
    );
}

fn print_match(found: &Match) {
    println!(
        "  {} {} {}",
        format!("{:.2}", found.score).dimmed(),
        found.skill.title.bold(),
        format!("({})", found.skill.id).dimmed()
    );
    if !found.skill.description.is_empty() {
        println!(
            "    {}",
            truncate_string(&found.skill.description, DESCRIPTION_WIDTH)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_map_to_options() {
        let args = SearchArgs {
            query: "q".to_string(),
            limit: 5,
            threshold: Some(0.3),
            no_fts: true,
            no_semantic: false,
        };
        let options = args.options();
        assert_eq!(options.limit, 5);
        assert_eq!(options.threshold, Some(0.3));
        assert!(!options.include_fts);
        assert!(options.include_semantic);
    }
}
