use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use crate::core::Skill;
use crate::search::{HashEmbedder, HashVectorStore};
use crate::storage::Database;

/// Isolated data root with a SQLite store and a persisted vector store.
pub struct SkillFixture {
    pub temp_dir: TempDir,
    pub data_path: PathBuf,
    pub db: Arc<Database>,
    pub vectors: Arc<HashVectorStore>,
}

impl SkillFixture {
    #[must_use]
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let data_path = temp_dir.path().to_path_buf();
        let db = Database::open(data_path.join("skills.db")).expect("Failed to open database");
        let vectors = HashVectorStore::open(
            data_path.join("vectors.db"),
            Arc::new(HashEmbedder::default()),
            crate::search::DEFAULT_MAX_TOKENS,
        )
        .expect("Failed to open vector store");

        println!("[FIXTURE] Created data root: {data_path:?}");

        Self {
            temp_dir,
            data_path,
            db: Arc::new(db),
            vectors: Arc::new(vectors),
        }
    }

    /// Save skills and return them as stored.
    pub fn seed(&self, skills: impl IntoIterator<Item = Skill>) -> Vec<Skill> {
        skills
            .into_iter()
            .map(|skill| self.db.save_skill(&skill).expect("Failed to save skill"))
            .collect()
    }
}

impl Default for SkillFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SkillFixture {
    fn drop(&mut self) {
        println!("[FIXTURE] Cleaning up data root: {:?}", self.data_path);
    }
}

/// A small, varied corpus with stable ids.
#[must_use]
pub fn sample_skills() -> Vec<Skill> {
    vec![
        Skill::new("Go Concurrency Patterns")
            .with_id("go-concurrency")
            .with_description("Goroutines, channels and select for concurrent Go programs.")
            .with_content("Use a worker pool of goroutines reading jobs from a buffered channel.")
            .with_tags(["go", "concurrency"]),
        Skill::new("Rust Error Handling")
            .with_id("rust-errors")
            .with_description("Result, the question mark operator and thiserror enums.")
            .with_content("Propagate errors with ? instead of unwrap in library code.")
            .with_tags(["rust", "errors"]),
        Skill::new("SQLite Full Text Search")
            .with_id("sqlite-fts")
            .with_summary("FTS5 virtual tables with bm25 ranking.")
            .with_content("Create the index with the porter tokenizer to match word stems.")
            .with_tags(["sqlite", "search"]),
        Skill::new("Writing Release Notes")
            .with_id("release-notes")
            .with_description("Summarize user-facing changes for each release.")
            .with_content("Group entries by feature and link the pull requests for context."),
    ]
}
