//! Storage layer for skillsift
//!
//! The persistent skill store owns the documents and provides ranked lexical
//! search. The indexing and search layers only depend on the [`SkillStore`]
//! contract; [`Database`] is the SQLite implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::Skill;
use crate::error::Result;

pub mod migrations;
pub mod sqlite;

pub use sqlite::Database;

/// Aggregate counters reported by a skill store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_skills: usize,
    pub pending: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Persistent document store consumed by the indexer and search service.
///
/// Implementations must tolerate concurrent reads while a write from the
/// background indexer is in progress.
pub trait SkillStore: Send + Sync {
    /// Number of skills without an embedding.
    fn count_pending_embeddings(&self) -> Result<usize>;

    /// Skills without an embedding, oldest first. `None` returns all of them.
    fn get_pending_embeddings(&self, limit: Option<usize>) -> Result<Vec<Skill>>;

    /// Record `hash` as the skill's `embedding_id`, touching no other field.
    ///
    /// Applied only while the stored content still hashes to `hash`.
    /// Returns `false` when the skill is gone or was edited since it was read,
    /// in which case it stays pending.
    fn set_embedding_id(&self, id: &str, hash: &str) -> Result<bool>;

    /// Fetch a skill with its tags; `Ok(None)` when it does not exist.
    fn get_skill(&self, id: &str) -> Result<Option<Skill>>;

    /// Ranked full-text search, best match first.
    fn search_ranked(&self, query: &str, limit: usize) -> Result<Vec<Skill>>;

    fn stats(&self) -> Result<StoreStats>;
}
