//! Vector store contract and the hash-embedding implementation
//!
//! Callers hand whole skills to the store; embedding happens inside. The
//! default [`HashVectorStore`] keeps vectors in memory for scoring and can
//! persist them to SQLite as f16 blobs so that an index built by one process
//! is searchable by the next.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use half::f16;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{Skill, hash, prepare, truncate};
use crate::error::{Result, SiftError};
use crate::search::embeddings::{Embedder, cosine_similarity};

/// Default token budget for embedded text.
pub const DEFAULT_MAX_TOKENS: usize = 8000;

/// A scored reference to a skill returned by [`VectorStore::search`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub skill_id: String,
    /// Cosine similarity clamped to `[0, 1]`.
    pub score: f32,
    pub content_hash: String,
}

/// Result of a batch write. A batch is stored entirely or not at all, so a
/// non-empty `errors` means nothing from the batch was stored.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub added: usize,
    pub errors: Vec<SiftError>,
}

impl BatchOutcome {
    #[must_use]
    pub const fn added(added: usize) -> Self {
        Self {
            added,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub const fn failed(errors: Vec<SiftError>) -> Self {
        Self { added: 0, errors }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Error messages joined for logging.
    #[must_use]
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Pluggable embedding + similarity backend.
///
/// Implementations must allow `search` while a batch write is in progress;
/// writes become visible at batch granularity.
pub trait VectorStore: Send + Sync {
    /// Embed and store one skill, returning its content hash.
    fn add_document(&self, skill: &Skill) -> Result<String>;

    /// Embed and store a batch atomically.
    fn add_document_batch(&self, skills: &[Skill]) -> BatchOutcome;

    /// Hits with `score >= threshold`, best first, at most `limit`.
    fn search(&self, query: &str, limit: usize, threshold: f32) -> Result<Vec<SearchHit>>;

    fn delete(&self, skill_id: &str) -> Result<()>;

    fn count(&self) -> Result<i64>;

    /// Release resources. Calling it again is a no-op.
    fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredVector {
    content_hash: String,
    vector: Vec<f32>,
}

/// Vector store backed by an [`Embedder`], scored by brute-force cosine.
pub struct HashVectorStore {
    embedder: Arc<dyn Embedder>,
    max_tokens: usize,
    entries: RwLock<HashMap<String, StoredVector>>,
    db: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

impl HashVectorStore {
    /// Store that lives only in memory.
    pub fn in_memory(embedder: Arc<dyn Embedder>, max_tokens: usize) -> Self {
        Self {
            embedder,
            max_tokens: normalize_max_tokens(max_tokens),
            entries: RwLock::new(HashMap::new()),
            db: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Store persisted to an SQLite file, loading existing vectors.
    ///
    /// Vectors recorded with a different dimension than the embedder are
    /// ignored.
    pub fn open(
        path: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
        max_tokens: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS skill_vectors (
                 skill_id TEXT PRIMARY KEY,
                 content_hash TEXT NOT NULL,
                 dims INTEGER NOT NULL,
                 vector BLOB NOT NULL
             );",
        )?;

        let dims = embedder.dims();
        let mut entries = HashMap::new();
        let mut skipped = 0usize;
        {
            let mut stmt =
                conn.prepare("SELECT skill_id, content_hash, dims, vector FROM skill_vectors")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?;
            for row in rows {
                let (skill_id, content_hash, stored_dims, blob) = row?;
                if usize::try_from(stored_dims).ok() != Some(dims) || blob.len() != dims * 2 {
                    skipped += 1;
                    continue;
                }
                entries.insert(
                    skill_id,
                    StoredVector {
                        content_hash,
                        vector: decode_vector(&blob),
                    },
                );
            }
        }
        if skipped > 0 {
            warn!(skipped, dims, "ignored vectors with mismatched dimensions");
        }
        info!(path = %path.display(), loaded = entries.len(), "opened vector store");

        Ok(Self {
            embedder,
            max_tokens: normalize_max_tokens(max_tokens),
            entries: RwLock::new(entries),
            db: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(SiftError::StoreClosed)
        } else {
            Ok(())
        }
    }

    fn embed_skill(&self, skill: &Skill) -> Result<(String, StoredVector)> {
        let text = prepare(skill);
        let content_hash = hash(&text);
        let vector = self.embedder.embed(truncate(&text, self.max_tokens))?;
        Ok((
            skill.id.clone(),
            StoredVector {
                content_hash,
                vector,
            },
        ))
    }

    /// Persist then publish. The in-memory map only changes after the SQL
    /// transaction has committed.
    fn store(&self, batch: Vec<(String, StoredVector)>) -> Result<usize> {
        let mut db = self.db.lock();
        if let Some(conn) = db.as_mut() {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO skill_vectors (skill_id, content_hash, dims, vector)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (skill_id, stored) in &batch {
                    stmt.execute(params![
                        skill_id,
                        stored.content_hash,
                        stored.vector.len() as i64,
                        encode_vector(&stored.vector),
                    ])?;
                }
            }
            tx.commit()?;
        }

        let added = batch.len();
        let mut entries = self.entries.write();
        entries.extend(batch);
        Ok(added)
    }
}

impl VectorStore for HashVectorStore {
    fn add_document(&self, skill: &Skill) -> Result<String> {
        self.ensure_open()?;
        let (skill_id, stored) = self.embed_skill(skill)?;
        let content_hash = stored.content_hash.clone();
        self.store(vec![(skill_id, stored)])?;
        Ok(content_hash)
    }

    fn add_document_batch(&self, skills: &[Skill]) -> BatchOutcome {
        if let Err(err) = self.ensure_open() {
            return BatchOutcome::failed(vec![err]);
        }
        if skills.is_empty() {
            return BatchOutcome::added(0);
        }

        let (embedded, errors): (Vec<_>, Vec<_>) = skills
            .par_iter()
            .map(|skill| self.embed_skill(skill))
            .partition(Result::is_ok);

        if !errors.is_empty() {
            let errors: Vec<SiftError> = errors.into_iter().filter_map(Result::err).collect();
            debug!(failed = errors.len(), batch = skills.len(), "batch embedding failed");
            return BatchOutcome::failed(errors);
        }

        let batch: Vec<_> = embedded.into_iter().filter_map(Result::ok).collect();
        match self.store(batch) {
            Ok(added) => BatchOutcome::added(added),
            Err(err) => BatchOutcome::failed(vec![err]),
        }
    }

    fn search(&self, query: &str, limit: usize, threshold: f32) -> Result<Vec<SearchHit>> {
        self.ensure_open()?;
        let query_vector = self.embedder.embed(truncate(query, self.max_tokens))?;

        let mut hits: Vec<SearchHit> = {
            let entries = self.entries.read();
            entries
                .iter()
                .map(|(skill_id, stored)| SearchHit {
                    skill_id: skill_id.clone(),
                    score: cosine_similarity(&query_vector, &stored.vector).clamp(0.0, 1.0),
                    content_hash: stored.content_hash.clone(),
                })
                .filter(|hit| hit.score >= threshold)
                .collect()
        };

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.skill_id.cmp(&b.skill_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn delete(&self, skill_id: &str) -> Result<()> {
        self.ensure_open()?;
        let db = self.db.lock();
        if let Some(conn) = db.as_ref() {
            conn.execute("DELETE FROM skill_vectors WHERE skill_id = ?1", [skill_id])?;
        }
        self.entries.write().remove(skill_id);
        Ok(())
    }

    fn count(&self) -> Result<i64> {
        self.ensure_open()?;
        Ok(i64::try_from(self.entries.read().len()).unwrap_or(i64::MAX))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(conn) = self.db.lock().take() {
            conn.close().map_err(|(_, err)| SiftError::Database(err))?;
        }
        debug!("vector store closed");
        Ok(())
    }
}

const fn normalize_max_tokens(max_tokens: usize) -> usize {
    if max_tokens == 0 {
        DEFAULT_MAX_TOKENS
    } else {
        max_tokens
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector
        .iter()
        .flat_map(|value| f16::from_f32(*value).to_le_bytes())
        .collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(2)
        .map(|pair| f16::from_le_bytes([pair[0], pair[1]]).to_f32())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::embeddings::HashEmbedder;
    use tempfile::tempdir;

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("boom") {
                Err(SiftError::Embedding("refused".to_string()))
            } else {
                HashEmbedder::new(8).embed(text)
            }
        }

        fn dims(&self) -> usize {
            8
        }
    }

    fn store() -> HashVectorStore {
        HashVectorStore::in_memory(Arc::new(HashEmbedder::new(128)), 0)
    }

    fn skill(id: &str, title: &str) -> Skill {
        Skill::new(title).with_id(id)
    }

    #[test]
    fn test_add_search_count_delete() {
        let store = store();
        let s = skill("go", "goroutines and channels");
        let content_hash = store.add_document(&s).unwrap();
        assert_eq!(content_hash, crate::core::content_hash(&s));
        store.add_document(&skill("py", "pandas dataframes")).unwrap();
        assert_eq!(store.count().unwrap(), 2);

        let hits = store.search("goroutines channels", 10, 0.1).unwrap();
        assert_eq!(hits[0].skill_id, "go");
        assert_eq!(hits[0].content_hash, content_hash);

        store.delete("go").unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_search_threshold_sort_and_limit() {
        let store = store();
        let outcome = store.add_document_batch(&[
            skill("a", "rust async tokio runtime"),
            skill("b", "rust async"),
            skill("c", "sourdough bread"),
        ]);
        assert_eq!(outcome.added, 3);

        let all = store.search("rust async", 10, 0.0).unwrap();
        assert!(all.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(all.iter().all(|hit| (0.0..=1.0).contains(&hit.score)));

        let filtered = store.search("rust async", 10, 0.3).unwrap();
        assert!(filtered.iter().all(|hit| hit.score >= 0.3));
        assert!(!filtered.iter().any(|hit| hit.skill_id == "c"));

        assert_eq!(store.search("rust async", 1, 0.0).unwrap().len(), 1);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let store = HashVectorStore::in_memory(Arc::new(FailingEmbedder), 0);
        let outcome = store.add_document_batch(&[skill("ok", "fine"), skill("bad", "boom")]);
        assert!(!outcome.is_success());
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(store.count().unwrap(), 0);

        let outcome = store.add_document_batch(&[skill("ok", "fine")]);
        assert!(outcome.is_success());
        assert_eq!(outcome.added, 1);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        {
            let store = HashVectorStore::open(&path, Arc::clone(&embedder), 0).unwrap();
            store.add_document(&skill("a", "kubernetes operators")).unwrap();
            store.close().unwrap();
        }

        let store = HashVectorStore::open(&path, Arc::clone(&embedder), 0).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        let hits = store.search("kubernetes operators", 5, 0.5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].score > 0.95);

        let resized = HashVectorStore::open(&path, Arc::new(HashEmbedder::new(32)), 0).unwrap();
        assert_eq!(resized.count().unwrap(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = store();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.count(), Err(SiftError::StoreClosed)));
        assert!(!store.add_document_batch(&[skill("a", "b")]).is_success());
    }

    #[test]
    fn test_concurrent_search_during_batch_writes() {
        let store = Arc::new(store());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for batch in 0..20 {
                    let skills: Vec<_> = (0..10)
                        .map(|i| skill(&format!("s{batch}-{i}"), "parallel indexing"))
                        .collect();
                    assert!(store.add_document_batch(&skills).is_success());
                }
            })
        };

        for _ in 0..50 {
            let count = store.count().unwrap();
            assert!(count >= 0 && count % 10 == 0);
            store.search("parallel indexing", 5, 0.0).unwrap();
        }
        writer.join().unwrap();
        assert_eq!(store.count().unwrap(), 200);
    }

    #[test]
    fn test_vector_encoding() {
        let vector = vec![0.5, -0.25, 0.0, 1.0];
        assert_eq!(decode_vector(&encode_vector(&vector)), vector);
    }
}
