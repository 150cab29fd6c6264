//! Scripted [`VectorStore`] for indexing and search tests.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{Skill, content_hash};
use crate::error::{Result, SiftError};
use crate::search::{BatchOutcome, SearchHit, VectorStore};

#[derive(Default)]
struct Inner {
    fail_first: usize,
    delay: Duration,
    hits: Vec<SearchHit>,
    search_error: bool,
    batch_sizes: Vec<usize>,
    ids: HashSet<String>,
    closed: bool,
}

/// Records every batch it receives and answers searches from preset hits.
#[derive(Default)]
pub struct MockVectorStore {
    inner: Mutex<Inner>,
}

impl MockVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` batch calls.
    #[must_use]
    pub fn fail_first_batches(self, n: usize) -> Self {
        self.inner.lock().fail_first = n;
        self
    }

    /// Sleep this long inside every batch call.
    #[must_use]
    pub fn with_delay(self, delay: Duration) -> Self {
        self.inner.lock().delay = delay;
        self
    }

    /// Hits returned by `search`, before threshold and limit.
    #[must_use]
    pub fn with_hits(self, hits: Vec<SearchHit>) -> Self {
        self.inner.lock().hits = hits;
        self
    }

    #[must_use]
    pub fn failing_search(self) -> Self {
        self.inner.lock().search_error = true;
        self
    }

    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().batch_sizes.clone()
    }

    #[must_use]
    pub fn batch_calls(&self) -> usize {
        self.inner.lock().batch_sizes.len()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().ids.contains(id)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Hit shorthand for tests.
#[must_use]
pub fn hit(skill_id: &str, score: f32) -> SearchHit {
    SearchHit {
        skill_id: skill_id.to_string(),
        score,
        content_hash: String::new(),
    }
}

impl VectorStore for MockVectorStore {
    fn add_document(&self, skill: &Skill) -> Result<String> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SiftError::StoreClosed);
        }
        inner.ids.insert(skill.id.clone());
        Ok(content_hash(skill))
    }

    fn add_document_batch(&self, skills: &[Skill]) -> BatchOutcome {
        let (delay, call) = {
            let mut inner = self.inner.lock();
            inner.batch_sizes.push(skills.len());
            (inner.delay, inner.batch_sizes.len())
        };
        // Sleep without the lock so searches and counters stay responsive.
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut inner = self.inner.lock();
        if inner.closed {
            return BatchOutcome::failed(vec![SiftError::StoreClosed]);
        }
        if call <= inner.fail_first {
            return BatchOutcome::failed(vec![SiftError::Embedding(format!(
                "scripted failure {call}"
            ))]);
        }
        inner.ids.extend(skills.iter().map(|s| s.id.clone()));
        BatchOutcome::added(skills.len())
    }

    fn search(&self, _query: &str, limit: usize, threshold: f32) -> Result<Vec<SearchHit>> {
        let inner = self.inner.lock();
        if inner.search_error {
            return Err(SiftError::VectorStore("scripted search failure".to_string()));
        }
        Ok(inner
            .hits
            .iter()
            .filter(|h| h.score >= threshold)
            .take(limit)
            .cloned()
            .collect())
    }

    fn delete(&self, skill_id: &str) -> Result<()> {
        self.inner.lock().ids.remove(skill_id);
        Ok(())
    }

    fn count(&self) -> Result<i64> {
        let inner = self.inner.lock();
        if inner.search_error {
            return Err(SiftError::VectorStore("scripted count failure".to_string()));
        }
        Ok(i64::try_from(inner.ids.len()).unwrap_or(i64::MAX))
    }

    fn close(&self) -> Result<()> {
        self.inner.lock().closed = true;
        Ok(())
    }
}
