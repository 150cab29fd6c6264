//! In-memory [`SkillStore`] with scriptable failures.

use std::collections::HashSet;

use chrono::Utc;
use parking_lot::Mutex;

use crate::core::{Skill, content_hash};
use crate::error::{Result, SiftError};
use crate::storage::{SkillStore, StoreStats};

#[derive(Default)]
struct Inner {
    skills: Vec<Skill>,
    failing_updates: HashSet<String>,
    unavailable: bool,
    search_broken: bool,
    updates: usize,
}

/// Keeps skills in insertion order. Ranked search scores term hits, with
/// title hits weighted above body hits.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_skills(skills: impl IntoIterator<Item = Skill>) -> Self {
        let store = Self::new();
        for skill in skills {
            store.insert(skill);
        }
        store
    }

    /// Insert or replace by id.
    pub fn insert(&self, skill: Skill) {
        let mut inner = self.inner.lock();
        match inner.skills.iter_mut().find(|s| s.id == skill.id) {
            Some(existing) => *existing = skill,
            None => inner.skills.push(skill),
        }
    }

    #[must_use]
    pub fn all(&self) -> Vec<Skill> {
        self.inner.lock().skills.clone()
    }

    /// Make `set_embedding_id` fail for this id.
    pub fn fail_updates_for(&self, id: &str) {
        self.inner.lock().failing_updates.insert(id.to_string());
    }

    /// Make every operation fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// Make only `search_ranked` fail.
    pub fn set_search_broken(&self, broken: bool) {
        self.inner.lock().search_broken = broken;
    }

    /// Number of `embedding_id` writes applied.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.inner.lock().updates
    }

    fn check(inner: &Inner) -> Result<()> {
        if inner.unavailable {
            Err(SiftError::Database(rusqlite::Error::InvalidQuery))
        } else {
            Ok(())
        }
    }
}

fn term_score(skill: &Skill, terms: &[String]) -> usize {
    let title = skill.title.to_lowercase();
    let body = skill.body_text().to_lowercase();
    terms
        .iter()
        .map(|term| {
            let in_title = usize::from(title.contains(term.as_str())) * 3;
            let in_body = usize::from(body.contains(term.as_str()));
            in_title + in_body
        })
        .sum()
}

impl SkillStore for MemoryStore {
    fn count_pending_embeddings(&self) -> Result<usize> {
        let inner = self.inner.lock();
        Self::check(&inner)?;
        Ok(inner.skills.iter().filter(|s| s.is_pending()).count())
    }

    fn get_pending_embeddings(&self, limit: Option<usize>) -> Result<Vec<Skill>> {
        let inner = self.inner.lock();
        Self::check(&inner)?;
        Ok(inner
            .skills
            .iter()
            .filter(|s| s.is_pending())
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn set_embedding_id(&self, id: &str, hash: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        Self::check(&inner)?;
        if inner.failing_updates.contains(id) {
            return Err(SiftError::Database(rusqlite::Error::InvalidQuery));
        }
        let Some(existing) = inner.skills.iter_mut().find(|s| s.id == id) else {
            return Ok(false);
        };
        if content_hash(existing) != hash {
            return Ok(false);
        }
        existing.embedding_id = hash.to_string();
        inner.updates += 1;
        Ok(true)
    }

    fn get_skill(&self, id: &str) -> Result<Option<Skill>> {
        let inner = self.inner.lock();
        Self::check(&inner)?;
        Ok(inner.skills.iter().find(|s| s.id == id).cloned())
    }

    fn search_ranked(&self, query: &str, limit: usize) -> Result<Vec<Skill>> {
        let inner = self.inner.lock();
        Self::check(&inner)?;
        if inner.search_broken {
            return Err(SiftError::Database(rusqlite::Error::InvalidQuery));
        }
        let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        let mut scored: Vec<(usize, &Skill)> = inner
            .skills
            .iter()
            .map(|skill| (term_score(skill, &terms), skill))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, skill)| skill.clone())
            .collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner.lock();
        Self::check(&inner)?;
        Ok(StoreStats {
            total_skills: inner.skills.len(),
            pending: inner.skills.iter().filter(|s| s.is_pending()).count(),
            last_updated: (!inner.skills.is_empty()).then(Utc::now),
        })
    }
}
