//! Query-time fan-out over semantic and lexical search
//!
//! Semantic hits are processed first, so a skill found by both methods keeps
//! its semantic score and classification. Sub-search failures are logged and
//! treated as zero hits; the caller always gets a result for a well-formed
//! query.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{Span, debug, info_span, warn};

use crate::core::{Skill, content_hash};
use crate::error::{Result, SiftError};
use crate::search::snippet::{self, Snippet};
use crate::search::vector::VectorStore;
use crate::storage::SkillStore;

pub const DEFAULT_MIN_SIMILARITY: f32 = 0.6;
pub const DEFAULT_MAX_RESULTS: usize = 50;

/// Score given to lexical hits, which carry no comparable similarity.
pub const LEXICAL_SCORE: f32 = 0.5;

/// Query terms shorter than this never make a title match on their own.
const MIN_TITLE_TERM_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchServiceConfig {
    pub min_similarity: f32,
    pub max_results: usize,
    pub max_snippets: usize,
}

impl Default for SearchServiceConfig {
    fn default() -> Self {
        Self {
            min_similarity: DEFAULT_MIN_SIMILARITY,
            max_results: DEFAULT_MAX_RESULTS,
            max_snippets: snippet::DEFAULT_MAX_SNIPPETS,
        }
    }
}

impl SearchServiceConfig {
    /// Replace non-positive values with defaults.
    #[must_use]
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            min_similarity: if self.min_similarity > 0.0 {
                self.min_similarity
            } else {
                defaults.min_similarity
            },
            max_results: if self.max_results > 0 {
                self.max_results
            } else {
                defaults.max_results
            },
            max_snippets: if self.max_snippets > 0 {
                self.max_snippets
            } else {
                defaults.max_snippets
            },
        }
    }
}

/// Per-query options. Zero `limit` and a `None` or non-positive threshold
/// use the service configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    pub threshold: Option<f32>,
    pub include_fts: bool,
    pub include_semantic: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 0,
            threshold: None,
            include_fts: true,
            include_semantic: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Title,
    Content,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub skill: Skill,
    pub score: f32,
    pub match_type: MatchType,
    /// Empty for title matches.
    pub snippets: Vec<Snippet>,
}

/// Combined results. A skill id appears at most once across both lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub title_matches: Vec<Match>,
    pub content_matches: Vec<Match>,
    pub query: String,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub total_hits: usize,
}

impl SearchResults {
    /// Title matches followed by content matches.
    pub fn iter(&self) -> impl Iterator<Item = &Match> {
        self.title_matches.iter().chain(&self.content_matches)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub total_skills: usize,
    pub pending: usize,
    /// `None` when the vector store could not report a count.
    pub indexed_vectors: Option<i64>,
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

pub struct SearchService {
    store: Arc<dyn SkillStore>,
    vectors: Option<Arc<dyn VectorStore>>,
    config: SearchServiceConfig,
    span: Span,
}

impl SearchService {
    pub fn new(
        store: Arc<dyn SkillStore>,
        vectors: Option<Arc<dyn VectorStore>>,
        config: SearchServiceConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            config: config.normalized(),
            span: info_span!("search"),
        }
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &SearchServiceConfig {
        &self.config
    }

    /// Run the enabled sub-searches and merge them by first-seen id.
    ///
    /// Fails only for a threshold that is NaN or above 1.0.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResults> {
        let _entered = self.span.enter();
        let started = Instant::now();

        let threshold = match options.threshold {
            Some(t) if t.is_nan() || t > 1.0 => {
                return Err(SiftError::InvalidArgument(format!(
                    "similarity threshold {t} is outside [0, 1]"
                )));
            }
            Some(t) if t > 0.0 => t,
            _ => self.config.min_similarity,
        };
        let limit = if options.limit == 0 {
            self.config.max_results
        } else {
            options.limit
        };

        let mut results = SearchResults {
            query: query.to_string(),
            ..SearchResults::default()
        };
        let mut seen = HashSet::new();

        if options.include_semantic
            && let Some(vectors) = &self.vectors
        {
            let hits = vectors.search(query, limit, threshold).unwrap_or_else(|err| {
                warn!(error = %err, "semantic search failed");
                Vec::new()
            });
            for hit in hits {
                if !seen.insert(hit.skill_id.clone()) {
                    continue;
                }
                match self.store.get_skill(&hit.skill_id) {
                    Ok(Some(skill)) => self.push(&mut results, skill, query, hit.score),
                    Ok(None) => debug!(skill_id = %hit.skill_id, "stale vector hit"),
                    Err(err) => warn!(skill_id = %hit.skill_id, error = %err, "failed to load skill"),
                }
            }
        }

        if options.include_fts {
            let skills = self.store.search_ranked(query, limit).unwrap_or_else(|err| {
                warn!(error = %err, "full-text search failed");
                Vec::new()
            });
            for skill in skills {
                if seen.insert(skill.id.clone()) {
                    self.push(&mut results, skill, query, LEXICAL_SCORE);
                }
            }
        }

        results.total_hits = results.title_matches.len() + results.content_matches.len();
        results.duration = started.elapsed();
        debug!(
            hits = results.total_hits,
            titles = results.title_matches.len(),
            elapsed_us = results.duration.as_micros() as u64,
            "search finished"
        );
        Ok(results)
    }

    fn push(&self, results: &mut SearchResults, skill: Skill, query: &str, score: f32) {
        match classify(&skill, query) {
            MatchType::Title => results.title_matches.push(Match {
                skill,
                score,
                match_type: MatchType::Title,
                snippets: Vec::new(),
            }),
            MatchType::Content => {
                let snippets = snippet::extract(&skill.body_text(), query, self.config.max_snippets);
                results.content_matches.push(Match {
                    skill,
                    score,
                    match_type: MatchType::Content,
                    snippets,
                });
            }
        }
    }

    /// Embed one skill and record its hash if it changed.
    pub fn index_skill(&self, skill: &Skill) -> Result<String> {
        let _entered = self.span.enter();
        let vectors = self.require_vectors()?;
        let hash = vectors.add_document(skill)?;
        if hash != skill.embedding_id {
            self.store.set_embedding_id(&skill.id, &hash)?;
        }
        Ok(hash)
    }

    /// Embed a batch atomically, then record changed hashes.
    pub fn index_skill_batch(&self, skills: &[Skill]) -> Result<usize> {
        let _entered = self.span.enter();
        let vectors = self.require_vectors()?;
        let outcome = vectors.add_document_batch(skills);
        if !outcome.is_success() {
            return Err(SiftError::VectorStore(outcome.error_summary()));
        }
        for skill in skills {
            let hash = content_hash(skill);
            if hash != skill.embedding_id {
                self.store.set_embedding_id(&skill.id, &hash)?;
            }
        }
        Ok(outcome.added)
    }

    pub fn stats(&self) -> Result<SearchStats> {
        let store = self.store.stats()?;
        let indexed_vectors = self.vectors.as_ref().and_then(|vectors| {
            vectors
                .count()
                .map_err(|err| warn!(parent: &self.span, error = %err, "vector count failed"))
                .ok()
        });
        Ok(SearchStats {
            total_skills: store.total_skills,
            pending: store.pending,
            indexed_vectors,
            last_updated: store.last_updated,
        })
    }

    fn require_vectors(&self) -> Result<&Arc<dyn VectorStore>> {
        self.vectors
            .as_ref()
            .ok_or_else(|| SiftError::MissingConfig("no vector store configured".to_string()))
    }
}

/// Title match when the query, or any term of at least three characters,
/// occurs in the title or a tag name or slug.
#[must_use]
pub fn classify(skill: &Skill, query: &str) -> MatchType {
    let query = query.to_lowercase();
    let mut needles = vec![query.as_str()];
    needles.extend(
        query
            .split_whitespace()
            .filter(|term| term.chars().count() >= MIN_TITLE_TERM_CHARS),
    );
    needles.retain(|needle| !needle.is_empty());

    let mut haystacks = vec![skill.title.to_lowercase()];
    for tag in &skill.tags {
        haystacks.push(tag.name.to_lowercase());
        haystacks.push(tag.slug.to_lowercase());
    }

    let hit = haystacks
        .iter()
        .any(|haystack| needles.iter().any(|needle| haystack.contains(needle)));
    if hit { MatchType::Title } else { MatchType::Content }
}
