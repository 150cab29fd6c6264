//! Batched, retried embedding of pending skills

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, error, info, info_span, warn};

use super::{IndexProgress, send_progress};
use crate::core::{Skill, content_hash};
use crate::error::Result;
use crate::search::VectorStore;
use crate::storage::SkillStore;
use crate::utils::CancelToken;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Cap on the backoff exponent.
const MAX_BACKOFF_SHIFT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub batch_size: usize,
    /// Total attempts per batch, including the first.
    pub retry_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }
}

impl IndexerConfig {
    /// Replace zero values with defaults.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            batch_size: if self.batch_size == 0 {
                DEFAULT_BATCH_SIZE
            } else {
                self.batch_size
            },
            retry_attempts: if self.retry_attempts == 0 {
                DEFAULT_RETRY_ATTEMPTS
            } else {
                self.retry_attempts
            },
            retry_base_delay: if self.retry_base_delay.is_zero() {
                DEFAULT_RETRY_BASE_DELAY
            } else {
                self.retry_base_delay
            },
        }
    }

    /// Sleep before attempt `attempt + 1`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.retry_base_delay.saturating_mul(1 << shift)
    }
}

/// Embeds every pending skill of a store into a vector store.
pub struct Indexer {
    store: Arc<dyn SkillStore>,
    vectors: Arc<dyn VectorStore>,
    config: IndexerConfig,
    span: Span,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn SkillStore>,
        vectors: Arc<dyn VectorStore>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            vectors,
            config: config.normalized(),
            span: info_span!("indexer"),
        }
    }

    /// Log under `span` instead of the default `indexer` span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Number of skills waiting for an embedding. Store errors propagate.
    pub fn pending_count(&self) -> Result<usize> {
        self.store.count_pending_embeddings()
    }

    /// Embed all pending skills batch by batch.
    ///
    /// A batch that still fails after every retry counts as failed and the
    /// run moves on. Cancellation is only checked between batches; skills
    /// not reached are reported as skipped. Returns the final counters with
    /// `running == false`. Only a failure to list pending skills is an error.
    pub fn index_pending(
        &self,
        cancel: &CancelToken,
        progress: Option<&Sender<IndexProgress>>,
    ) -> Result<IndexProgress> {
        let _entered = self.span.enter();
        let started = Instant::now();
        let emit = |event: IndexProgress| {
            if let Some(tx) = progress {
                send_progress(tx, event, cancel);
            }
        };

        let pending = self.store.get_pending_embeddings(None)?;
        let total = pending.len();
        if total == 0 {
            debug!("no pending skills");
            let done = IndexProgress {
                duration: started.elapsed(),
                ..IndexProgress::finished("no pending skills")
            };
            emit(done.clone());
            return Ok(done);
        }

        info!(total, batch_size = self.config.batch_size, "indexing pending skills");
        let mut state = IndexProgress {
            running: true,
            total,
            ..IndexProgress::default()
        };

        for (batch_idx, batch) in pending.chunks(self.config.batch_size).enumerate() {
            if cancel.is_cancelled() {
                state.skipped = total - state.processed();
                info!(skipped = state.skipped, "indexing cancelled");
                break;
            }

            if self.add_with_retry(batch_idx, batch) {
                let (completed, failed) = self.record_hashes(batch);
                state.completed += completed;
                state.failed += failed;
            } else {
                state.failed += batch.len();
            }

            state.duration = started.elapsed();
            emit(state.clone());
        }

        state.running = false;
        state.duration = started.elapsed();
        info!(
            completed = state.completed,
            failed = state.failed,
            skipped = state.skipped,
            elapsed_ms = state.duration.as_millis() as u64,
            "indexing finished"
        );
        Ok(state)
    }

    fn add_with_retry(&self, batch_idx: usize, batch: &[Skill]) -> bool {
        let attempts = self.config.retry_attempts;
        for attempt in 1..=attempts {
            let outcome = self.vectors.add_document_batch(batch);
            if outcome.is_success() {
                debug!(batch = batch_idx, size = batch.len(), attempt, "batch stored");
                return true;
            }

            warn!(
                batch = batch_idx,
                attempt,
                attempts,
                error = %outcome.error_summary(),
                "batch embedding failed"
            );
            if attempt < attempts {
                std::thread::sleep(self.config.backoff(attempt));
            }
        }

        error!(batch = batch_idx, size = batch.len(), "batch failed after all retries");
        false
    }

    /// Write the content hash of each stored skill back to the store.
    ///
    /// A skill edited while its batch was embedding keeps an empty
    /// `embedding_id` and is picked up by the next run.
    fn record_hashes(&self, batch: &[Skill]) -> (usize, usize) {
        let mut completed = 0;
        let mut failed = 0;
        for skill in batch {
            match self.store.set_embedding_id(&skill.id, &content_hash(skill)) {
                Ok(true) => completed += 1,
                Ok(false) => {
                    debug!(skill_id = %skill.id, "skill changed or removed during indexing");
                    completed += 1;
                }
                Err(err) => {
                    warn!(skill_id = %skill.id, error = %err, "failed to record embedding");
                    failed += 1;
                }
            }
        }
        (completed, failed)
    }
}
