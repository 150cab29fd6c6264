//! Embedding pipeline: moves pending skills into the vector store
//!
//! [`Indexer`] does the batched, retried work synchronously;
//! [`BackgroundIndexer`] runs it on a worker thread with at most one run per
//! instance. Both report through the same [`IndexProgress`] event.
//!
//! Progress channels belong to the consumer. Producers hold their own
//! `Sender`, never close anything they do not own, and guard every send
//! against cancellation so a consumer that stopped reading cannot block them.

use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError, select};
use serde::Serialize;

use crate::utils::CancelToken;

pub mod background;
pub mod indexer;

pub use background::{BackgroundIndexer, IndexerState};
pub use indexer::{Indexer, IndexerConfig};

/// How long a terminal event may wait for room in a full channel.
const FINAL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Progress of an indexing run.
///
/// The indexer emits one event per batch with cumulative counters; the
/// background indexer adds a start event and exactly one terminal event
/// (`running == false`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexProgress {
    pub running: bool,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Skills left untouched because the run was cancelled.
    pub skipped: usize,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl IndexProgress {
    /// Terminal event carrying only a message.
    pub fn finished(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Skills the run has dealt with so far.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.completed + self.failed
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.running
    }
}

/// Send without blocking past cancellation. Returns `false` when the event
/// was dropped because the receiver is gone or the token was cancelled
/// while the channel was full.
pub(crate) fn send_progress(
    tx: &Sender<IndexProgress>,
    progress: IndexProgress,
    cancel: &CancelToken,
) -> bool {
    match tx.try_send(progress) {
        Ok(()) => true,
        Err(TrySendError::Disconnected(_)) => false,
        Err(TrySendError::Full(progress)) => select! {
            send(tx, progress) -> sent => sent.is_ok(),
            recv(cancel.done()) -> _ => false,
        },
    }
}

/// Send a terminal event, waiting a bounded time for channel space.
pub(crate) fn send_final(tx: &Sender<IndexProgress>, progress: IndexProgress) -> bool {
    tx.send_timeout(progress, FINAL_SEND_TIMEOUT).is_ok()
}
