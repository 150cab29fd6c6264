//! Non-blocking indexing on a worker thread

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{Span, debug, error, info, info_span, warn};

use super::indexer::{Indexer, IndexerConfig};
use super::{IndexProgress, send_final, send_progress};
use crate::error::{Result, SiftError};
use crate::search::VectorStore;
use crate::storage::SkillStore;
use crate::utils::CancelToken;

const WORKER_THREAD_NAME: &str = "sift-indexer";
const FORWARDER_THREAD_NAME: &str = "sift-indexer-progress";
const FORWARD_QUEUE: usize = 64;

/// Lifecycle of a background run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerState {
    #[default]
    Idle,
    Starting,
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl fmt::Display for IndexerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct RunState {
    running: bool,
    state: IndexerState,
    last_run: Option<(IndexerState, IndexProgress)>,
    cancel: Option<CancelToken>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Shared {
    run: Mutex<RunState>,
    finished: Condvar,
}

impl Shared {
    fn set_state(&self, state: IndexerState) {
        self.run.lock().state = state;
    }
}

/// Runs the [`Indexer`] off the caller's thread, one run at a time.
pub struct BackgroundIndexer {
    indexer: Arc<Indexer>,
    vectors: Arc<dyn VectorStore>,
    shared: Arc<Shared>,
    span: Span,
}

impl BackgroundIndexer {
    pub fn new(
        store: Arc<dyn SkillStore>,
        vectors: Arc<dyn VectorStore>,
        config: IndexerConfig,
    ) -> Self {
        let span = info_span!("background_indexer");
        let indexer = Indexer::new(store, Arc::clone(&vectors), config).with_span(span.clone());
        Self {
            indexer: Arc::new(indexer),
            vectors,
            shared: Arc::new(Shared::default()),
            span,
        }
    }

    #[must_use]
    pub fn with_span(self, span: Span) -> Self {
        let Self {
            indexer,
            vectors,
            shared,
            ..
        } = self;
        // Not yet shared with a worker, so the indexer can be rebuilt.
        let indexer = match Arc::try_unwrap(indexer) {
            Ok(indexer) => Arc::new(indexer.with_span(span.clone())),
            Err(shared_indexer) => shared_indexer,
        };
        Self {
            indexer,
            vectors,
            shared,
            span,
        }
    }

    /// Start a run and return immediately.
    ///
    /// Does nothing when a run is already active. The run stops when
    /// `parent` or [`stop`](Self::stop) cancels it. Progress goes to
    /// `progress`; the receiver stays with the caller.
    pub fn start(&self, parent: &CancelToken, progress: Sender<IndexProgress>) -> Result<()> {
        let _entered = self.span.enter();
        let mut run = self.shared.run.lock();
        if run.running {
            debug!("indexing already running");
            return Ok(());
        }
        if let Some(previous) = run.handle.take() {
            // The previous worker has released its guard; only the thread exit remains.
            if previous.join().is_err() {
                warn!("previous indexing worker panicked");
            }
        }

        let cancel = parent.child();
        run.running = true;
        run.state = IndexerState::Starting;
        run.cancel = Some(cancel.clone());

        let worker = Worker {
            indexer: Arc::clone(&self.indexer),
            shared: Arc::clone(&self.shared),
            cancel,
            progress,
            span: self.span.clone(),
        };
        match thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                run.handle = Some(handle);
                info!("background indexing started");
                Ok(())
            }
            Err(err) => {
                run.running = false;
                run.state = IndexerState::Idle;
                run.cancel = None;
                Err(SiftError::Thread(format!("failed to spawn indexer: {err}")))
            }
        }
    }

    /// Request cancellation of the active run. Returns immediately.
    pub fn stop(&self) {
        let run = self.shared.run.lock();
        if let Some(cancel) = &run.cancel {
            debug!(parent: &self.span, "stopping background indexing");
            cancel.cancel();
        }
    }

    /// Block until no run is active.
    pub fn wait(&self) {
        let handle = {
            let mut run = self.shared.run.lock();
            while run.running {
                self.shared.finished.wait(&mut run);
            }
            run.handle.take()
        };
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!(parent: &self.span, "indexing worker panicked");
        }
    }

    /// Stop, wait, then close the vector store.
    pub fn close(&self) -> Result<()> {
        self.stop();
        self.wait();
        self.vectors.close()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.run.lock().running
    }

    #[must_use]
    pub fn state(&self) -> IndexerState {
        self.shared.run.lock().state
    }

    /// How the most recent run ended and its final counters.
    #[must_use]
    pub fn last_run(&self) -> Option<(IndexerState, IndexProgress)> {
        self.shared.run.lock().last_run.clone()
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.indexer.pending_count()
    }
}

struct Worker {
    indexer: Arc<Indexer>,
    shared: Arc<Shared>,
    cancel: CancelToken,
    progress: Sender<IndexProgress>,
    span: Span,
}

impl Worker {
    fn run(self) {
        let mut guard = RunGuard {
            shared: Arc::clone(&self.shared),
            cancel: self.cancel.clone(),
            outcome: None,
        };
        let _entered = self.span.enter();
        self.shared.set_state(IndexerState::Running);

        let (state, summary) = self.execute();
        self.shared.set_state(state);
        if !send_final(&self.progress, summary.clone()) {
            debug!("final progress event dropped");
        }
        guard.outcome = Some((state, summary));
    }

    fn execute(&self) -> (IndexerState, IndexProgress) {
        let total = match self.indexer.pending_count() {
            Ok(0) => {
                info!("no pending skills");
                return (
                    IndexerState::Completed,
                    IndexProgress::finished("no pending skills"),
                );
            }
            Ok(total) => total,
            Err(err) => {
                error!(error = %err, "failed to count pending skills");
                return (
                    IndexerState::Failed,
                    IndexProgress::finished(format!("indexing failed: {err}")),
                );
            }
        };

        send_progress(
            &self.progress,
            IndexProgress {
                running: true,
                total,
                message: "indexing started".to_string(),
                ..IndexProgress::default()
            },
            &self.cancel,
        );

        let (forward_tx, forward_rx) = bounded::<IndexProgress>(FORWARD_QUEUE);
        let consumer = self.progress.clone();
        let cancel = self.cancel.clone();
        let forwarder = thread::Builder::new()
            .name(FORWARDER_THREAD_NAME.to_string())
            .spawn(move || {
                for event in forward_rx {
                    // Terminal events belong to the worker.
                    if !event.running {
                        continue;
                    }
                    let message = format!("indexed {}/{}", event.processed(), event.total);
                    send_progress(&consumer, IndexProgress { message, ..event }, &cancel);
                }
            });
        let forwarder = match forwarder {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "progress forwarding unavailable");
                None
            }
        };

        let result = self
            .indexer
            .index_pending(&self.cancel, forwarder.as_ref().map(|_| &forward_tx));
        drop(forward_tx);
        if let Some(handle) = forwarder
            && handle.join().is_err()
        {
            warn!("progress forwarder panicked");
        }

        match result {
            Ok(summary) if self.cancel.is_cancelled() => {
                let message = format!(
                    "indexing cancelled: {}/{} indexed",
                    summary.completed, summary.total
                );
                (IndexerState::Cancelled, IndexProgress { message, ..summary })
            }
            Ok(summary) => {
                let message = format!(
                    "indexed {}/{} ({} failed)",
                    summary.completed, summary.total, summary.failed
                );
                (IndexerState::Completed, IndexProgress { message, ..summary })
            }
            Err(err) => {
                error!(error = %err, "indexing failed");
                (
                    IndexerState::Failed,
                    IndexProgress {
                        total,
                        ..IndexProgress::finished(format!("indexing failed: {err}"))
                    },
                )
            }
        }
    }
}

/// Returns the instance to `Idle` however the worker exits.
struct RunGuard {
    shared: Arc<Shared>,
    cancel: CancelToken,
    outcome: Option<(IndexerState, IndexProgress)>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or_else(|| {
            (
                IndexerState::Failed,
                IndexProgress::finished("indexing worker panicked"),
            )
        });
        {
            let mut run = self.shared.run.lock();
            run.running = false;
            run.state = IndexerState::Idle;
            run.last_run = Some(outcome);
            run.cancel = None;
        }
        // Releases anything still selecting on the run's token.
        self.cancel.cancel();
        self.shared.finished.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Skill;
    use crate::test_utils::{MemoryStore, MockVectorStore};
    use crossbeam_channel::unbounded;
    use std::time::{Duration, Instant};

    fn seeded_store(count: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..count {
            store.insert(Skill::new(format!("Skill {i}")).with_id(format!("s{i}")));
        }
        store
    }

    fn config(batch_size: usize) -> IndexerConfig {
        IndexerConfig {
            batch_size,
            retry_attempts: 1,
            retry_base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_start_returns_quickly_and_is_exclusive() {
        let store = seeded_store(6);
        let vectors = Arc::new(MockVectorStore::new().with_delay(Duration::from_millis(100)));
        let background = BackgroundIndexer::new(store.clone(), vectors.clone(), config(2));
        let (tx, rx) = unbounded();

        let started = Instant::now();
        background.start(&CancelToken::new(), tx.clone()).unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(background.is_running());

        background.start(&CancelToken::new(), tx).unwrap();
        background.wait();

        assert!(!background.is_running());
        assert_eq!(background.state(), IndexerState::Idle);
        assert_eq!(vectors.batch_calls(), 3);
        assert_eq!(store.count_pending_embeddings().unwrap(), 0);

        let events: Vec<_> = rx.try_iter().collect();
        let terminal: Vec<_> = events.iter().filter(|e| !e.running).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].completed, 6);
        assert!(events[0].running);
        assert_eq!(events[0].total, 6);
    }

    #[test]
    fn test_concurrent_starts_launch_one_run() {
        let store = seeded_store(8);
        let vectors = Arc::new(MockVectorStore::new().with_delay(Duration::from_millis(50)));
        let background = BackgroundIndexer::new(store.clone(), vectors.clone(), config(2));
        let (tx, rx) = unbounded();
        let cancel = CancelToken::new();
        let barrier = std::sync::Barrier::new(8);

        thread::scope(|scope| {
            for _ in 0..8 {
                let tx = tx.clone();
                scope.spawn(|| {
                    barrier.wait();
                    background.start(&cancel, tx).unwrap();
                });
            }
        });
        drop(tx);
        background.wait();

        assert_eq!(vectors.batch_calls(), 4);
        assert_eq!(store.count_pending_embeddings().unwrap(), 0);
        let events: Vec<_> = rx.try_iter().collect();
        let starts = events.iter().filter(|e| e.message == "indexing started").count();
        assert_eq!(starts, 1);
        assert_eq!(events.iter().filter(|e| !e.running).count(), 1);
    }

    #[test]
    fn test_stop_ends_run_between_batches() {
        let store = seeded_store(20);
        let vectors = Arc::new(MockVectorStore::new().with_delay(Duration::from_millis(30)));
        let background = BackgroundIndexer::new(store, vectors.clone(), config(1));
        let (tx, rx) = unbounded();

        background.start(&CancelToken::new(), tx).unwrap();
        thread::sleep(Duration::from_millis(40));
        let stopped = Instant::now();
        background.stop();
        background.stop();
        background.wait();
        assert!(stopped.elapsed() < Duration::from_millis(500));

        let (state, summary) = background.last_run().unwrap();
        assert_eq!(state, IndexerState::Cancelled);
        assert!(summary.skipped > 0);
        assert!(vectors.batch_calls() < 20);
        let last = rx.try_iter().last().unwrap();
        assert!(!last.running);
    }

    #[test]
    fn test_parent_cancel_propagates() {
        let store = seeded_store(20);
        let vectors = Arc::new(MockVectorStore::new().with_delay(Duration::from_millis(20)));
        let background = BackgroundIndexer::new(store, vectors, config(1));
        let parent = CancelToken::new();
        let (tx, _rx) = unbounded();

        background.start(&parent, tx).unwrap();
        parent.cancel();
        background.wait();
        assert_eq!(background.last_run().unwrap().0, IndexerState::Cancelled);
    }

    #[test]
    fn test_nothing_pending_emits_single_terminal_event() {
        let background = BackgroundIndexer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockVectorStore::new()),
            config(10),
        );
        let (tx, rx) = unbounded();
        background.start(&CancelToken::new(), tx).unwrap();
        background.wait();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(!events[0].running);
        assert_eq!(events[0].message, "no pending skills");
    }

    #[test]
    fn test_count_error_reports_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let background =
            BackgroundIndexer::new(store, Arc::new(MockVectorStore::new()), config(10));
        let (tx, rx) = unbounded();
        background.start(&CancelToken::new(), tx).unwrap();
        background.wait();

        let event = rx.try_recv().unwrap();
        assert!(!event.running);
        assert!(event.message.starts_with("indexing failed"));
        assert_eq!(background.last_run().unwrap().0, IndexerState::Failed);
    }

    #[test]
    fn test_dropped_receiver_does_not_block() {
        let store = seeded_store(4);
        let background = BackgroundIndexer::new(store, Arc::new(MockVectorStore::new()), config(1));
        let (tx, rx) = bounded(1);
        drop(rx);
        background.start(&CancelToken::new(), tx).unwrap();
        background.wait();
        assert_eq!(background.last_run().unwrap().1.completed, 4);
    }

    #[test]
    fn test_close_closes_vector_store_and_can_restart_before() {
        let store = seeded_store(2);
        let vectors = Arc::new(MockVectorStore::new());
        let background = BackgroundIndexer::new(store.clone(), vectors.clone(), config(10));

        let (tx, _rx) = unbounded();
        background.start(&CancelToken::new(), tx.clone()).unwrap();
        background.wait();
        store.insert(Skill::new("Late").with_id("late"));
        background.start(&CancelToken::new(), tx).unwrap();
        background.wait();
        assert_eq!(store.count_pending_embeddings().unwrap(), 0);

        background.close().unwrap();
        background.close().unwrap();
        assert!(vectors.is_closed());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(IndexerState::Cancelled.to_string(), "cancelled");
        assert_eq!(IndexerState::default().to_string(), "idle");
    }
}
