//! Cooperative cancellation shared between threads

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

/// Cancellation flag that can also be waited on in `crossbeam_channel::select!`.
///
/// Cancelling a token cancels every token derived from it with
/// [`CancelToken::child`]. Cloning shares the same flag.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    // Dropped on cancel, which disconnects `done_rx`.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    children: Mutex<Vec<CancelToken>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let (done_tx, done_rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                done_tx: Mutex::new(Some(done_tx)),
                done_rx,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Cancel this token and all of its children. Repeated calls are no-ops.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.done_tx.lock().take();
        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children {
            child.cancel();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// New token cancelled together with this one, but cancellable on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        let mut children = self.inner.children.lock();
        if self.is_cancelled() {
            drop(children);
            child.cancel();
        } else {
            children.retain(|existing| !existing.is_cancelled());
            children.push(child.clone());
        }
        child
    }

    /// Receiver that becomes ready (disconnected) once the token is cancelled.
    #[must_use]
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done_rx
    }
}
