//! Serial queues: at-most-one-at-a-time executors.
//!
//! A [`SerialQueue`] is a dedicated task draining an unbounded channel of
//! jobs. Jobs run strictly in submission order and never overlap, which is
//! the whole concurrency discipline of the connection layer: state touched
//! only from one queue needs no lock.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, oneshot};

type Job = BoxFuture<'static, ()>;

/// A FIFO executor with at-most-one-at-a-time semantics.
///
/// Cheap to clone; the backing task exits when the last handle is dropped
/// and all queued jobs have run.
#[derive(Clone)]
pub struct SerialQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    tx: mpsc::UnboundedSender<Job>,
    label: String,
}

impl SerialQueue {
    /// Create a queue and spawn its worker task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self {
            inner: Arc::new(QueueInner { tx, label }),
        }
    }

    /// Queue label, for diagnostics.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Enqueue an async job. Returns immediately.
    pub fn dispatch<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.tx.send(fut.boxed()).is_err() {
            tracing::trace!(queue = %self.inner.label, "dispatch on drained queue");
        }
    }

    /// Enqueue a synchronous job. Returns immediately.
    pub fn dispatch_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch(async move { f() });
    }

    /// Wait until every job enqueued before this call has finished.
    ///
    /// Because the queue is serial this doubles as a send barrier: a job
    /// submitted after `barrier().await` returns observes the effects of
    /// everything submitted before it.
    pub async fn barrier(&self) {
        let (tx, rx) = oneshot::channel();
        self.dispatch(async move {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.inner.label)
            .finish()
    }
}
