//! Cancellable readiness sources.
//!
//! A [`Source`] owns the task that pulls frames off a port and hands them to
//! the connection layer. Cancellation stops the loop and runs a teardown
//! callback exactly once; the teardown is where the owner closes the port
//! and unwinds connection state. Delivery can be gated with counted
//! suspend/resume without dropping the underlying task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// Handle to a spawned readiness loop.
///
/// Dropping the last handle signals cancellation as well, so a source never
/// outlives its owner.
#[derive(Clone)]
pub struct Source {
    inner: Arc<SourceShared>,
}

struct SourceShared {
    cancel_tx: watch::Sender<bool>,
    gate_tx: watch::Sender<u32>,
    cancelled: AtomicBool,
    label: String,
}

/// The view of a [`Source`] handed to its loop body.
pub struct SourceActivity {
    cancel_rx: watch::Receiver<bool>,
    gate_rx: watch::Receiver<u32>,
}

impl SourceActivity {
    /// Wait until delivery is permitted (suspend count zero).
    ///
    /// Returns `false` once the source is cancelled; the loop body must then
    /// return so teardown can run.
    pub async fn ready(&mut self) -> bool {
        loop {
            if *self.cancel_rx.borrow() {
                return false;
            }
            let gate_ok = tokio::select! {
                gate = self.gate_rx.wait_for(|count| *count == 0) => gate.is_ok(),
                cancelled = self.cancel_rx.wait_for(|c| *c) => {
                    let _ = cancelled;
                    return false;
                }
            };
            if gate_ok && !*self.cancel_rx.borrow() {
                return true;
            }
            if !gate_ok {
                return false;
            }
        }
    }

    /// Run `fut` to completion unless the source is cancelled first.
    pub async fn interruptible<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            out = fut => Some(out),
            _ = self.cancel_rx.wait_for(|c| *c) => None,
        }
    }
}

impl Source {
    /// Spawn a readiness loop.
    ///
    /// `body` receives a [`SourceActivity`] and is expected to loop on
    /// [`SourceActivity::ready`]. When the body returns — because of
    /// cancellation, peer close, or a fatal transport error — `teardown`
    /// runs exactly once. If `suspended` is true the gate starts closed and
    /// the loop makes no progress until [`Source::resume`].
    pub fn spawn<Fut, T>(
        label: impl Into<String>,
        suspended: bool,
        body: impl FnOnce(SourceActivity) -> Fut,
        teardown: T,
    ) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        let label = label.into();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (gate_tx, gate_rx) = watch::channel(u32::from(suspended));

        let inner = Arc::new(SourceShared {
            cancel_tx,
            gate_tx,
            cancelled: AtomicBool::new(false),
            label: label.clone(),
        });

        let fut = body(SourceActivity { cancel_rx, gate_rx });
        tokio::spawn(async move {
            fut.await;
            tracing::trace!(source = %label, "source loop finished");
            teardown();
        });

        Self { inner }
    }

    /// Stop delivery permanently. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            tracing::debug!(source = %self.inner.label, "source cancelled");
            let _ = self.inner.cancel_tx.send(true);
        }
    }

    /// Whether [`Source::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Raise the suspend count; delivery pauses between frames.
    pub fn suspend(&self) {
        self.inner.gate_tx.send_modify(|count| *count += 1);
    }

    /// Lower the suspend count; delivery continues at zero.
    pub fn resume(&self) {
        self.inner.gate_tx.send_modify(|count| {
            *count = count.saturating_sub(1);
        });
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("label", &self.inner.label)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
