//! In-process loopback transport.
//!
//! Each [`MemTransport`] is its own private namespace mapping service names
//! to accept queues. Ports are unbounded channel pairs carrying whole frames
//! with their resources; credentials are the real identity of the current
//! process. This is the backend tests use in place of the unix sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{Credentials, Inbound, Resource, TransportError};

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

type AcceptQueue = mpsc::UnboundedSender<MemPort>;

/// A private in-process service namespace.
#[derive(Clone, Debug, Default)]
pub struct MemTransport {
    registry: Arc<Mutex<HashMap<String, AcceptQueue>>>,
}

impl MemTransport {
    /// Fresh empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` and return its accept queue.
    pub fn listen(&self, name: &str) -> Result<MemListener, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Re-binding a name steals it from the previous listener, matching
        // the unix backend's unlink-before-bind.
        self.registry.lock().insert(name.to_string(), tx);
        Ok(MemListener {
            inner: Arc::new(MemListenerInner {
                name: name.to_string(),
                accept_rx: tokio::sync::Mutex::new(rx),
                registry: self.registry.clone(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Connect to `name`, delivering the server half to its accept queue.
    pub fn lookup(&self, name: &str) -> Result<MemPort, TransportError> {
        let registry = self.registry.lock();
        let accept = registry
            .get(name)
            .ok_or_else(|| TransportError::NotFound(name.to_string()))?;
        let (client, server) = MemPort::pair();
        accept
            .send(server)
            .map_err(|_| TransportError::NotFound(name.to_string()))?;
        Ok(client)
    }
}

struct MemListenerInner {
    name: String,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemPort>>,
    registry: Arc<Mutex<HashMap<String, AcceptQueue>>>,
    closed: AtomicBool,
}

/// Accept queue for one registered name.
#[derive(Clone)]
pub struct MemListener {
    inner: Arc<MemListenerInner>,
}

impl MemListener {
    /// Wait for the next connecting peer.
    pub async fn accept(&self) -> Result<MemPort, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut rx = self.inner.accept_rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    /// Debug label.
    pub fn label(&self) -> String {
        format!("<mem:{}>", self.inner.name)
    }

    /// Unregister the name; pending lookups fail afterwards.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.registry.lock().remove(&self.inner.name);
        }
    }
}

impl std::fmt::Debug for MemListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemListener")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

struct MemFrame {
    bytes: Bytes,
    resources: Vec<Resource>,
    credentials: Credentials,
}

struct MemPortInner {
    id: u64,
    tx: Mutex<Option<mpsc::UnboundedSender<MemFrame>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemFrame>>,
    closed: AtomicBool,
}

/// One end of an in-process port pair.
#[derive(Clone)]
pub struct MemPort {
    inner: Arc<MemPortInner>,
}

impl MemPort {
    /// A connected pair of loopback ports.
    pub fn pair() -> (MemPort, MemPort) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = MemPort {
            inner: Arc::new(MemPortInner {
                id: NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed),
                tx: Mutex::new(Some(tx_b)),
                rx: tokio::sync::Mutex::new(rx_a),
                closed: AtomicBool::new(false),
            }),
        };
        let b = MemPort {
            inner: Arc::new(MemPortInner {
                id: NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed),
                tx: Mutex::new(Some(tx_a)),
                rx: tokio::sync::Mutex::new(rx_b),
                closed: AtomicBool::new(false),
            }),
        };
        (a, b)
    }

    /// Queue one frame for the peer. Never blocks.
    pub fn send(
        &self,
        frame: &[u8],
        resources: Vec<Resource>,
    ) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let tx = self
            .inner
            .tx
            .lock()
            .as_ref()
            .cloned()
            .ok_or(TransportError::Closed)?;
        tx.send(MemFrame {
            bytes: Bytes::copy_from_slice(frame),
            resources,
            credentials: Credentials::current(),
        })
        .map_err(|_| TransportError::Closed)
    }

    /// Receive one frame from the peer.
    pub async fn recv(&self) -> Result<Inbound, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        let frame = rx.recv().await.ok_or(TransportError::Closed)?;
        Ok(Inbound {
            bytes: frame.bytes,
            resources: frame.resources,
            credentials: frame.credentials,
        })
    }

    /// Debug label.
    pub fn label(&self) -> String {
        format!("<mem #{}>", self.inner.id)
    }

    /// Whether both handles are clones of one port.
    pub fn same_port(&self, other: &MemPort) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Loopback peers are always the current process.
    pub fn peer_credentials(&self) -> Credentials {
        Credentials::current()
    }

    /// Drop the send half; the peer's receive loop observes a close.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.tx.lock().take();
        }
    }
}

impl std::fmt::Debug for MemPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemPort")
            .field("id", &self.inner.id)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}
