//! Transport enum and backend facade.
//!
//! The public API is the [`Transport`] enum; each backend lives in its own
//! module under `transport/`. A transport knows nothing about the object
//! model: it moves opaque frames with resources and credentials attached.
//! Which backend a process uses is configuration passed at initialization,
//! never a mutable global; tests substitute the in-process [`mem`] loopback
//! for the [`unix`] socket backend.

use bytes::Bytes;

use crate::{Credentials, Resource, TransportError};

pub mod mem;
pub mod unix;

/// One received frame with its out-of-band attachments.
#[derive(Debug)]
pub struct Inbound {
    /// The raw frame (header plus payload).
    pub bytes: Bytes,
    /// Resources carried alongside the frame, in table order.
    pub resources: Vec<Resource>,
    /// Kernel-supplied identity of the sending process.
    pub credentials: Credentials,
}

/// A configured transport backend.
#[derive(Clone, Debug)]
pub enum Transport {
    /// Seq-packet sockets under a socket directory.
    Unix(unix::UnixTransport),
    /// In-process loopback, for tests and same-process wiring.
    Mem(mem::MemTransport),
}

impl Transport {
    /// Unix backend rooted at the conventional socket directory.
    pub fn unix() -> Self {
        Transport::Unix(unix::UnixTransport::new(unix::DEFAULT_SOCKET_DIR))
    }

    /// Unix backend rooted at `socket_dir`.
    pub fn unix_at(socket_dir: impl Into<std::path::PathBuf>) -> Self {
        Transport::Unix(unix::UnixTransport::new(socket_dir))
    }

    /// Fresh in-process namespace.
    pub fn mem() -> Self {
        Transport::Mem(mem::MemTransport::new())
    }

    /// Claim the named server port.
    pub async fn listen(&self, name: &str) -> Result<Listener, TransportError> {
        match self {
            Transport::Unix(t) => t.listen(name).map(Listener::Unix),
            Transport::Mem(t) => t.listen(name).map(Listener::Mem),
        }
    }

    /// Resolve a named service to a connected client port.
    pub async fn lookup(&self, name: &str) -> Result<Port, TransportError> {
        match self {
            Transport::Unix(t) => t.lookup(name).map(Port::Unix),
            Transport::Mem(t) => t.lookup(name).map(Port::Mem),
        }
    }
}

/// A bound server port accepting peers.
#[derive(Clone, Debug)]
pub enum Listener {
    /// Listening seq-packet socket.
    Unix(unix::UnixListener),
    /// Loopback accept queue.
    Mem(mem::MemListener),
}

impl Listener {
    /// Wait for the next peer.
    pub async fn accept(&self) -> Result<Port, TransportError> {
        match self {
            Listener::Unix(l) => l.accept().await.map(Port::Unix),
            Listener::Mem(l) => l.accept().await.map(Port::Mem),
        }
    }

    /// Debug label.
    pub fn label(&self) -> String {
        match self {
            Listener::Unix(l) => l.label(),
            Listener::Mem(l) => l.label(),
        }
    }

    /// Close and unlink the server port. Idempotent.
    pub fn close(&self) {
        match self {
            Listener::Unix(l) => l.close(),
            Listener::Mem(l) => l.close(),
        }
    }
}

/// A connected endpoint handle.
#[derive(Clone, Debug)]
pub enum Port {
    /// Connected seq-packet socket.
    Unix(unix::UnixPort),
    /// Loopback channel end.
    Mem(mem::MemPort),
}

impl Port {
    /// Transmit one whole frame, atomically, with its resources.
    pub async fn send(
        &self,
        frame: &[u8],
        resources: Vec<Resource>,
    ) -> Result<(), TransportError> {
        match self {
            Port::Unix(p) => p.send(frame, resources).await,
            Port::Mem(p) => p.send(frame, resources),
        }
    }

    /// Receive one whole frame with its attachments.
    pub async fn recv(&self) -> Result<Inbound, TransportError> {
        match self {
            Port::Unix(p) => p.recv().await,
            Port::Mem(p) => p.recv().await,
        }
    }

    /// Debug label.
    pub fn label(&self) -> String {
        match self {
            Port::Unix(p) => p.label(),
            Port::Mem(p) => p.label(),
        }
    }

    /// Whether two handles name the same underlying port.
    pub fn same_port(&self, other: &Port) -> bool {
        match (self, other) {
            (Port::Unix(a), Port::Unix(b)) => a.same_port(b),
            (Port::Mem(a), Port::Mem(b)) => a.same_port(b),
            _ => false,
        }
    }

    /// Credentials of the peer, as captured when the port connected.
    pub fn peer_credentials(&self) -> Option<Credentials> {
        match self {
            Port::Unix(p) => Some(p.peer_credentials()),
            Port::Mem(p) => Some(p.peer_credentials()),
        }
    }

    /// Shut the port down; the peer observes a close. Idempotent.
    pub fn close(&self) {
        match self {
            Port::Unix(p) => p.close(),
            Port::Mem(p) => p.close(),
        }
    }
}
