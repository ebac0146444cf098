//! Out-of-band resources: file descriptors and shared memory handles.
//!
//! Resources ride next to a frame, not inside it. The payload carries only a
//! placeholder index into the frame's resource table; the transport moves
//! the actual handles through its own channel (an `SCM_RIGHTS` control
//! message on the unix backend).

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use parking_lot::Mutex;

/// A handle transferred alongside one frame.
#[derive(Debug)]
pub enum Resource {
    /// A plain file descriptor.
    Fd(OwnedFd),
    /// A shared memory object: backing descriptor plus mapping size in bytes.
    SharedMemory(OwnedFd, u64),
}

impl Resource {
    /// The raw descriptor to transfer.
    pub fn raw_fd(&self) -> RawFd {
        match self {
            Resource::Fd(fd) => fd.as_raw_fd(),
            Resource::SharedMemory(fd, _) => fd.as_raw_fd(),
        }
    }

    /// Consume the resource, yielding the owned descriptor.
    pub fn into_fd(self) -> OwnedFd {
        match self {
            Resource::Fd(fd) => fd,
            Resource::SharedMemory(fd, _) => fd,
        }
    }
}

/// The takeable cell inside fd-carrying values.
///
/// The value owns the handle until it is drained for a transport send, after
/// which every clone of the value observes the empty slot: ownership has
/// moved to the receiver.
#[derive(Clone)]
pub struct ResourceSlot {
    inner: Arc<Mutex<Option<OwnedFd>>>,
}

impl ResourceSlot {
    /// A slot holding `fd`.
    pub fn new(fd: OwnedFd) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(fd))),
        }
    }

    /// A drained placeholder, as produced by the decoder before resource
    /// re-attachment.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Move the handle out of the slot, if still present.
    pub fn take(&self) -> Option<OwnedFd> {
        self.inner.lock().take()
    }

    /// Place a received handle into the slot.
    pub fn put(&self, fd: OwnedFd) {
        *self.inner.lock() = Some(fd);
    }

    /// Whether the handle has been drained (or never attached).
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Raw descriptor for diagnostics; does not transfer ownership.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.inner.lock().as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Whether two slots are the same cell (clones of one value).
    pub fn same_slot(&self, other: &ResourceSlot) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ResourceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw_fd() {
            Some(fd) => write!(f, "ResourceSlot({})", fd),
            None => write!(f, "ResourceSlot(drained)"),
        }
    }
}
