//! Unix seq-packet transport.
//!
//! Service names map to socket files under a socket directory
//! (`<dir>/foo.bar.baz`). Sockets are `SOCK_SEQPACKET`: connection oriented
//! but message framed, so every `sendmsg` carries exactly one frame and
//! every `recvmsg` yields exactly one frame. File descriptors ride in an
//! `SCM_RIGHTS` control message on the same datagram as their frame, so the
//! receiver sees all of them or none of them. Peer credentials come from
//! `SO_PEERCRED`, captured when the port connects and stamped on every
//! inbound frame.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use crate::{Credentials, Inbound, Resource, TransportError};

/// Conventional socket directory.
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/courier";

/// Listen backlog.
const LISTEN_BACKLOG: libc::c_int = 5;

/// Upper bound on descriptors attached to one frame. The kernel's own limit
/// (`SCM_MAX_FD`) is 253.
pub const MAX_FDS_PER_FRAME: usize = 253;

static ANON_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The unix backend: a socket directory.
#[derive(Clone, Debug)]
pub struct UnixTransport {
    socket_dir: PathBuf,
}

impl UnixTransport {
    /// Backend rooted at `socket_dir`. The directory is created lazily on
    /// the first `listen`.
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
        }
    }

    /// The socket file a service name maps to.
    fn path_for(&self, name: &str) -> Result<PathBuf, TransportError> {
        if name.is_empty()
            || !name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
        {
            return Err(TransportError::InvalidName(name.to_string()));
        }
        let path = self.socket_dir.join(name);
        // sun_path is 108 bytes including the terminator.
        if path.as_os_str().len() >= 107 {
            return Err(TransportError::InvalidName(name.to_string()));
        }
        Ok(path)
    }

    /// Bind and listen on the named socket, unlinking any stale file first.
    pub fn listen(&self, name: &str) -> Result<UnixListener, TransportError> {
        let path = self.path_for(name)?;
        std::fs::create_dir_all(&self.socket_dir)?;
        let _ = std::fs::remove_file(&path);

        let fd = seqpacket_socket()?;
        let (addr, len) = sockaddr_for(&path)?;
        // SAFETY: addr points to a valid sockaddr_un of the stated length.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                len,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: fd is a bound socket we own.
        let rc = unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }
        set_nonblocking(fd.as_raw_fd())?;

        tracing::debug!(path = %path.display(), "listening");
        Ok(UnixListener {
            inner: Arc::new(UnixListenerInner {
                fd: AsyncFd::with_interest(fd, Interest::READABLE)?,
                path,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Connect to the named socket.
    pub fn lookup(&self, name: &str) -> Result<UnixPort, TransportError> {
        let path = self.path_for(name)?;
        match std::fs::metadata(&path) {
            Ok(meta) => {
                use std::os::unix::fs::FileTypeExt;
                if !meta.file_type().is_socket() {
                    return Err(TransportError::NotFound(name.to_string()));
                }
            }
            Err(_) => return Err(TransportError::NotFound(name.to_string())),
        }

        let fd = seqpacket_socket()?;
        let (addr, len) = sockaddr_for(&path)?;
        // SAFETY: fd is our socket; addr is a valid sockaddr_un.
        let rc = unsafe {
            libc::connect(
                fd.as_raw_fd(),
                ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                len,
            )
        };
        if rc != 0 {
            let err = io::Error::last_os_error();
            tracing::debug!(path = %path.display(), error = %err, "connect failed");
            return Err(err.into());
        }

        set_nonblocking(fd.as_raw_fd())?;
        let creds = peer_credentials(fd.as_raw_fd())?;
        UnixPort::from_parts(fd, Some(&path), creds)
    }

    /// A fresh name for an unnamed port, randomly suffixed.
    pub fn anonymous_name() -> String {
        let pid = std::process::id();
        let count = ANON_COUNTER.fetch_add(1, Ordering::Relaxed);
        let clock = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        format!("anonymous.{}.{:x}", pid, u64::from(clock) ^ (count << 32))
    }
}

struct UnixListenerInner {
    fd: AsyncFd<OwnedFd>,
    path: PathBuf,
    closed: AtomicBool,
}

/// A listening seq-packet socket.
#[derive(Clone)]
pub struct UnixListener {
    inner: Arc<UnixListenerInner>,
}

impl UnixListener {
    /// Accept the next peer and capture its credentials.
    pub async fn accept(&self) -> Result<UnixPort, TransportError> {
        loop {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            let mut guard = self.inner.fd.readable().await.map_err(TransportError::Io)?;
            match guard.try_io(|fd| accept_nonblocking(fd.get_ref().as_raw_fd())) {
                Ok(Ok(peer)) => {
                    let creds = peer_credentials(peer.as_raw_fd())?;
                    tracing::debug!(listener = %self.label(), peer = %creds, "accepted peer");
                    return UnixPort::from_parts(peer, None, creds);
                }
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    /// Debug label.
    pub fn label(&self) -> String {
        format!(
            "<{} [{}]>",
            self.inner.path.display(),
            self.inner.fd.get_ref().as_raw_fd()
        )
    }

    /// Stop accepting and unlink the socket file. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            let _ = std::fs::remove_file(&self.inner.path);
            // SAFETY: shutting down a socket we own; errors are ignorable.
            unsafe {
                libc::shutdown(self.inner.fd.get_ref().as_raw_fd(), libc::SHUT_RDWR);
            }
        }
    }
}

impl std::fmt::Debug for UnixListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixListener")
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

struct UnixPortInner {
    fd: AsyncFd<OwnedFd>,
    label: String,
    creds: Credentials,
    closed: AtomicBool,
}

/// A connected seq-packet socket.
#[derive(Clone)]
pub struct UnixPort {
    inner: Arc<UnixPortInner>,
}

impl UnixPort {
    fn from_parts(
        fd: OwnedFd,
        path: Option<&Path>,
        creds: Credentials,
    ) -> Result<Self, TransportError> {
        let label = match path {
            Some(p) => format!("<{} [{}]>", p.display(), fd.as_raw_fd()),
            None => format!("<peer [{}]>", fd.as_raw_fd()),
        };
        Ok(Self {
            inner: Arc::new(UnixPortInner {
                fd: AsyncFd::with_interest(fd, Interest::READABLE | Interest::WRITABLE)?,
                label,
                creds,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Send one frame as a single datagram, attaching `resources` as
    /// `SCM_RIGHTS`. The kernel duplicates the descriptors into the message;
    /// the local handles are released once the send succeeds.
    pub async fn send(
        &self,
        frame: &[u8],
        resources: Vec<Resource>,
    ) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if resources.len() > MAX_FDS_PER_FRAME {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "too many resources for one frame",
            )));
        }
        let fds: Vec<RawFd> = resources.iter().map(Resource::raw_fd).collect();

        loop {
            let mut guard = self.inner.fd.writable().await.map_err(TransportError::Io)?;
            match guard.try_io(|fd| send_with_fds(fd.get_ref().as_raw_fd(), frame, &fds)) {
                Ok(Ok(sent)) => {
                    if sent != frame.len() {
                        return Err(TransportError::Io(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "short frame send",
                        )));
                    }
                    // Descriptors are now owned by the in-flight message;
                    // dropping `resources` closes our copies.
                    drop(resources);
                    return Ok(());
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                    return Err(TransportError::Closed);
                }
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one frame and its attachments.
    pub async fn recv(&self) -> Result<Inbound, TransportError> {
        loop {
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            let mut guard = self.inner.fd.readable().await.map_err(TransportError::Io)?;
            match guard.try_io(|fd| recv_with_fds(fd.get_ref().as_raw_fd())) {
                Ok(Ok(None)) => return Err(TransportError::Closed),
                Ok(Ok(Some((bytes, fds)))) => {
                    let resources = fds.into_iter().map(Resource::Fd).collect();
                    return Ok(Inbound {
                        bytes,
                        resources,
                        credentials: self.inner.creds,
                    });
                }
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Err(_would_block) => continue,
            }
        }
    }

    /// Debug label.
    pub fn label(&self) -> String {
        self.inner.label.clone()
    }

    /// Whether both handles are clones of one port.
    pub fn same_port(&self, other: &UnixPort) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Credentials captured from `SO_PEERCRED` at connect/accept time.
    pub fn peer_credentials(&self) -> Credentials {
        self.inner.creds
    }

    /// Shut the socket down in both directions; our pending receive and the
    /// peer's both observe a close. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(port = %self.inner.label, "port closed");
            // SAFETY: shutting down a socket we own; errors are ignorable.
            unsafe {
                libc::shutdown(self.inner.fd.get_ref().as_raw_fd(), libc::SHUT_RDWR);
            }
        }
    }
}

impl std::fmt::Debug for UnixPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixPort")
            .field("label", &self.inner.label)
            .field("peer", &self.inner.creds)
            .finish()
    }
}

/// Create a `SOCK_SEQPACKET` unix socket, cloexec, initially blocking so
/// `connect` completes synchronously.
fn seqpacket_socket() -> io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call; ownership of the returned fd is taken
    // immediately below.
    let fd = unsafe {
        libc::socket(
            libc::AF_UNIX,
            libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fd was just returned by socket(2) and is owned by no one else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a socket we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn sockaddr_for(path: &Path) -> Result<(libc::sockaddr_un, libc::socklen_t), TransportError> {
    use std::os::unix::ffi::OsStrExt;

    // SAFETY: sockaddr_un is plain old data; zeroed is a valid value.
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = path.as_os_str().as_bytes();
    if bytes.len() >= addr.sun_path.len() {
        return Err(TransportError::InvalidName(
            path.display().to_string(),
        ));
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    let len = mem::offset_of!(libc::sockaddr_un, sun_path) + bytes.len() + 1;
    Ok((addr, len as libc::socklen_t))
}

fn accept_nonblocking(listener: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: accept4 on a listening socket we own; the returned fd is
    // wrapped immediately.
    let fd = unsafe {
        libc::accept4(
            listener,
            ptr::null_mut(),
            ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fresh fd from accept4.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn peer_credentials(fd: RawFd) -> Result<Credentials, TransportError> {
    // SAFETY: ucred is plain old data; getsockopt writes at most `len`
    // bytes into it.
    let mut ucred: libc::ucred = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::ucred>() as libc::socklen_t;
    // SAFETY: fd is a connected unix socket; pointers are valid for the
    // duration of the call.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            ptr::from_mut(&mut ucred).cast(),
            &mut len,
        )
    };
    if rc != 0 || len as usize != mem::size_of::<libc::ucred>() {
        return Err(TransportError::CredentialsUnavailable);
    }
    Ok(Credentials {
        pid: ucred.pid,
        uid: ucred.uid,
        gid: ucred.gid,
    })
}

/// Emit `bytes` as one datagram with an optional `SCM_RIGHTS` control
/// message carrying `fds`.
fn send_with_fds(sock: RawFd, bytes: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr().cast_mut().cast(),
        iov_len: bytes.len(),
    };
    // SAFETY: msghdr is plain old data.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    // The control buffer must stay alive across sendmsg.
    let mut cmsg_buf: Vec<u8> = Vec::new();
    if !fds.is_empty() {
        let payload = mem::size_of_val(fds);
        // SAFETY: CMSG_SPACE is a pure size computation.
        let space = unsafe { libc::CMSG_SPACE(payload as u32) } as usize;
        cmsg_buf.resize(space, 0);
        msg.msg_control = cmsg_buf.as_mut_ptr().cast();
        msg.msg_controllen = space as _;

        // SAFETY: msg_control points at `space` zeroed bytes, which is
        // enough for one header plus the fd array.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(payload as u32) as _;
            ptr::copy_nonoverlapping(
                fds.as_ptr(),
                libc::CMSG_DATA(cmsg).cast::<RawFd>(),
                fds.len(),
            );
        }
    }

    // SAFETY: msg and everything it points to are valid for the call.
    let sent = unsafe { libc::sendmsg(sock, &msg, libc::MSG_NOSIGNAL) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

/// Receive one whole datagram plus any `SCM_RIGHTS` descriptors.
///
/// Returns `None` on peer close. Truncation of either the data or the
/// control payload discards the frame as a hard error, so resources are
/// all-or-nothing.
fn recv_with_fds(sock: RawFd) -> io::Result<Option<(Bytes, Vec<OwnedFd>)>> {
    // Size the next datagram without consuming it.
    let mut probe = 0u8;
    // SAFETY: recv writes at most one byte into `probe`; MSG_TRUNC makes it
    // report the datagram's full length.
    let peeked = unsafe {
        libc::recv(
            sock,
            ptr::from_mut(&mut probe).cast(),
            1,
            libc::MSG_PEEK | libc::MSG_TRUNC,
        )
    };
    if peeked < 0 {
        return Err(io::Error::last_os_error());
    }
    if peeked == 0 {
        return Ok(None);
    }

    let mut buf = vec![0u8; peeked as usize];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    // SAFETY: CMSG_SPACE is a pure size computation.
    let cmsg_space =
        unsafe { libc::CMSG_SPACE((MAX_FDS_PER_FRAME * mem::size_of::<RawFd>()) as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    // SAFETY: msghdr is plain old data.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast();
    msg.msg_controllen = cmsg_space as _;

    // SAFETY: msg and its buffers are valid for the call.
    let received = unsafe { libc::recvmsg(sock, &mut msg, libc::MSG_CMSG_CLOEXEC) };
    if received < 0 {
        return Err(io::Error::last_os_error());
    }
    if received == 0 {
        return Ok(None);
    }

    // Collect descriptors first so they are closed (via OwnedFd drop) even
    // when the frame is then rejected.
    let mut fds = Vec::new();
    // SAFETY: CMSG_FIRSTHDR/CMSG_NXTHDR walk the control buffer the kernel
    // just filled; lengths come from the same buffer.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET
                && (*cmsg).cmsg_type == libc::SCM_RIGHTS
            {
                let payload = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let count = payload / mem::size_of::<RawFd>();
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                for i in 0..count {
                    fds.push(OwnedFd::from_raw_fd(ptr::read_unaligned(data.add(i))));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & (libc::MSG_TRUNC | libc::MSG_CTRUNC) != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "truncated frame or control data",
        ));
    }
    if received as usize != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "datagram shorter than peeked length",
        ));
    }

    Ok(Some((Bytes::from(buf), fds)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn temp_transport() -> (UnixTransport, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "courier-test-{}-{}",
            std::process::id(),
            ANON_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        (UnixTransport::new(&dir), dir)
    }

    #[tokio::test]
    async fn connect_send_recv() {
        let (transport, dir) = temp_transport();
        let listener = transport.listen("echo.svc").unwrap();

        let client = transport.lookup("echo.svc").unwrap();
        let server = listener.accept().await.unwrap();

        client.send(b"ping", Vec::new()).await.unwrap();
        let inbound = server.recv().await.unwrap();
        assert_eq!(&inbound.bytes[..], b"ping");
        assert_eq!(inbound.credentials, Credentials::current());

        server.send(b"pong", Vec::new()).await.unwrap();
        let inbound = client.recv().await.unwrap();
        assert_eq!(&inbound.bytes[..], b"pong");

        listener.close();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn frames_do_not_coalesce() {
        let (transport, dir) = temp_transport();
        let listener = transport.listen("framed.svc").unwrap();
        let client = transport.lookup("framed.svc").unwrap();
        let server = listener.accept().await.unwrap();

        client.send(b"one", Vec::new()).await.unwrap();
        client.send(b"twotwo", Vec::new()).await.unwrap();

        assert_eq!(&server.recv().await.unwrap().bytes[..], b"one");
        assert_eq!(&server.recv().await.unwrap().bytes[..], b"twotwo");

        listener.close();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn fd_crosses_the_connection() {
        let (transport, dir) = temp_transport();
        let listener = transport.listen("fd.svc").unwrap();
        let client = transport.lookup("fd.svc").unwrap();
        let server = listener.accept().await.unwrap();

        let (read_end, mut write_end) = std::io::pipe().unwrap();
        write_end.write_all(b"z").unwrap();

        client
            .send(b"frame", vec![Resource::Fd(OwnedFd::from(read_end))])
            .await
            .unwrap();

        let mut inbound = server.recv().await.unwrap();
        assert_eq!(inbound.resources.len(), 1);
        let fd = inbound.resources.pop().unwrap().into_fd();
        let mut received = std::fs::File::from(fd);
        let mut byte = [0u8; 1];
        received.read_exact(&mut byte).unwrap();
        assert_eq!(&byte, b"z");

        listener.close();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn close_wakes_peer() {
        let (transport, dir) = temp_transport();
        let listener = transport.listen("close.svc").unwrap();
        let client = transport.lookup("close.svc").unwrap();
        let server = listener.accept().await.unwrap();

        client.close();
        assert!(matches!(server.recv().await, Err(TransportError::Closed)));

        listener.close();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn lookup_missing_service_fails() {
        let (transport, dir) = temp_transport();
        assert!(matches!(
            transport.lookup("absent.svc"),
            Err(TransportError::NotFound(_))
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn names_are_validated() {
        let (transport, _dir) = temp_transport();
        assert!(matches!(
            transport.path_for("has/slash"),
            Err(TransportError::InvalidName(_))
        ));
        assert!(matches!(
            transport.path_for(""),
            Err(TransportError::InvalidName(_))
        ));
        assert!(transport.path_for("com.example.service").is_ok());
    }

    #[test]
    fn anonymous_names_are_distinct() {
        assert_ne!(
            UnixTransport::anonymous_name(),
            UnixTransport::anonymous_name()
        );
    }
}
