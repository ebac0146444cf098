//! Stateful peers: sequence ids, pending replies, handler dispatch,
//! listener fan-out, and teardown.
//!
//! Every connection owns a serial send queue (outbound frames leave in call
//! order), a recv source (one inbound frame is processed at a time), and a
//! target queue where user callbacks run. The pending-reply table is the
//! only state shared between the send path and the recv path; a lightweight
//! lock covers that handoff.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use courier_core::{
    Credentials, ErrorCode, FrameError, Listener, Port, SerialQueue, Source, Transport,
    TransportError,
};
use courier_value::Value;

use crate::pipe::{pipe_recv, pipe_send};
use crate::Error;

bitflags::bitflags! {
    /// Connection creation flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ConnectionFlags: u64 {
        /// Claim the named port and accept peers instead of connecting.
        const LISTENER = 1;
    }
}

/// One inbound message: the decoded value plus its wire context.
#[derive(Debug)]
pub struct Message {
    value: Value,
    sequence_id: u64,
    credentials: Credentials,
}

impl Message {
    /// The decoded value. May be an error sentinel rather than the
    /// structure the caller expected.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consume the message, yielding its value.
    pub fn into_value(self) -> Value {
        self.value
    }

    /// The frame's sequence id; replying with it routes to the requester's
    /// continuation.
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Credentials of the sending process.
    pub fn credentials(&self) -> Credentials {
        self.credentials
    }
}

type EventHandler = dyn Fn(Message) + Send + Sync;
type ListenerHandler = dyn Fn(Connection) + Send + Sync;

struct PendingCall {
    id: u64,
    queue: SerialQueue,
    handler: Box<dyn FnOnce(Value) + Send>,
}

enum Carrier {
    Port(Port),
    Listener(Listener),
}

struct ConnectionInner {
    name: Option<String>,
    carrier: Carrier,
    flags: ConnectionFlags,
    next_id: AtomicU64,
    send_queue: SerialQueue,
    target_queue: Mutex<SerialQueue>,
    // Tail-inserted, scanned in order on every inbound frame.
    pending: Mutex<Vec<PendingCall>>,
    handler: Mutex<Option<Arc<EventHandler>>>,
    listener_handler: Mutex<Option<Arc<ListenerHandler>>>,
    source: Mutex<Option<Source>>,
    parent: Mutex<Option<Weak<ConnectionInner>>>,
    peers: Mutex<Vec<Connection>>,
    last_credentials: Mutex<Option<Credentials>>,
    context: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
    pre_suspends: AtomicU32,
    cancelled: AtomicBool,
    torn_down: AtomicBool,
}

/// A messaging peer.
///
/// Cheap to clone. A connection starts suspended: nothing is delivered
/// until [`Connection::resume`].
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    fn new(
        name: Option<String>,
        carrier: Carrier,
        flags: ConnectionFlags,
        target_queue: Option<SerialQueue>,
    ) -> Self {
        let label = name.as_deref().unwrap_or("peer");
        // With no host main loop to default to, every connection gets its
        // own serial target queue; callbacks still never overlap.
        let target_queue = target_queue
            .unwrap_or_else(|| SerialQueue::new(format!("courier-target:{}", label)));
        Self {
            inner: Arc::new(ConnectionInner {
                send_queue: SerialQueue::new(format!("courier-send:{}", label)),
                target_queue: Mutex::new(target_queue),
                name,
                carrier,
                flags,
                next_id: AtomicU64::new(1),
                pending: Mutex::new(Vec::new()),
                handler: Mutex::new(None),
                listener_handler: Mutex::new(None),
                source: Mutex::new(None),
                parent: Mutex::new(None),
                peers: Mutex::new(Vec::new()),
                last_credentials: Mutex::new(None),
                context: Mutex::new(None),
                pre_suspends: AtomicU32::new(0),
                cancelled: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
            }),
        }
    }

    /// Create a client or listener for a named service, per `flags`. This
    /// is the general constructor; [`Connection::connect`] and
    /// [`Connection::listen`] cover the common cases.
    pub async fn create_service(
        transport: &Transport,
        name: &str,
        target_queue: Option<SerialQueue>,
        flags: ConnectionFlags,
    ) -> Result<Connection, Error> {
        if flags.contains(ConnectionFlags::LISTENER) {
            let listener = transport.listen(name).await?;
            Ok(Self::new(
                Some(name.to_string()),
                Carrier::Listener(listener),
                flags,
                target_queue,
            ))
        } else {
            let port = transport.lookup(name).await?;
            Ok(Self::new(
                Some(name.to_string()),
                Carrier::Port(port),
                flags,
                target_queue,
            ))
        }
    }

    /// Connect to a named service.
    pub async fn connect(
        transport: &Transport,
        name: &str,
        target_queue: Option<SerialQueue>,
    ) -> Result<Connection, Error> {
        Self::create_service(transport, name, target_queue, ConnectionFlags::empty()).await
    }

    /// Claim a named service and accept peers.
    pub async fn listen(
        transport: &Transport,
        name: &str,
        target_queue: Option<SerialQueue>,
    ) -> Result<Connection, Error> {
        Self::create_service(transport, name, target_queue, ConnectionFlags::LISTENER).await
    }

    /// Connect to the service an endpoint value names.
    pub async fn from_endpoint(
        transport: &Transport,
        endpoint: &Value,
        target_queue: Option<SerialQueue>,
    ) -> Result<Connection, Error> {
        let name = endpoint.as_endpoint()?;
        Self::connect(transport, name, target_queue).await
    }

    fn new_peer(parent: &Connection, port: Port) -> Connection {
        let peer = Self::new(
            None,
            Carrier::Port(port),
            ConnectionFlags::empty(),
            Some(parent.target_queue()),
        );
        *peer.inner.parent.lock() = Some(Arc::downgrade(&parent.inner));
        peer
    }

    /// The service name, if this connection has one.
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// An endpoint value naming this listener's service, suitable for
    /// embedding in a message. Peers of the recipient re-resolve it through
    /// their own transport configuration.
    pub fn endpoint(&self) -> Option<Value> {
        self.inner.name.as_deref().map(Value::endpoint)
    }

    /// Install the event handler: the callback for inbound messages that do
    /// not match a pending reply, including the final error sentinel.
    pub fn set_event_handler(&self, handler: impl Fn(Message) + Send + Sync + 'static) {
        *self.inner.handler.lock() = Some(Arc::new(handler));
    }

    /// Install the listener handler: the callback receiving each accepted
    /// peer. The handler should install the peer's event handler and then
    /// resume it.
    pub fn set_listener_handler(&self, handler: impl Fn(Connection) + Send + Sync + 'static) {
        *self.inner.listener_handler.lock() = Some(Arc::new(handler));
    }

    /// Route user callbacks to `queue` from now on.
    pub fn set_target_queue(&self, queue: SerialQueue) {
        *self.inner.target_queue.lock() = queue;
    }

    fn target_queue(&self) -> SerialQueue {
        self.inner.target_queue.lock().clone()
    }

    /// Attach an opaque user context.
    pub fn set_context(&self, context: Arc<dyn Any + Send + Sync>) {
        *self.inner.context.lock() = Some(context);
    }

    /// The attached user context, if any.
    pub fn context(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.context.lock().clone()
    }

    /// Pid of the peer, from the most recent inbound message.
    pub fn remote_pid(&self) -> Option<i32> {
        self.credentials().map(|c| c.pid)
    }

    /// Effective uid of the peer, from the most recent inbound message.
    pub fn remote_uid(&self) -> Option<u32> {
        self.credentials().map(|c| c.uid)
    }

    /// Primary gid of the peer, from the most recent inbound message.
    pub fn remote_gid(&self) -> Option<u32> {
        self.credentials().map(|c| c.gid)
    }

    fn credentials(&self) -> Option<Credentials> {
        let last = *self.inner.last_credentials.lock();
        last.or_else(|| match &self.inner.carrier {
            Carrier::Port(port) => port.peer_credentials(),
            Carrier::Listener(_) => None,
        })
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn enqueue_send(&self, value: Value, id: u64) {
        let port = match &self.inner.carrier {
            Carrier::Port(port) => port.clone(),
            Carrier::Listener(_) => {
                tracing::warn!("send on a listener connection dropped");
                return;
            }
        };
        self.inner.send_queue.dispatch(async move {
            if let Err(e) = pipe_send(&port, &value, id).await {
                tracing::debug!(port = %port.label(), error = %e, "send failed");
            }
        });
    }

    /// Send a message. Delivered to the peer's event handler; no reply is
    /// expected.
    pub fn send(&self, value: Value) {
        let id = self.next_id();
        self.enqueue_send(value, id);
    }

    /// Send a message expecting a reply. `handler` runs on `reply_queue`
    /// (the target queue when `None`) with the reply value, or with an
    /// error sentinel if the connection dies first.
    pub fn send_with_reply(
        &self,
        value: Value,
        reply_queue: Option<SerialQueue>,
        handler: impl FnOnce(Value) + Send + 'static,
    ) {
        let id = self.next_id();
        let queue = reply_queue.unwrap_or_else(|| self.target_queue());

        if self.inner.torn_down.load(Ordering::Acquire) {
            queue.dispatch_fn(move || {
                handler(Value::error_code(ErrorCode::ConnectionInterrupted));
            });
            return;
        }

        self.inner.pending.lock().push(PendingCall {
            id,
            queue,
            handler: Box::new(handler),
        });
        self.enqueue_send(value, id);
    }

    /// Send a message and await its reply. The awaitable rendition of the
    /// synchronous round trip; the reply may be an error sentinel.
    pub async fn send_with_reply_await(&self, value: Value) -> Value {
        let (tx, rx) = oneshot::channel();
        self.send_with_reply(value, None, move |reply| {
            let _ = tx.send(reply);
        });
        rx.await
            .unwrap_or_else(|_| Value::error_code(ErrorCode::ConnectionInterrupted))
    }

    /// Reply to an inbound request, routing to the requester's pending
    /// continuation via its sequence id.
    pub fn send_reply(&self, request: &Message, value: Value) {
        self.enqueue_send(value, request.sequence_id());
    }

    /// Run `barrier` on the send queue, after every previously enqueued
    /// send has been attempted.
    pub fn send_barrier(&self, barrier: impl FnOnce() + Send + 'static) {
        self.inner.send_queue.dispatch_fn(barrier);
    }

    /// Wait until every send enqueued before this call has been attempted.
    pub async fn flush_sends(&self) {
        self.inner.send_queue.barrier().await;
    }

    /// Pause delivery. Counted; pairs with [`Connection::resume`].
    pub fn suspend(&self) {
        let guard = self.inner.source.lock();
        match guard.as_ref() {
            Some(source) => source.suspend(),
            None => {
                self.inner.pre_suspends.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Start (or continue) delivery. The first resume spawns the recv
    /// source; later calls lower the suspend count.
    pub fn resume(&self) {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.inner.source.lock();
        if let Some(source) = guard.as_ref() {
            source.resume();
            return;
        }

        // Spawn gated, apply the suspends accumulated before the source
        // existed, then release this resume's own count.
        let source = if self.inner.flags.contains(ConnectionFlags::LISTENER) {
            self.spawn_listener_source()
        } else {
            self.spawn_port_source()
        };
        for _ in 0..self.inner.pre_suspends.swap(0, Ordering::AcqRel) {
            source.suspend();
        }
        source.resume();
        *guard = Some(source);
    }

    fn spawn_port_source(&self) -> Source {
        let conn = self.clone();
        let port = match &self.inner.carrier {
            Carrier::Port(port) => port.clone(),
            Carrier::Listener(_) => unreachable!("listener uses spawn_listener_source"),
        };
        let teardown_conn = self.clone();
        Source::spawn(
            format!("courier-recv:{}", port.label()),
            true,
            move |mut activity| async move {
                while activity.ready().await {
                    match activity.interruptible(pipe_recv(&port)).await {
                        None => break,
                        Some(Ok((value, id, creds))) => {
                            // A suspend that landed while this frame was in
                            // flight still gates its delivery.
                            if !activity.ready().await {
                                break;
                            }
                            conn.dispatch_inbound(value, id, creds);
                        }
                        Some(Err(Error::Transport(e))) => {
                            if !matches!(e, TransportError::Closed) {
                                tracing::debug!(error = %e, "recv failed");
                            }
                            break;
                        }
                        Some(Err(Error::Frame(FrameError::BadVersion(v)))) => {
                            tracing::warn!(version = v, "peer speaks wrong protocol");
                            break;
                        }
                        Some(Err(e)) => {
                            // Transient decode trouble drops the frame, not
                            // the session.
                            tracing::warn!(error = %e, "inbound frame dropped");
                        }
                    }
                }
            },
            move || teardown_conn.tear_down(),
        )
    }

    fn spawn_listener_source(&self) -> Source {
        let conn = self.clone();
        let listener = match &self.inner.carrier {
            Carrier::Listener(listener) => listener.clone(),
            Carrier::Port(_) => unreachable!("clients use spawn_port_source"),
        };
        let teardown_conn = self.clone();
        Source::spawn(
            format!("courier-accept:{}", listener.label()),
            true,
            move |mut activity| async move {
                while activity.ready().await {
                    match activity.interruptible(listener.accept()).await {
                        None => break,
                        Some(Ok(port)) => {
                            if !activity.ready().await {
                                break;
                            }
                            conn.handle_new_peer(port);
                        }
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "accept failed");
                            break;
                        }
                    }
                }
            },
            move || teardown_conn.tear_down(),
        )
    }

    fn handle_new_peer(&self, port: Port) {
        let peer = Connection::new_peer(self, port);
        self.inner.peers.lock().push(peer.clone());
        tracing::debug!(
            listener = self.inner.name.as_deref().unwrap_or(""),
            peer = %peer.label(),
            "new peer"
        );

        if let Some(handler) = self.inner.listener_handler.lock().clone() {
            self.target_queue().dispatch_fn(move || handler(peer));
        } else {
            tracing::warn!("peer accepted with no listener handler; cancelled");
            peer.cancel();
        }
    }

    fn dispatch_inbound(&self, value: Value, id: u64, credentials: Credentials) {
        *self.inner.last_credentials.lock() = Some(credentials);

        let call = {
            let mut pending = self.inner.pending.lock();
            let index = pending.iter().position(|call| call.id == id);
            index.map(|index| pending.remove(index))
        };

        if let Some(call) = call {
            let PendingCall { queue, handler, .. } = call;
            queue.dispatch_fn(move || handler(value));
            return;
        }

        if let Some(handler) = self.inner.handler.lock().clone() {
            let message = Message {
                value,
                sequence_id: id,
                credentials,
            };
            self.target_queue().dispatch_fn(move || handler(message));
        } else {
            tracing::trace!(sequence_id = id, "no event handler, message dropped");
        }
    }

    /// Cancel the connection: no further deliveries, outstanding replies
    /// complete with `ConnectionInterrupted`, the event handler sees
    /// `ConnectionInvalid` once, and transport resources are released.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let source = self.inner.source.lock().clone();
        match source {
            // The source loop exits and runs teardown.
            Some(source) => source.cancel(),
            // Never resumed; tear down directly.
            None => self.tear_down(),
        }
    }

    /// Whether [`Connection::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    fn tear_down(&self) {
        if self.inner.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let interrupted = self.inner.cancelled.load(Ordering::Acquire);
        tracing::debug!(conn = %self.label(), interrupted, "tearing down");

        // Outstanding continuations complete with a sentinel: interrupted
        // for a local cancel, invalid for a peer-side close.
        let code = if interrupted {
            ErrorCode::ConnectionInterrupted
        } else {
            ErrorCode::ConnectionInvalid
        };
        let drained: Vec<PendingCall> = std::mem::take(&mut *self.inner.pending.lock());
        for call in drained {
            let PendingCall { queue, handler, .. } = call;
            queue.dispatch_fn(move || handler(Value::error_code(code)));
        }

        // The event handler hears about the death exactly once.
        if let Some(handler) = self.inner.handler.lock().take() {
            let credentials = self
                .credentials()
                .unwrap_or_else(Credentials::current);
            let message = Message {
                value: Value::error_code(ErrorCode::ConnectionInvalid),
                sequence_id: 0,
                credentials,
            };
            self.target_queue().dispatch_fn(move || handler(message));
        }

        // Unlink from the parent listener.
        let parent = self.inner.parent.lock().take();
        if let Some(parent) = parent.and_then(|weak| weak.upgrade()) {
            parent
                .peers
                .lock()
                .retain(|peer| !Arc::ptr_eq(&peer.inner, &self.inner));
        }

        // A listener takes its children with it.
        let peers: Vec<Connection> = std::mem::take(&mut *self.inner.peers.lock());
        for peer in peers {
            peer.cancel();
        }

        match &self.inner.carrier {
            Carrier::Port(port) => port.close(),
            Carrier::Listener(listener) => listener.close(),
        }
    }

    /// Number of live accepted peers. Listener diagnostics.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().len()
    }

    fn label(&self) -> String {
        match &self.inner.carrier {
            Carrier::Port(port) => port.label(),
            Carrier::Listener(listener) => listener.label(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.name)
            .field("label", &self.label())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
