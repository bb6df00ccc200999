//! Stream connections.
//!
//! Each [`TcpConnection`] is a cheap, clonable handle to one socket. All socket
//! work happens in a single driver task per connection: the handle only records
//! state transitions and forwards commands to the driver, which executes them in
//! the order they were issued. Because that task is the only code touching the
//! socket, receive, send and close on one connection never run concurrently.

use super::{
    next_connection_id, CloseReason, ConnectionEvent, ConnectionId, ConnectionState, EventSender,
};
use crate::error::ConnectionError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Bytes a connection may hold in queued, unwritten payloads.
pub const WRITE_QUEUE_LIMIT: usize = 4 * 1024 * 1024;

enum Command {
    QueueReceive,
    Send(Vec<u8>),
    Close,
}

struct Status {
    state: ConnectionState,
    reason: Option<CloseReason>,
}

struct Inner {
    id: ConnectionId,
    status: Mutex<Status>,
    peer: Mutex<Option<SocketAddr>>,
    commands: mpsc::UnboundedSender<Command>,
    mailbox: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    events: EventSender,
    receive_buffer_size: usize,
    queued_bytes: AtomicUsize,
}

/// Handle to one stream connection.
///
/// Clones refer to the same connection; [`ptr_eq`](Self::ptr_eq) tells whether
/// two handles do.
#[derive(Clone)]
pub struct TcpConnection {
    inner: Arc<Inner>,
}

impl TcpConnection {
    /// Creates an idle connection reporting to `events`.
    ///
    /// # Arguments
    ///
    /// * `events` - Sink for `Connected`, `Received` and `Closed` events
    /// * `receive_buffer_size` - Maximum bytes delivered per receive completion
    pub fn new(events: EventSender, receive_buffer_size: usize) -> Self {
        let (commands, mailbox) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                id: next_connection_id(),
                status: Mutex::new(Status {
                    state: ConnectionState::Idle,
                    reason: None,
                }),
                peer: Mutex::new(None),
                commands,
                mailbox: Mutex::new(Some(mailbox)),
                events,
                receive_buffer_size: receive_buffer_size.max(1),
                queued_bytes: AtomicUsize::new(0),
            }),
        }
    }

    /// Takes over a socket produced by an acceptor.
    ///
    /// Moves the connection from `Idle` to `Connecting`; the `Connected` event
    /// follows once the driver task has started.
    pub fn accept(&self, stream: TcpStream) -> Result<(), ConnectionError> {
        let mailbox = self.start()?;
        if let Ok(peer) = stream.peer_addr() {
            self.set_peer(peer);
        }
        tokio::spawn(Driver::new(self.clone(), mailbox).run(Handshake::Accepted(stream)));
        Ok(())
    }

    /// Starts an outbound connection to `endpoint`.
    ///
    /// Moves the connection from `Idle` to `Connecting`. On success `Connected`
    /// is fired; on failure the connection goes straight to `Closed` with
    /// [`CloseReason::ConnectFailed`].
    pub fn connect(&self, endpoint: SocketAddr) -> Result<(), ConnectionError> {
        let mailbox = self.start()?;
        self.set_peer(endpoint);
        tokio::spawn(Driver::new(self.clone(), mailbox).run(Handshake::Connect(endpoint)));
        Ok(())
    }

    /// Arms one read.
    ///
    /// The read completes with a single `Received` event and is not re-armed
    /// until this is called again, so at most one completed read is waiting
    /// for its consumer. Arming while `Connecting` starts reading once open.
    pub fn queue_receive(&self) -> Result<(), ConnectionError> {
        self.command(Command::QueueReceive)
    }

    /// Queues `payload` for writing.
    ///
    /// Writes are issued one at a time in the order they were queued. Fails
    /// with [`ConnectionError::WriteQueueFull`] once more than
    /// [`WRITE_QUEUE_LIMIT`] bytes are waiting to be written.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> Result<(), ConnectionError> {
        let payload = payload.into();
        let size = payload.len();
        let queued = self.inner.queued_bytes.fetch_add(size, Ordering::AcqRel);
        if queued.saturating_add(size) > WRITE_QUEUE_LIMIT {
            self.inner.queued_bytes.fetch_sub(size, Ordering::AcqRel);
            return Err(ConnectionError::WriteQueueFull {
                queued,
                limit: WRITE_QUEUE_LIMIT,
            });
        }

        self.command(Command::Send(payload)).inspect_err(|_| {
            self.inner.queued_bytes.fetch_sub(size, Ordering::AcqRel);
        })
    }

    /// Bytes queued for writing and not yet written.
    pub fn queued_bytes(&self) -> usize {
        self.inner.queued_bytes.load(Ordering::Acquire)
    }

    /// Closes the connection, recording `reason` unless a reason is already set.
    ///
    /// Pending reads and writes are cancelled. The `Closed` event fires exactly
    /// once; closing a connection that is already closing is a no-op.
    pub fn close(&self, reason: CloseReason) {
        let mut status = self.status();
        match status.state {
            ConnectionState::Idle => {
                status.state = ConnectionState::Closed;
                status.reason = Some(reason.clone());
                drop(status);
                self.emit(ConnectionEvent::Closed(self.clone(), reason));
            }
            ConnectionState::Connecting | ConnectionState::Open => {
                status.state = ConnectionState::Closing;
                status.reason.get_or_insert(reason);
                drop(status);
                // The driver may already be gone after a fault; it fires Closed itself then.
                let _ = self.inner.commands.send(Command::Close);
            }
            ConnectionState::Closing | ConnectionState::Closed => {
                trace!("Connection {} already {}", self.inner.id, status.state);
            }
        }
    }

    /// Closes the connection at the owner's request.
    pub fn disconnect(&self) {
        self.close(CloseReason::Requested);
    }

    /// Returns true while the connection is `Open`.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    /// Reason recorded by the first close, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.status().reason.clone()
    }

    /// Process-unique connection id.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Remote endpoint, once known.
    pub fn address(&self) -> Option<SocketAddr> {
        *self.inner.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if both handles refer to the same connection.
    pub fn ptr_eq(&self, other: &TcpConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.inner.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_peer(&self, peer: SocketAddr) {
        *self.inner.peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(peer);
    }

    fn start(&self) -> Result<mpsc::UnboundedReceiver<Command>, ConnectionError> {
        let mut status = self.status();
        if status.state != ConnectionState::Idle {
            return Err(ConnectionError::AlreadyStarted(status.state));
        }

        let mailbox = self
            .inner
            .mailbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ConnectionError::Stopped)?;
        status.state = ConnectionState::Connecting;
        Ok(mailbox)
    }

    fn command(&self, command: Command) -> Result<(), ConnectionError> {
        let state = self.state();
        if !matches!(state, ConnectionState::Connecting | ConnectionState::Open) {
            return Err(ConnectionError::NotOpen(state));
        }
        self.inner
            .commands
            .send(command)
            .map_err(|_| ConnectionError::Stopped)
    }

    /// `Connecting` -> `Open`. Returns false if a close got there first.
    fn open(&self) -> bool {
        let mut status = self.status();
        if status.state != ConnectionState::Connecting {
            return false;
        }
        status.state = ConnectionState::Open;
        drop(status);

        self.emit(ConnectionEvent::Connected(self.clone()));
        true
    }

    /// Enters `Closed` and fires the close event, once.
    fn finish(&self, fallback: CloseReason) {
        let reason = {
            let mut status = self.status();
            if status.state == ConnectionState::Closed {
                return;
            }
            status.state = ConnectionState::Closed;
            status.reason.get_or_insert(fallback).clone()
        };

        debug!("🔌 Connection {} closed: {}", self.inner.id, reason);
        self.emit(ConnectionEvent::Closed(self.clone(), reason));
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.inner.events.send(event).is_err() {
            trace!("Event sink for connection {} is gone", self.inner.id);
        }
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("peer", &self.address())
            .finish()
    }
}

enum Handshake {
    Accepted(TcpStream),
    Connect(SocketAddr),
}

/// The write half, either waiting for work or owned by the one in-flight write.
enum WriteSlot {
    Idle(OwnedWriteHalf),
    Busy(BoxFuture<'static, (OwnedWriteHalf, usize, io::Result<()>)>),
    Empty,
}

impl WriteSlot {
    /// Issues the next queued payload if no write is in flight.
    fn flush(&mut self, pending: &mut VecDeque<Vec<u8>>) {
        if !matches!(self, WriteSlot::Idle(_)) || pending.is_empty() {
            return;
        }
        if let (WriteSlot::Idle(mut half), Some(payload)) =
            (std::mem::replace(self, WriteSlot::Empty), pending.pop_front())
        {
            *self = WriteSlot::Busy(
                async move {
                    let result = half.write_all(&payload).await;
                    (half, payload.len(), result)
                }
                .boxed(),
            );
        }
    }

    /// Resolves when the in-flight write completes; never resolves otherwise.
    async fn completion(&mut self) -> (OwnedWriteHalf, usize, io::Result<()>) {
        match self {
            WriteSlot::Busy(write) => write.await,
            _ => std::future::pending().await,
        }
    }
}

enum Stop {
    Requested,
    Fault(CloseReason),
}

struct Driver {
    connection: TcpConnection,
    mailbox: mpsc::UnboundedReceiver<Command>,
    pending: VecDeque<Vec<u8>>,
    receiving: bool,
}

impl Driver {
    fn new(connection: TcpConnection, mailbox: mpsc::UnboundedReceiver<Command>) -> Self {
        Self {
            connection,
            mailbox,
            pending: VecDeque::new(),
            receiving: false,
        }
    }

    async fn run(mut self, handshake: Handshake) {
        let stream = match handshake {
            Handshake::Accepted(stream) => stream,
            Handshake::Connect(endpoint) => match self.connect(endpoint).await {
                Some(stream) => stream,
                None => return,
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            trace!("Failed to set TCP_NODELAY on connection {}: {}", self.connection.id(), e);
        }
        if !self.connection.open() {
            self.connection.finish(CloseReason::Requested);
            return;
        }

        let (mut reader, writer) = stream.into_split();
        let mut writer = WriteSlot::Idle(writer);
        let mut buffer = vec![0u8; self.connection.inner.receive_buffer_size];

        let stop = loop {
            writer.flush(&mut self.pending);

            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(Command::QueueReceive) => self.receiving = true,
                    Some(Command::Send(payload)) => self.pending.push_back(payload),
                    Some(Command::Close) | None => break Stop::Requested,
                },
                read = reader.read(&mut buffer), if self.receiving && self.connection.is_open() => match read {
                    Ok(0) => break Stop::Fault(CloseReason::PeerClosed),
                    Ok(n) => {
                        trace!("📥 Connection {} received {} bytes", self.connection.id(), n);
                        self.receiving = false;
                        if self.connection.is_open() {
                            self.connection
                                .emit(ConnectionEvent::Received(self.connection.clone(), buffer[..n].to_vec()));
                        }
                    }
                    Err(e) => break Stop::Fault(CloseReason::Io {
                        operation: "receive",
                        error: e.to_string(),
                    }),
                },
                (half, written, result) = writer.completion() => {
                    writer = WriteSlot::Idle(half);
                    self.connection.inner.queued_bytes.fetch_sub(written, Ordering::AcqRel);
                    if let Err(e) = result {
                        break Stop::Fault(CloseReason::Io {
                            operation: "send",
                            error: e.to_string(),
                        });
                    }
                }
            }
        };

        match stop {
            Stop::Requested => {
                if let WriteSlot::Idle(mut half) = writer {
                    if let Err(e) = half.shutdown().await {
                        trace!("Shutdown of connection {} failed: {}", self.connection.id(), e);
                    }
                }
                self.connection.finish(CloseReason::Requested);
            }
            Stop::Fault(reason) => {
                match &reason {
                    CloseReason::PeerClosed => debug!(
                        "Connection {} ({:?}) closed by peer",
                        self.connection.id(),
                        self.connection.address()
                    ),
                    other => warn!(
                        "⚠️ Connection {} ({:?}): {}",
                        self.connection.id(),
                        self.connection.address(),
                        other
                    ),
                }
                self.connection.finish(reason);
            }
        }
    }

    /// Waits for the outbound connect while still taking commands.
    async fn connect(&mut self, endpoint: SocketAddr) -> Option<TcpStream> {
        let connecting = TcpStream::connect(endpoint);
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => match result {
                    Ok(stream) => return Some(stream),
                    Err(e) => {
                        warn!("⚠️ Connect to {} failed: {}", endpoint, e);
                        self.connection.finish(CloseReason::ConnectFailed(e.to_string()));
                        return None;
                    }
                },
                command = self.mailbox.recv() => match command {
                    Some(Command::QueueReceive) => self.receiving = true,
                    Some(Command::Send(payload)) => self.pending.push_back(payload),
                    Some(Command::Close) | None => {
                        self.connection.finish(CloseReason::Requested);
                        return None;
                    }
                },
            }
        }
    }
}
