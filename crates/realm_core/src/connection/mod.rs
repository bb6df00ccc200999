//! Transport connections.
//!
//! This module holds the stream ([`TcpConnection`]) and datagram
//! ([`UdpConnection`]) transports, the pool the dispatcher allocates stream
//! connections from, and the events a stream connection reports upward.

pub mod buffer;
pub mod pool;
pub mod tcp;
pub mod udp;

pub use buffer::{WriteBuffer, WriteBufferPool, MAX_DATAGRAM_SIZE};
pub use pool::ConnectionPool;
pub use tcp::{TcpConnection, WRITE_QUEUE_LIMIT};
pub use udp::{Datagram, UdpConnection, UdpOptions};

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Type alias for connection identifiers.
///
/// Connection IDs are used to uniquely identify stream connections
/// throughout their lifecycle on the server.
pub type ConnectionId = usize;

static NEXT_CONNECTION_ID: AtomicUsize = AtomicUsize::new(1);

pub(crate) fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle of a stream connection.
///
/// `Closed` is terminal; a connection never goes back to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, neither accepting nor connecting yet
    Idle,
    /// Accept or connect in progress
    Connecting,
    /// Socket established, reads and writes allowed
    Open,
    /// Close requested, waiting for the driver to shut the socket down
    Closing,
    /// Socket released and close event fired
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why a stream connection was closed.
///
/// Only the first reason recorded on a connection is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close`/`disconnect` called by the owner
    Requested,
    /// The peer shut down its side (zero-length read)
    PeerClosed,
    /// A socket operation failed
    Io {
        /// Operation that failed, e.g. `"receive"` or `"send"`
        operation: &'static str,
        /// Error description
        error: String,
    },
    /// The outbound connect attempt failed
    ConnectFailed(String),
    /// Rejected because the session limit was reached
    CapacityReached,
    /// Rejected because no session id was left
    IdExhausted,
    /// Rejected by the protocol handler's `on_connect`
    ProtocolRejected,
    /// Closed because an event arrived for a connection with no session
    UnknownSession,
    /// Closed by server shutdown
    Shutdown,
}

impl CloseReason {
    /// Returns true for closes issued while refusing a connection, before any
    /// session was registered for it.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CloseReason::CapacityReached
                | CloseReason::IdExhausted
                | CloseReason::ProtocolRejected
                | CloseReason::UnknownSession
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("closed by owner"),
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::Io { operation, error } => write!(f, "{operation} failed: {error}"),
            CloseReason::ConnectFailed(error) => write!(f, "connect failed: {error}"),
            CloseReason::CapacityReached => f.write_str("reached max number of users"),
            CloseReason::IdExhausted => f.write_str("no session id available"),
            CloseReason::ProtocolRejected => f.write_str("rejected by protocol"),
            CloseReason::UnknownSession => f.write_str("no session for connection"),
            CloseReason::Shutdown => f.write_str("server shutting down"),
        }
    }
}

/// Events a stream connection reports to its owner.
///
/// Every connection that fires `Connected` later fires exactly one `Closed`.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Accept or connect completed; the connection is open
    Connected(TcpConnection),
    /// One read completed with the given bytes
    Received(TcpConnection, Vec<u8>),
    /// The connection reached `Closed`
    Closed(TcpConnection, CloseReason),
}

impl ConnectionEvent {
    /// The connection the event belongs to.
    pub fn connection(&self) -> &TcpConnection {
        match self {
            ConnectionEvent::Connected(connection)
            | ConnectionEvent::Received(connection, _)
            | ConnectionEvent::Closed(connection, _) => connection,
        }
    }
}

/// Sending side of a connection event channel.
pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

/// Receiving side of a connection event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Creates a connection event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
