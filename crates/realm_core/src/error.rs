//! Error types and handling for the session core.
//!
//! This module defines the error types that can occur during server operations,
//! providing clear categorization of different failure modes. Pool exhaustion is
//! deliberately absent: running out of ids or connection slots is signalled by an
//! empty result, never by an error.

use crate::connection::ConnectionState;

/// Enumeration of possible server errors.
///
/// Categorizes errors into network-related and configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid or inconsistent configuration values
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors returned when a connection handle is used in a way its current
/// state does not allow.
///
/// Transport failures are not reported here; they close the connection and
/// surface as a [`CloseReason`](crate::connection::CloseReason) on the close event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The operation needs a connecting or open connection
    #[error("connection is {0}, operation requires an open connection")]
    NotOpen(ConnectionState),

    /// `accept`/`connect` called on a connection that already left `Idle`
    #[error("connection already started (state: {0})")]
    AlreadyStarted(ConnectionState),

    /// Payload does not fit into a single datagram
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected payload
        size: usize,
        /// Largest accepted payload
        limit: usize,
    },

    /// The task driving the socket has already stopped
    #[error("connection driver has stopped")]
    Stopped,

    /// Too many bytes are already waiting to be written
    #[error("write queue holds {queued} bytes, limit is {limit}")]
    WriteQueueFull {
        /// Bytes queued when the send was refused
        queued: usize,
        /// Largest number of queued bytes
        limit: usize,
    },
}
