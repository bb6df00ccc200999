//! Pool of stream connections owned by the dispatcher.
//!
//! This module tracks every stream connection the dispatcher has allocated, from
//! accept until its close event has been handled, and bounds how many can exist
//! at once.

use super::{ConnectionId, EventSender, TcpConnection};
use std::collections::HashMap;
use tracing::{debug, info};

/// Fixed-capacity table of stream connections.
///
/// # Architecture
///
/// * Connections are keyed by their process-unique [`ConnectionId`]
/// * Every connection reports to the same event sender
/// * Allocation beyond `capacity` fails with `None`
#[derive(Debug)]
pub struct ConnectionPool {
    capacity: usize,
    connections: HashMap<ConnectionId, TcpConnection>,
    events: EventSender,
    receive_buffer_size: usize,
}

impl ConnectionPool {
    /// Creates an empty pool.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of connections alive at once
    /// * `events` - Event sink handed to every connection
    /// * `receive_buffer_size` - Receive buffer size for every connection
    pub fn new(capacity: usize, events: EventSender, receive_buffer_size: usize) -> Self {
        Self {
            capacity,
            connections: HashMap::with_capacity(capacity),
            events,
            receive_buffer_size,
        }
    }

    /// Allocates an idle connection.
    ///
    /// # Returns
    ///
    /// The new connection, or `None` if the pool is full.
    pub fn construct(&mut self) -> Option<TcpConnection> {
        if self.connections.len() >= self.capacity {
            return None;
        }

        let connection = TcpConnection::new(self.events.clone(), self.receive_buffer_size);
        self.connections.insert(connection.id(), connection.clone());
        debug!("🔗 Connection {} allocated", connection.id());
        Some(connection)
    }

    /// Releases the slot held by connection `id`.
    ///
    /// Does not close the connection; callers destroy connections that have
    /// already reported `Closed`.
    pub fn destroy(&mut self, id: ConnectionId) -> Option<TcpConnection> {
        let connection = self.connections.remove(&id)?;
        info!(
            "❌ Connection {} from {:?} released",
            id,
            connection.address()
        );
        Some(connection)
    }

    /// Returns connection `id` if it is still pooled.
    pub fn get(&self, id: ConnectionId) -> Option<&TcpConnection> {
        self.connections.get(&id)
    }

    /// Iterates over pooled connections in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &TcpConnection> {
        self.connections.values()
    }

    /// Number of pooled connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true when no connection is pooled.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of pooled connections.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{event_channel, ConnectionState};

    #[tokio::test]
    async fn test_construct_until_full() {
        let (events, _rx) = event_channel();
        let mut pool = ConnectionPool::new(2, events, 256);

        let first = pool.construct().expect("room");
        let second = pool.construct().expect("room");
        assert_ne!(first.id(), second.id());
        assert_eq!(first.state(), ConnectionState::Idle);
        assert!(pool.construct().is_none());

        assert!(pool.destroy(first.id()).is_some());
        assert!(pool.destroy(first.id()).is_none());
        assert!(pool.get(second.id()).is_some());
        assert!(pool.construct().is_some());
        assert_eq!(pool.len(), pool.capacity());
    }
}
