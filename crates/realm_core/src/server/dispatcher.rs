//! Session dispatch.
//!
//! The [`Dispatcher`] owns the connection pool and the session collection and
//! turns each [`ConnectionEvent`] into session-scoped handler callbacks. It is
//! driven by a single task, so pool and session state is never shared.

use super::handlers::SessionHandler;
use crate::connection::{CloseReason, ConnectionEvent, ConnectionPool, TcpConnection};
use crate::user::Sessions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Maps transport events to sessions and enforces the session limit.
pub struct Dispatcher<H: SessionHandler> {
    handler: H,
    max_users: usize,
    sessions: Sessions<H::User>,
    connections: ConnectionPool,
    live: Arc<AtomicUsize>,
}

impl<H: SessionHandler> Dispatcher<H> {
    /// Creates a dispatcher admitting at most `max_users` sessions.
    pub fn new(handler: H, max_users: usize, connections: ConnectionPool) -> Self {
        Self::with_capacities(handler, max_users, max_users, connections)
    }

    /// Creates a dispatcher whose session pool holds `session_capacity`
    /// objects, independently of the `max_users` admission limit.
    pub fn with_capacities(
        handler: H,
        max_users: usize,
        session_capacity: usize,
        connections: ConnectionPool,
    ) -> Self {
        Self {
            handler,
            max_users,
            sessions: Sessions::new(session_capacity),
            connections,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Routes one connection event.
    pub async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected(connection) => self.connect_event(connection).await,
            ConnectionEvent::Received(connection, payload) => {
                self.receive_event(connection, &payload).await
            }
            ConnectionEvent::Closed(connection, reason) => {
                self.close_event(connection, reason).await
            }
        }
    }

    async fn connect_event(&mut self, connection: TcpConnection) {
        if self.sessions.len() >= self.max_users {
            info!(
                "🚫 Reached max number of users ({}), rejecting connection {} from {:?}",
                self.max_users,
                connection.id(),
                connection.address()
            );
            connection.close(CloseReason::CapacityReached);
            return;
        }

        let Some(id) = self.sessions.construct() else {
            error!(
                "Failed to allocate a session for connection {} from {:?}",
                connection.id(),
                connection.address()
            );
            connection.close(CloseReason::IdExhausted);
            return;
        };
        let Some(session) = self.sessions.get_mut(id) else {
            connection.close(CloseReason::IdExhausted);
            return;
        };

        session.bind(connection.clone());
        if !self.handler.on_connect(session).await {
            info!("Session {} rejected by protocol, closing connection {}", id, connection.id());
            self.sessions.destroy(id);
            connection.close(CloseReason::ProtocolRejected);
            return;
        }

        self.sessions.register(id);
        self.publish_count();
        info!(
            "👋 Session {} connected from {:?} ({} active)",
            id,
            connection.address(),
            self.sessions.len()
        );

        if let Err(e) = connection.queue_receive() {
            // The close event for this connection is already on its way.
            debug!("Could not arm receive for session {}: {}", id, e);
        }
    }

    async fn receive_event(&mut self, connection: TcpConnection, payload: &[u8]) {
        if !connection.is_open() {
            trace!(
                "Dropping {} bytes for connection {} ({})",
                payload.len(),
                connection.id(),
                connection.state()
            );
            return;
        }

        let session = self
            .sessions
            .find_by_connection(&connection)
            .and_then(|id| self.sessions.get_mut(id));

        match session {
            Some(session) => {
                self.handler.on_receive(session, payload).await;
                // Re-armed only after the handler has consumed this read
                if connection.is_open() {
                    if let Err(e) = connection.queue_receive() {
                        debug!("Could not re-arm receive on connection {}: {}", connection.id(), e);
                    }
                }
            }
            None => {
                error!(
                    "Received {} bytes on connection {} ({:?}) without a session, closing it",
                    payload.len(),
                    connection.id(),
                    connection.address()
                );
                connection.close(CloseReason::UnknownSession);
            }
        }
    }

    async fn close_event(&mut self, connection: TcpConnection, reason: CloseReason) {
        self.connections.destroy(connection.id());

        let Some(id) = self.sessions.find_by_connection(&connection) else {
            if reason.is_rejection() || reason == CloseReason::Shutdown {
                debug!("Connection {} closed without a session: {}", connection.id(), reason);
            } else {
                error!(
                    "No session found for closed connection {} ({:?}): {}",
                    connection.id(),
                    connection.address(),
                    reason
                );
            }
            return;
        };

        if let Some(session) = self.sessions.get_mut(id) {
            self.handler.on_close(session).await;
        }
        self.sessions.destroy(id);
        self.publish_count();

        match reason {
            CloseReason::Io { .. } => warn!("⚠️ Session {} disconnected: {}", id, reason),
            _ => info!("👋 Session {} disconnected: {}", id, reason),
        }
    }

    /// Runs the handler's periodic bookkeeping.
    pub async fn cleanup(&mut self) {
        self.handler.on_cleanup(&mut self.sessions).await;
    }

    /// Closes every pooled connection with `reason`.
    ///
    /// Sessions are destroyed as the resulting close events are handled.
    pub fn close_all(&self, reason: CloseReason) {
        for connection in self.connections.iter() {
            connection.close(reason.clone());
        }
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// The registered sessions.
    pub fn sessions(&self) -> &Sessions<H::User> {
        &self.sessions
    }

    /// The connection pool.
    pub fn connections(&self) -> &ConnectionPool {
        &self.connections
    }

    pub(crate) fn connections_mut(&mut self) -> &mut ConnectionPool {
        &mut self.connections
    }

    /// The protocol handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The protocol handler, mutably.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Shared counter mirroring [`session_count`](Self::session_count).
    pub(crate) fn live_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live)
    }

    fn publish_count(&self) {
        self.live.store(self.sessions.len(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{event_channel, ConnectionState, EventReceiver};
    use crate::test_support::{loopback_pair, next_event, next_record, Recorded, RecordingHandler};
    use crate::user::UserId;
    use tokio::net::TcpStream;

    fn dispatcher(
        handler: RecordingHandler,
        max_users: usize,
        session_capacity: usize,
    ) -> (Dispatcher<RecordingHandler>, EventReceiver) {
        let (events, rx) = event_channel();
        let pool = ConnectionPool::new(8, events, 1024);
        (
            Dispatcher::with_capacities(handler, max_users, session_capacity, pool),
            rx,
        )
    }

    /// Accepts a loopback socket into the dispatcher's pool and dispatches
    /// its `Connected` event.
    async fn connect(
        dispatcher: &mut Dispatcher<RecordingHandler>,
        rx: &mut EventReceiver,
    ) -> (TcpConnection, TcpStream) {
        let (server_side, client) = loopback_pair().await;
        let connection = dispatcher.connections_mut().construct().expect("pool room");
        connection.accept(server_side).expect("idle connection");

        let event = next_event(rx).await;
        assert!(matches!(&event, ConnectionEvent::Connected(c) if c.ptr_eq(&connection)));
        dispatcher.handle_event(event).await;
        (connection, client)
    }

    /// Dispatches the next event, which must be the close of `connection`.
    async fn dispatch_close(
        dispatcher: &mut Dispatcher<RecordingHandler>,
        rx: &mut EventReceiver,
        connection: &TcpConnection,
    ) -> CloseReason {
        let event = next_event(rx).await;
        let reason = match &event {
            ConnectionEvent::Closed(c, reason) if c.ptr_eq(connection) => reason.clone(),
            other => panic!("unexpected event {other:?}"),
        };
        dispatcher.handle_event(event).await;
        reason
    }

    #[tokio::test]
    async fn test_capacity_rejects_without_creating_session() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (mut dispatcher, mut rx) = dispatcher(handler, 1, 1);

        let (a, _client_a) = connect(&mut dispatcher, &mut rx).await;
        assert_eq!(next_record(&mut records).await, Recorded::Connect(UserId::new(0)));
        assert_eq!(dispatcher.session_count(), 1);
        assert!(a.is_open());

        let (b, _client_b) = connect(&mut dispatcher, &mut rx).await;
        assert_eq!(b.close_reason(), Some(CloseReason::CapacityReached));
        assert_eq!(
            dispatch_close(&mut dispatcher, &mut rx, &b).await,
            CloseReason::CapacityReached
        );

        assert_eq!(dispatcher.session_count(), 1);
        assert_eq!(dispatcher.connections().len(), 1);
        assert!(records.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_id_exhaustion_is_distinguished_from_capacity() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (mut dispatcher, mut rx) = dispatcher(handler, 2, 1);

        let (_a, _client_a) = connect(&mut dispatcher, &mut rx).await;
        next_record(&mut records).await;

        let (b, _client_b) = connect(&mut dispatcher, &mut rx).await;
        assert_eq!(
            dispatch_close(&mut dispatcher, &mut rx, &b).await,
            CloseReason::IdExhausted
        );
        assert_eq!(dispatcher.session_count(), 1);
        assert!(records.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_protocol_rejection_releases_id() {
        let (handler, mut records) = RecordingHandler::new(false);
        let (mut dispatcher, mut rx) = dispatcher(handler, 1, 1);

        let (c, _client) = connect(&mut dispatcher, &mut rx).await;
        assert_eq!(next_record(&mut records).await, Recorded::Connect(UserId::new(0)));
        assert_eq!(
            dispatch_close(&mut dispatcher, &mut rx, &c).await,
            CloseReason::ProtocolRejected
        );
        assert_eq!(c.state(), ConnectionState::Closed);
        assert_eq!(dispatcher.session_count(), 0);
        assert_eq!(dispatcher.sessions().allocated(), 0);

        dispatcher.handler_mut().accept = true;
        let (_d, _client_d) = connect(&mut dispatcher, &mut rx).await;
        assert_eq!(next_record(&mut records).await, Recorded::Connect(UserId::new(0)));
        assert_eq!(dispatcher.session_count(), 1);
    }

    #[tokio::test]
    async fn test_receive_without_session_closes_connection() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (mut dispatcher, mut rx) = dispatcher(handler, 1, 1);

        let (stranger_side, _client) = loopback_pair().await;
        let (stranger_events, mut stranger_rx) = event_channel();
        let stranger = TcpConnection::new(stranger_events, 1024);
        stranger.accept(stranger_side).expect("idle connection");
        next_event(&mut stranger_rx).await;

        dispatcher
            .handle_event(ConnectionEvent::Received(stranger.clone(), b"stale".to_vec()))
            .await;
        assert_eq!(stranger.close_reason(), Some(CloseReason::UnknownSession));

        let closed = next_event(&mut stranger_rx).await;
        dispatcher.handle_event(closed).await;
        assert!(records.try_recv().is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_receive_and_close_reach_handler_once() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (mut dispatcher, mut rx) = dispatcher(handler, 1, 1);

        let (a, mut client) = connect(&mut dispatcher, &mut rx).await;
        let id = match next_record(&mut records).await {
            Recorded::Connect(id) => id,
            other => panic!("unexpected record {other:?}"),
        };

        tokio::io::AsyncWriteExt::write_all(&mut client, b"hello")
            .await
            .expect("client write");
        let event = next_event(&mut rx).await;
        dispatcher.handle_event(event).await;
        assert_eq!(
            next_record(&mut records).await,
            Recorded::Receive(id, b"hello".to_vec())
        );
        assert_eq!(
            dispatcher.sessions().get(id).map(|s| s.user().received),
            Some(1)
        );

        a.disconnect();
        a.disconnect();
        assert_eq!(
            dispatch_close(&mut dispatcher, &mut rx, &a).await,
            CloseReason::Requested
        );
        assert_eq!(next_record(&mut records).await, Recorded::Close(id));
        assert_eq!(dispatcher.session_count(), 0);
        assert!(dispatcher.connections().is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(records.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_receive_after_handler_disconnects() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (mut dispatcher, mut rx) = dispatcher(handler.disconnecting(), 1, 1);

        let (a, mut client) = connect(&mut dispatcher, &mut rx).await;
        let id = match next_record(&mut records).await {
            Recorded::Connect(id) => id,
            other => panic!("unexpected record {other:?}"),
        };

        tokio::io::AsyncWriteExt::write_all(&mut client, b"a")
            .await
            .expect("client write");
        let event = next_event(&mut rx).await;
        assert!(matches!(&event, ConnectionEvent::Received(_, p) if p == b"a"));
        dispatcher.handle_event(event).await;
        assert_eq!(next_record(&mut records).await, Recorded::Receive(id, b"a".to_vec()));
        assert!(!a.is_open());

        // A read that completed before the close must not reach the handler
        dispatcher
            .handle_event(ConnectionEvent::Received(a.clone(), b"late".to_vec()))
            .await;

        for chunk in [b"b", b"c"] {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            let _ = tokio::io::AsyncWriteExt::write_all(&mut client, chunk).await;
        }

        assert_eq!(
            dispatch_close(&mut dispatcher, &mut rx, &a).await,
            CloseReason::Requested
        );
        assert_eq!(next_record(&mut records).await, Recorded::Close(id));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(records.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cleanup_sees_active_sessions() {
        let (handler, mut records) = RecordingHandler::new(true);
        let (mut dispatcher, mut rx) = dispatcher(handler, 2, 2);

        let (_a, _client_a) = connect(&mut dispatcher, &mut rx).await;
        next_record(&mut records).await;
        dispatcher.cleanup().await;
        assert_eq!(next_record(&mut records).await, Recorded::Cleanup(1));
    }
}
