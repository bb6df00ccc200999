//! Sessions and the dispatcher's session collection.
//!
//! A [`Session`] is a registered network user: an id from the session pool, the
//! stream connection it is bound to, and whatever per-user state the protocol
//! layer keeps. The session never owns its connection; destroying one does not
//! close the other.

use super::id::UserId;
use super::pool::ObjectPool;
use crate::connection::tcp::TcpConnection;
use crate::error::ConnectionError;
use std::net::SocketAddr;

/// A live network user bound to one stream connection.
#[derive(Debug)]
pub struct Session<U> {
    id: UserId,
    connection: Option<TcpConnection>,
    user: U,
}

impl<U: Default> Session<U> {
    pub(crate) fn new(id: UserId) -> Self {
        Self {
            id,
            connection: None,
            user: U::default(),
        }
    }
}

impl<U> Session<U> {
    /// The session's id.
    pub fn id(&self) -> UserId {
        self.id
    }

    /// The connection this session is bound to.
    pub fn connection(&self) -> Option<&TcpConnection> {
        self.connection.as_ref()
    }

    /// Returns true if this session is bound to exactly `connection`.
    pub fn is_bound_to(&self, connection: &TcpConnection) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|bound| bound.ptr_eq(connection))
    }

    /// Remote address of the bound connection.
    pub fn address(&self) -> Option<SocketAddr> {
        self.connection.as_ref().and_then(TcpConnection::address)
    }

    /// Protocol-owned state.
    pub fn user(&self) -> &U {
        &self.user
    }

    /// Protocol-owned state, mutably.
    pub fn user_mut(&mut self) -> &mut U {
        &mut self.user
    }

    /// Queues `payload` on the bound connection.
    pub fn send(&self, payload: impl Into<Vec<u8>>) -> Result<(), ConnectionError> {
        match &self.connection {
            Some(connection) => connection.send(payload),
            None => Err(ConnectionError::Stopped),
        }
    }

    /// Requests the bound connection to close.
    ///
    /// The session itself is destroyed once the close event is dispatched.
    pub fn disconnect(&self) {
        if let Some(connection) = &self.connection {
            connection.disconnect();
        }
    }

    pub(crate) fn bind(&mut self, connection: TcpConnection) {
        self.connection = Some(connection);
    }
}

/// The dispatcher's collection of sessions.
///
/// Sessions are stored in a fixed-capacity [`ObjectPool`]; the active list keeps
/// the ids of sessions whose `on_connect` accepted them, in registration order.
#[derive(Debug)]
pub struct Sessions<U> {
    factory: ObjectPool<Session<U>>,
    active: Vec<UserId>,
}

impl<U: Default> Sessions<U> {
    /// Creates an empty collection with room for `capacity` sessions.
    pub fn new(capacity: usize) -> Self {
        Self {
            factory: ObjectPool::new(capacity),
            active: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn construct(&mut self) -> Option<UserId> {
        self.factory.construct(Session::new)
    }
}

impl<U> Sessions<U> {
    pub(crate) fn register(&mut self, id: UserId) {
        if !self.active.contains(&id) {
            self.active.push(id);
        }
    }

    /// Releases the session's id, frees its slot and drops it from the active list.
    pub(crate) fn destroy(&mut self, id: UserId) -> Option<Session<U>> {
        let session = self.factory.destroy(id);
        self.active.retain(|active| *active != id);
        session
    }

    /// Resolves a connection to the active session bound to it.
    pub fn find_by_connection(&self, connection: &TcpConnection) -> Option<UserId> {
        self.active.iter().copied().find(|id| {
            self.factory
                .get(*id)
                .is_some_and(|session| session.is_bound_to(connection))
        })
    }

    /// Returns the session stored under `id`, registered or not.
    pub fn get(&self, id: UserId) -> Option<&Session<U>> {
        self.factory.get(id)
    }

    /// Returns the session stored under `id` mutably.
    pub fn get_mut(&mut self, id: UserId) -> Option<&mut Session<U>> {
        self.factory.get_mut(id)
    }

    /// Iterates over active sessions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Session<U>> {
        self.active.iter().filter_map(|id| self.factory.get(*id))
    }

    /// Ids of active sessions in registration order.
    pub fn ids(&self) -> &[UserId] {
        &self.active
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Returns true when no session is active.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Number of session objects alive in the pool, including ones still
    /// waiting for `on_connect`.
    pub fn allocated(&self) -> usize {
        self.factory.len()
    }

    /// Maximum number of session objects.
    pub fn capacity(&self) -> usize {
        self.factory.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Account {
        logins: u32,
    }

    #[test]
    fn test_construct_register_destroy_cycle() {
        let mut sessions: Sessions<Account> = Sessions::new(2);
        let id = sessions.construct().expect("room");
        assert_eq!(sessions.allocated(), 1);
        assert!(sessions.is_empty());

        sessions.register(id);
        sessions.register(id);
        assert_eq!(sessions.len(), 1);

        sessions
            .get_mut(id)
            .expect("live session")
            .user_mut()
            .logins += 1;
        assert_eq!(sessions.get(id).map(|s| s.user().logins), Some(1));

        let destroyed = sessions.destroy(id).expect("live session");
        assert_eq!(destroyed.id(), id);
        assert!(sessions.is_empty());
        assert_eq!(sessions.allocated(), 0);
    }

    #[test]
    fn test_unbound_session_cannot_send() {
        let mut sessions: Sessions<Account> = Sessions::new(1);
        let id = sessions.construct().expect("room");
        let session = sessions.get(id).expect("live session");

        assert!(session.connection().is_none());
        assert!(session.address().is_none());
        assert_eq!(session.send(b"hello".to_vec()), Err(ConnectionError::Stopped));
        session.disconnect();
    }

    #[test]
    fn test_capacity_exhaustion() {
        let mut sessions: Sessions<Account> = Sessions::new(1);
        assert!(sessions.construct().is_some());
        assert!(sessions.construct().is_none());
        assert_eq!(sessions.capacity(), 1);
    }
}
