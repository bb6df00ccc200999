//! Protocol callback interface.
//!
//! The dispatcher turns transport events into calls on a [`SessionHandler`].
//! Framing, decoding and game logic all live behind this trait; the core only
//! guarantees when and how often each callback runs.

use crate::user::{Session, Sessions};
use async_trait::async_trait;

/// Callbacks invoked by the dispatcher for each session.
///
/// All callbacks run on the dispatcher task, one at a time, so an
/// implementation needs no locking of its own.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use realm_core::{Session, SessionHandler};
///
/// struct Echo;
///
/// #[async_trait]
/// impl SessionHandler for Echo {
///     type User = ();
///
///     async fn on_connect(&mut self, _session: &mut Session<()>) -> bool {
///         true
///     }
///
///     async fn on_receive(&mut self, session: &mut Session<()>, payload: &[u8]) {
///         let _ = session.send(payload.to_vec());
///     }
///
///     async fn on_close(&mut self, _session: &mut Session<()>) {}
/// }
/// ```
#[async_trait]
pub trait SessionHandler: Send + 'static {
    /// Protocol-owned state stored in every session.
    type User: Default + Send + Sync + 'static;

    /// Called once when a connection has been accepted and capacity allows.
    ///
    /// # Returns
    ///
    /// `true` to register the session. `false` closes the connection and
    /// releases the session's id.
    async fn on_connect(&mut self, session: &mut Session<Self::User>) -> bool;

    /// Called once per completed read with the raw bytes received.
    async fn on_receive(&mut self, session: &mut Session<Self::User>, payload: &[u8]);

    /// Called exactly once per registered session, before it is destroyed.
    ///
    /// The session is still valid here; it must not be retained afterwards.
    async fn on_close(&mut self, session: &mut Session<Self::User>);

    /// Periodic bookkeeping, e.g. sweeping idle sessions.
    async fn on_cleanup(&mut self, _sessions: &mut Sessions<Self::User>) {
        // Default implementation does nothing
    }
}
