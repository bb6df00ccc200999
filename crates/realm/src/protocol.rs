//! Reference protocol served by the `realm` binary.
//!
//! [`EchoProtocol`] echoes every stream payload back to its sender and sweeps
//! out sessions that stay silent for too long. [`spawn_datagram_echo`] does the
//! same for datagrams when a UDP endpoint is configured.

use async_trait::async_trait;
use realm_core::{Datagram, Session, SessionHandler, Sessions, UdpConnection};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Per-session bookkeeping kept by [`EchoProtocol`].
#[derive(Debug, Clone, Copy)]
pub struct Activity {
    /// Last time the peer sent anything
    pub last_seen: Instant,
    /// Total bytes echoed back
    pub echoed: u64,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            last_seen: Instant::now(),
            echoed: 0,
        }
    }
}

/// Echo protocol with an idle sweep.
#[derive(Debug, Clone)]
pub struct EchoProtocol {
    idle_timeout: Duration,
    total_sessions: u64,
}

impl EchoProtocol {
    /// Creates the protocol.
    ///
    /// # Arguments
    ///
    /// * `idle_timeout` - Silence after which the cleanup sweep disconnects a session
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            total_sessions: 0,
        }
    }

    /// Number of sessions accepted since start.
    pub fn total_sessions(&self) -> u64 {
        self.total_sessions
    }
}

#[async_trait]
impl SessionHandler for EchoProtocol {
    type User = Activity;

    async fn on_connect(&mut self, session: &mut Session<Activity>) -> bool {
        self.total_sessions += 1;
        session.user_mut().last_seen = Instant::now();
        info!(
            "🔗 Session {} connected from {:?}",
            session.id(),
            session.address()
        );
        true
    }

    async fn on_receive(&mut self, session: &mut Session<Activity>, payload: &[u8]) {
        trace!("Session {} sent {} bytes", session.id(), payload.len());
        let activity = session.user_mut();
        activity.last_seen = Instant::now();
        activity.echoed += payload.len() as u64;

        if let Err(e) = session.send(payload) {
            warn!("⚠️ Failed to echo to session {}: {}", session.id(), e);
        }
    }

    async fn on_close(&mut self, session: &mut Session<Activity>) {
        info!(
            "👋 Session {} closed after echoing {} bytes",
            session.id(),
            session.user().echoed
        );
    }

    async fn on_cleanup(&mut self, sessions: &mut Sessions<Activity>) {
        let now = Instant::now();
        let mut swept = 0usize;
        for session in sessions.iter() {
            if now.duration_since(session.user().last_seen) >= self.idle_timeout {
                debug!("🧹 Session {} idle for too long, disconnecting", session.id());
                session.disconnect();
                swept += 1;
            }
        }
        if swept > 0 {
            info!("🧹 Idle sweep disconnected {} session(s)", swept);
        }
    }
}

/// Echoes every datagram back to its sender until the inbox closes.
///
/// Arms the socket's receive loop before returning.
pub fn spawn_datagram_echo(
    socket: UdpConnection,
    mut inbox: UnboundedReceiver<Datagram>,
) -> JoinHandle<()> {
    socket.queue_receive_from();
    tokio::spawn(async move {
        while let Some(datagram) = inbox.recv().await {
            if let Err(e) = socket.send_to(datagram.from, &datagram.payload) {
                warn!("⚠️ Failed to echo datagram to {}: {}", datagram.from, e);
            }
        }
        debug!("Datagram echo on {} stopped", socket.local_addr());
    })
}
