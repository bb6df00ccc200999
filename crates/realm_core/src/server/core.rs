//! Core session server implementation.
//!
//! This module contains the main `Server` struct: the accept loop, the event
//! loop feeding the [`Dispatcher`], the optional cleanup timer and graceful
//! shutdown.

use super::dispatcher::Dispatcher;
use super::handlers::SessionHandler;
use crate::config::ServerConfig;
use crate::connection::{
    event_channel, CloseReason, ConnectionEvent, ConnectionPool, EventReceiver,
};
use crate::error::ServerError;
use crate::shutdown::ShutdownState;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};
use tracing::{error, info, trace, warn};

/// How long shutdown waits for close events before giving up.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The session server.
///
/// `Server` owns the listening socket and a [`Dispatcher`]. Its [`run`](Self::run)
/// loop keeps exactly one accept pending, hands every accepted socket to a
/// pooled [`TcpConnection`](crate::connection::TcpConnection) and dispatches
/// the events those connections report, all from one task.
///
/// # Architecture
///
/// * **Acceptor**: a single `TcpListener`, re-armed after every outcome
/// * **Connection pool**: bounded by `max_connections`
/// * **Session pool**: bounded by `max_users`
/// * **Cleanup timer**: calls `on_cleanup` every `cleanup_interval_ms`
pub struct Server<H: SessionHandler> {
    /// Server configuration settings
    config: ServerConfig,

    /// Listening socket
    listener: TcpListener,

    /// Address the listener is bound to
    local_addr: SocketAddr,

    /// Session state and protocol callbacks
    dispatcher: Dispatcher<H>,

    /// Events from every pooled connection
    events: EventReceiver,

    /// Shared state for coordinating shutdown
    shutdown: ShutdownState,
}

impl<H: SessionHandler> Server<H> {
    /// Binds a new server.
    ///
    /// # Arguments
    ///
    /// * `config` - Configuration parameters, validated before binding
    /// * `handler` - Protocol callbacks
    ///
    /// # Returns
    ///
    /// The bound server, or a `ServerError` if the configuration is invalid or
    /// the listener could not be bound.
    pub async fn bind(config: ServerConfig, handler: H) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_address)
            .await
            .map_err(|e| {
                ServerError::Network(format!("Failed to bind {}: {e}", config.bind_address))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Network(format!("Failed to read local address: {e}")))?;

        let (sender, events) = event_channel();
        let connections =
            ConnectionPool::new(config.max_connections, sender, config.receive_buffer_size);
        let dispatcher = Dispatcher::new(handler, config.max_users, connections);

        info!(
            "🚀 Session server bound on {} (max users: {}, max connections: {})",
            local_addr, config.max_users, config.max_connections
        );

        Ok(Self {
            config,
            listener,
            local_addr,
            dispatcher,
            events,
            shutdown: ShutdownState::new(),
        })
    }

    /// Uses `shutdown` instead of the server's own shutdown state.
    pub fn with_shutdown_state(mut self, shutdown: ShutdownState) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Returns a clonable handle for observing and stopping the server from
    /// other tasks.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            sessions: self.dispatcher.live_counter(),
            local_addr: self.local_addr,
        }
    }

    /// Runs the accept and event loops until shutdown is initiated.
    ///
    /// # Shutdown Sequence
    ///
    /// 1. Stop accepting
    /// 2. Close every pooled connection with [`CloseReason::Shutdown`]
    /// 3. Dispatch close events until the pool is empty or the drain times out
    /// 4. Mark shutdown complete
    pub async fn run(&mut self) -> Result<(), ServerError> {
        info!("🌐 Accepting sessions on {}", self.local_addr);

        let mut cleanup = (self.config.cleanup_interval_ms > 0).then(|| {
            let mut ticker = interval(Duration::from_millis(self.config.cleanup_interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    info!("🛑 Accept loop stopping - shutdown initiated");
                    break;
                }
                accepted = self.listener.accept() => self.accept(accepted),
                Some(event) = self.events.recv() => self.dispatcher.handle_event(event).await,
                _ = tick(&mut cleanup) => self.dispatcher.cleanup().await,
            }
        }

        self.drain().await;
        Ok(())
    }

    /// Invokes the handler's `on_cleanup` once.
    pub async fn cleanup(&mut self) {
        self.dispatcher.cleanup().await;
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.dispatcher.session_count()
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher<H> {
        &self.dispatcher
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                return;
            }
        };

        let Some(connection) = self.dispatcher.connections_mut().construct() else {
            error!(
                "Connection pool exhausted ({} in use), dropping {}",
                self.dispatcher.connections().capacity(),
                addr
            );
            return;
        };

        trace!("🔗 Accepted {} as connection {}", addr, connection.id());
        if let Err(e) = connection.accept(stream) {
            error!("Failed to start connection {}: {}", connection.id(), e);
        }
    }

    async fn drain(&mut self) {
        info!("🧹 Performing server cleanup...");
        self.dispatcher.close_all(CloseReason::Shutdown);

        let deadline = tokio::time::sleep(SHUTDOWN_DRAIN_TIMEOUT);
        tokio::pin!(deadline);

        while !self.dispatcher.connections().is_empty() {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(ConnectionEvent::Connected(connection)) => {
                        connection.close(CloseReason::Shutdown)
                    }
                    Some(event) => self.dispatcher.handle_event(event).await,
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        "⚠️ Shutdown drain timed out with {} connection(s) still open",
                        self.dispatcher.connections().len()
                    );
                    break;
                }
            }
        }

        self.shutdown.complete_shutdown();
        info!("✅ Server cleanup completed");
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Clonable handle to a running [`Server`].
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: ShutdownState,
    sessions: Arc<AtomicUsize>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Acquire)
    }

    /// Address the server's listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Initiates graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.initiate_shutdown();
    }

    /// The shutdown state shared with the server.
    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.shutdown
    }
}
