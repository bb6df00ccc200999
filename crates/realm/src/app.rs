//! Main application logic and lifecycle management.
//!
//! This module contains the `Application` struct that binds the session server,
//! runs it alongside the optional datagram responder, and shuts both down in
//! phases when a termination signal arrives.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    protocol::{spawn_datagram_echo, EchoProtocol},
    signals::{exit_on_second_signal, setup_signal_handlers},
};
use realm_core::{Datagram, Server, ServerHandle, ShutdownState, UdpConnection};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// How often the health report is logged.
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound for each shutdown phase.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(8);

/// Main application struct.
///
/// The `Application` struct manages the complete lifecycle of the Realm server:
/// configuration loading, binding, health reporting and graceful shutdown.
///
/// # Architecture
///
/// * **Configuration Management**: Loads and validates configuration from files and CLI
/// * **Server Orchestration**: Binds the session server with the echo protocol
/// * **Datagram Endpoint**: Optionally echoes datagrams on a UDP socket
/// * **Graceful Shutdown**: Closes every session before exiting
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Bound session server
    server: Server<EchoProtocol>,
    /// Bound datagram socket and its inbox, if configured
    datagrams: Option<(UdpConnection, UnboundedReceiver<Datagram>)>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A bound `Application` ready to run, or an error if configuration or
    /// binding failed.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Bind the session server and the datagram socket
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        args.apply_overrides(&mut config);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        display_banner();

        let server_config = config.to_server_config()?;
        let udp_bind_address = server_config.udp_bind_address;
        let udp_options = server_config.udp_options();

        let protocol = EchoProtocol::new(config.server.idle_timeout());
        let server = Server::bind(server_config, protocol).await?;

        let datagrams = match udp_bind_address {
            Some(addr) => {
                let (socket, inbox) = UdpConnection::bind(addr, udp_options).await?;
                info!("📡 Datagram echo bound on {}", socket.local_addr());
                Some((socket, inbox))
            }
            None => None,
        };

        info!(
            "📂 Config: {} | Stream: {} | Datagram: {}",
            args.config_path.display(),
            server.local_addr(),
            datagrams
                .as_ref()
                .map(|(socket, _)| socket.local_addr().to_string())
                .unwrap_or_else(|| "disabled".to_string())
        );

        Ok(Self {
            config,
            server,
            datagrams,
        })
    }

    /// Runs the application until a termination signal arrives.
    ///
    /// # Returns
    ///
    /// `Ok(())` once every session has been closed and the server task has
    /// finished, or an error if signal handling could not be installed.
    ///
    /// # Shutdown Phases
    ///
    /// 1. Stop health reporting and the accept loop
    /// 2. Wait for the server to close every session
    /// 3. Stop the datagram responder
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Realm Session Server");

        self.log_configuration_summary();

        let shutdown_state = ShutdownState::new();
        let mut server = self.server.with_shutdown_state(shutdown_state.clone());
        let handle = server.handle();

        let server_task = tokio::spawn(async move {
            match server.run().await {
                Ok(()) => {
                    info!("✅ Server completed successfully");
                }
                Err(e) => {
                    error!("❌ Server error: {:?}", e);
                    std::process::exit(1);
                }
            }
            server
        });

        let datagram_task = self.datagrams.map(|(socket, inbox)| {
            let responder = socket.clone();
            (socket, spawn_datagram_echo(responder, inbox))
        });

        let monitoring_task = spawn_health_report(handle.clone());

        info!("✅ Realm Server is now running!");
        info!("🎮 Ready to accept sessions on {}", handle.local_addr());
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        setup_signal_handlers().await?;

        exit_on_second_signal();

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");

        info!("📡 Phase 1: Stopping health reports and the accept loop...");
        monitoring_task.abort();
        shutdown_state.initiate_shutdown();

        info!("⏳ Phase 2: Waiting for sessions to close...");
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown_state.wait_complete())
            .await
            .is_err()
        {
            warn!("⏰ Sessions still open after {:?}", SHUTDOWN_TIMEOUT);
        }
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await {
            Ok(Ok(server)) => {
                info!(
                    "✅ Server task completed gracefully ({} sessions served)",
                    server.dispatcher().handler().total_sessions()
                );
            }
            Ok(Err(e)) => {
                error!("❌ Server task failed: {}", e);
            }
            Err(_) => {
                warn!("⏰ Server task did not complete within timeout, proceeding with cleanup");
            }
        }

        if let Some((socket, task)) = datagram_task {
            info!("🔌 Phase 3: Stopping datagram responder...");
            socket.unregister();
            task.abort();
        }

        info!("📊 Final Statistics:");
        info!("  - Active sessions: {}", handle.session_count());
        info!(
            "  - Shutdown complete: {}",
            shutdown_state.is_shutdown_complete()
        );

        info!("✅ Realm Server shutdown complete");
        info!("👋 Farewell from Realm!");

        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!(
            "  📡 UDP bind address: {}",
            self.config
                .server
                .udp_bind_address
                .as_deref()
                .unwrap_or("disabled")
        );
        info!("  👥 Max users: {}", self.config.server.max_users);
        info!(
            "  🔗 Max connections: {}",
            self.config.server.max_connections
        );
        info!(
            "  ⏱️ Connection timeout: {}s",
            self.config.server.connection_timeout
        );
    }
}

/// Logs the live session count periodically.
fn spawn_health_report(handle: ServerHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_INTERVAL);
        let mut last_count = 0usize;

        loop {
            interval.tick().await;

            let count = handle.session_count();
            info!(
                "📊 System Health - {} active sessions ({:+} since last report)",
                count,
                count as i64 - last_count as i64
            );
            last_count = count;
        }
    })
}
