//! Utility functions and helper methods for the session server.
//!
//! This module provides convenient factory functions for binding server
//! instances with different configurations.

use crate::{config::ServerConfig, error::ServerError, server::Server, SessionHandler};

/// Binds a new server with default configuration.
///
/// This is a convenience function for quickly setting up a server with
/// sensible defaults for development and testing.
///
/// # Arguments
///
/// * `handler` - Protocol callbacks for every session
///
/// # Returns
///
/// A bound `Server`, or a `ServerError` if the default address is unavailable.
pub async fn create_server<H: SessionHandler>(handler: H) -> Result<Server<H>, ServerError> {
    Server::bind(ServerConfig::default(), handler).await
}

/// Binds a new server with custom configuration.
///
/// # Arguments
///
/// * `config` - A `ServerConfig` instance with desired settings
/// * `handler` - Protocol callbacks for every session
///
/// # Example
///
/// ```rust,no_run
/// # use async_trait::async_trait;
/// # use realm_core::{Session, SessionHandler};
/// # struct Echo;
/// # #[async_trait]
/// # impl SessionHandler for Echo {
/// #     type User = ();
/// #     async fn on_connect(&mut self, _: &mut Session<()>) -> bool { true }
/// #     async fn on_receive(&mut self, s: &mut Session<()>, p: &[u8]) { let _ = s.send(p.to_vec()); }
/// #     async fn on_close(&mut self, _: &mut Session<()>) {}
/// # }
/// # #[tokio::main]
/// # async fn main() -> Result<(), realm_core::ServerError> {
/// use realm_core::{create_server_with_config, ServerConfig};
///
/// let config = ServerConfig {
///     bind_address: "0.0.0.0:9000".parse().expect("valid address"),
///     max_users: 500,
///     max_connections: 550,
///     ..Default::default()
/// };
///
/// let mut server = create_server_with_config(config, Echo).await?;
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub async fn create_server_with_config<H: SessionHandler>(
    config: ServerConfig,
    handler: H,
) -> Result<Server<H>, ServerError> {
    Server::bind(config, handler).await
}
