//! Server configuration types and defaults.
//!
//! This module contains the dispatcher configuration structure and default values
//! used to initialize the session server. All values are fixed once the server
//! has been bound.

use crate::connection::{UdpOptions, MAX_DATAGRAM_SIZE};
use crate::error::ServerError;
use crate::user::MAX_CAPACITY;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Configuration structure for the session server.
///
/// Contains the listening endpoint, the session and connection limits and the
/// buffer sizing used by every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to accept stream connections on
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent sessions
    pub max_users: usize,

    /// Maximum number of stream connections alive at once, rejected ones included
    pub max_connections: usize,

    /// Bytes delivered per receive completion
    pub receive_buffer_size: usize,

    /// Optional datagram endpoint
    pub udp_bind_address: Option<SocketAddr>,

    /// Idle UDP write buffers kept for reuse
    pub write_buffer_pool_size: usize,

    /// Interval of the built-in cleanup timer in milliseconds (0 to disable)
    pub cleanup_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 7000)),
            max_users: 1000,
            max_connections: 1100,
            receive_buffer_size: 8192,
            udp_bind_address: None,
            write_buffer_pool_size: 64,
            cleanup_interval_ms: 1000,
        }
    }
}

impl ServerConfig {
    /// Checks the limits for consistency.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration can be used to bind a server, or a
    /// [`ServerError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_users == 0 {
            return Err(ServerError::Config("max_users must be greater than 0".into()));
        }
        if self.max_users > MAX_CAPACITY {
            return Err(ServerError::Config(format!(
                "max_users cannot exceed {}",
                MAX_CAPACITY
            )));
        }
        if self.max_connections < self.max_users {
            return Err(ServerError::Config(format!(
                "max_connections ({}) must be at least max_users ({})",
                self.max_connections, self.max_users
            )));
        }
        if self.receive_buffer_size == 0 {
            return Err(ServerError::Config(
                "receive_buffer_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Buffer sizing for the datagram endpoint.
    pub fn udp_options(&self) -> UdpOptions {
        UdpOptions {
            receive_buffer_size: self.receive_buffer_size.min(MAX_DATAGRAM_SIZE),
            write_buffer_pool_size: self.write_buffer_pool_size,
        }
    }
}
