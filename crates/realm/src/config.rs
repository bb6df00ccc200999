//! Configuration management for the Realm session server.
//!
//! This module handles loading, validation, and conversion of server configuration
//! from TOML files and command-line arguments.

use realm_core::ServerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Application configuration loaded from TOML file.
///
/// This is the main configuration structure, split into the session server
/// settings and the logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
///
/// Controls network binding, session and connection limits, buffer sizing and
/// the idle sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to accept stream connections on (e.g., "127.0.0.1:7000")
    pub bind_address: String,
    /// Optional datagram endpoint; datagrams are echoed when set
    #[serde(default)]
    pub udp_bind_address: Option<String>,
    /// Maximum number of concurrent sessions
    #[serde(default = "default_max_users")]
    pub max_users: usize,
    /// Maximum number of stream connections alive at once
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Bytes read per receive completion
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,
    /// Idle datagram write buffers kept for reuse
    #[serde(default = "default_write_buffer_pool_size")]
    pub write_buffer_pool_size: usize,
    /// Seconds a session may stay silent before the sweep disconnects it
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Cleanup sweep interval in milliseconds (0 to disable)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,
}

/// Default for connection_timeout
pub fn default_connection_timeout() -> u64 {
    60
}

fn default_max_users() -> usize {
    1000
}

fn default_max_connections() -> usize {
    1100
}

fn default_receive_buffer_size() -> usize {
    8192
}

fn default_write_buffer_pool_size() -> usize {
    64
}

fn default_cleanup_interval() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Logging system configuration.
///
/// Controls log output format and level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7000".to_string(),
            udp_bind_address: None,
            max_users: default_max_users(),
            max_connections: default_max_connections(),
            receive_buffer_size: default_receive_buffer_size(),
            write_buffer_pool_size: default_write_buffer_pool_size(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval_ms: default_cleanup_interval(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl ServerSettings {
    /// Idle limit used by the cleanup sweep.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, creating a default one if missing.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration, or an error if the file could not be read,
    /// parsed or created.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the file settings into the core server configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let bind_address: SocketAddr = self.server.bind_address.parse()?;
        let udp_bind_address = self
            .server
            .udp_bind_address
            .as_deref()
            .map(str::parse::<SocketAddr>)
            .transpose()?;

        Ok(ServerConfig {
            bind_address,
            max_users: self.server.max_users,
            max_connections: self.server.max_connections,
            receive_buffer_size: self.server.receive_buffer_size,
            udp_bind_address,
            write_buffer_pool_size: self.server.write_buffer_pool_size,
            cleanup_interval_ms: self.server.cleanup_interval_ms,
        })
    }

    /// Validates the configuration.
    ///
    /// # Returns
    ///
    /// `Ok(())` if every setting is usable, or a message naming the first
    /// invalid one.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if let Some(udp) = &self.server.udp_bind_address {
            if udp.parse::<SocketAddr>().is_err() {
                return Err(format!("Invalid UDP bind address: {udp}"));
            }
        }

        if self.server.max_users == 0 {
            return Err("server.max_users must be greater than 0".to_string());
        }

        if self.server.max_users > realm_core::user::MAX_CAPACITY {
            return Err(format!(
                "server.max_users cannot exceed {}",
                realm_core::user::MAX_CAPACITY
            ));
        }

        if self.server.max_connections < self.server.max_users {
            return Err(format!(
                "server.max_connections ({}) must be at least server.max_users ({})",
                self.server.max_connections, self.server.max_users
            ));
        }

        if self.server.receive_buffer_size == 0 {
            return Err("server.receive_buffer_size must be greater than 0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
