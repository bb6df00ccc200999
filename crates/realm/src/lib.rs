//! # Realm Session Server - Main Entry Point
//!
//! Runs the realm_core session server with a reference echo protocol. This
//! entry point handles CLI parsing, configuration loading, logging and
//! application lifecycle management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! realm
//!
//! # Specify custom configuration
//! realm --config production.toml
//!
//! # Override specific settings
//! realm --bind 0.0.0.0:7000 --udp-bind 0.0.0.0:7001 --max-users 500 --log-level debug
//!
//! # JSON logging for production
//! realm --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! The server handles graceful shutdown on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)
//!
//! A second signal during shutdown exits immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod protocol;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the Realm server.
///
/// Handles the complete application lifecycle including:
/// 1. Command-line argument parsing
/// 2. Configuration loading and validation
/// 3. Logging system initialization
/// 4. Application creation and execution
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings come from the file, before anything else is logged
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();
    args.apply_overrides(&mut config);

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{LoggingSettings, ServerSettings};
pub use protocol::{spawn_datagram_echo, Activity, EchoProtocol};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let server_config = config
            .to_server_config()
            .expect("Default config should convert to ServerConfig");
        assert_eq!(server_config.max_users, 1000);
        assert_eq!(server_config.max_connections, 1100);
        assert_eq!(server_config.udp_bind_address, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_application_creation_binds_both_endpoints() {
        let dir = TempDir::new().expect("temp dir");
        let config_path = dir.path().join("realm.toml");
        let args = CliArgs::try_parse_from([
            "realm",
            "--config",
            config_path.to_str().expect("utf-8 path"),
            "--bind",
            "127.0.0.1:0",
            "--udp-bind",
            "127.0.0.1:0",
            "--max-users",
            "8",
        ])
        .expect("valid arguments");

        let app = Application::new(args).await.expect("application binds");
        assert!(config_path.exists());
        drop(app);
    }

    #[tokio::test]
    async fn test_application_rejects_invalid_override() {
        let dir = TempDir::new().expect("temp dir");
        let config_path = dir.path().join("realm.toml");
        let args = CliArgs::try_parse_from([
            "realm",
            "--config",
            config_path.to_str().expect("utf-8 path"),
            "--max-users",
            "0",
        ])
        .expect("valid arguments");

        assert!(Application::new(args).await.is_err());
    }
}
