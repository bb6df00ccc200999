//! Logging system setup and configuration.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and exactly one
//! formatting layer, human readable or JSON.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Builds the level filter: `RUST_LOG` when set, the configured level otherwise.
fn level_filter(level: &str) -> Result<EnvFilter, Box<dyn std::error::Error>> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(level)?),
    }
}

/// Initializes the logging system with the specified configuration.
///
/// # Arguments
///
/// * `config` - Logging configuration from the config file
/// * `json_format` - Whether to force JSON output format (CLI override)
///
/// # Returns
///
/// `Ok(())` if logging was set up successfully, or an error if the level is
/// not a valid filter or a global subscriber was already installed.
///
/// # Features
///
/// * **Environment variable support** - Respects `RUST_LOG` if set
/// * **Flexible formatting** - Human-readable or JSON output
/// * **Thread information** - Includes thread IDs and names for debugging
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let json = json_format || config.json_format;

    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_thread_ids(true)
            .with_thread_names(true)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_ansi(true)
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(true)
            .with_thread_names(true)
    });

    tracing_subscriber::registry()
        .with(level_filter(&config.level)?)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    info!(
        "🔧 Logging initialized with level: {} ({})",
        config.level,
        if json { "json" } else { "text" }
    );
    Ok(())
}

/// Displays the startup banner through the logger.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║            🏰 REALM SERVER 🏰            ║");
    info!("║               v{:<26}║", version);
    info!("║                                          ║");
    info!("║  Connection and Session Core             ║");
    info!("║                                          ║");
    info!("║  🆔 Reusable Session Ids                 ║");
    info!("║  🔒 Hard Capacity Bound                  ║");
    info!("║  ⚡ One Task per Connection              ║");
    info!("║  🌐 TCP + UDP Endpoints                  ║");
    info!("║                                          ║");
    info!("╚══════════════════════════════════════════╝");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter_rejects_garbage() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(level_filter("info").is_ok());
            assert!(level_filter("realm=loudest").is_err());
        }
    }
}
