//! Command-line interface handling for the Realm session server.
//!
//! This module provides command-line argument parsing using the `clap` crate
//! and applies the parsed overrides on top of the configuration file.

use crate::config::AppConfig;
use clap::{value_parser, Arg, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments parsed from user input.
///
/// This structure holds all the command-line options that can be used to
/// override configuration file settings.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for the stream bind address
    pub bind_address: Option<String>,
    /// Optional override for the datagram bind address
    pub udp_bind_address: Option<String>,
    /// Optional override for the session limit
    pub max_users: Option<usize>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

/// Builds the clap command describing every option.
fn command() -> Command {
    Command::new("Realm Session Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Connection and session server for multiplayer games")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml"),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 127.0.0.1:7000)"),
        )
        .arg(
            Arg::new("udp-bind")
                .short('u')
                .long("udp-bind")
                .value_name("ADDRESS")
                .help("Datagram bind address; enables the UDP echo responder"),
        )
        .arg(
            Arg::new("max-users")
                .short('m')
                .long("max-users")
                .value_name("COUNT")
                .help("Maximum number of concurrent sessions")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}

impl CliArgs {
    /// Parses command line arguments using clap.
    ///
    /// # Returns
    ///
    /// A `CliArgs` instance containing all parsed command-line options. Invalid
    /// arguments print usage and exit the process, as clap does.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    /// Parses an explicit argument list, the first item being the binary name.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = command().try_get_matches_from(args)?;
        Ok(Self::from_matches(&matches))
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.toml")),
            bind_address: matches.get_one::<String>("bind").cloned(),
            udp_bind_address: matches.get_one::<String>("udp-bind").cloned(),
            max_users: matches.get_one::<usize>("max-users").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }

    /// Applies every override given on the command line to `config`.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(bind_address) = &self.bind_address {
            config.server.bind_address = bind_address.clone();
        }

        if let Some(udp_bind_address) = &self.udp_bind_address {
            config.server.udp_bind_address = Some(udp_bind_address.clone());
        }

        if let Some(max_users) = self.max_users {
            config.server.max_users = max_users;
            // Keep one spare connection per ten sessions for rejections
            config.server.max_connections = config
                .server
                .max_connections
                .max(max_users.saturating_add(max_users / 10));
        }

        if let Some(log_level) = &self.log_level {
            config.logging.level = log_level.clone();
        }

        if self.json_logs {
            config.logging.json_format = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["realm"]).expect("no arguments");
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert!(args.bind_address.is_none());
        assert!(args.udp_bind_address.is_none());
        assert!(args.max_users.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn test_overrides_applied() {
        let args = CliArgs::try_parse_from([
            "realm",
            "--config",
            "prod.toml",
            "--bind",
            "0.0.0.0:9000",
            "--udp-bind",
            "0.0.0.0:9001",
            "--max-users",
            "2000",
            "--log-level",
            "debug",
            "--json-logs",
        ])
        .expect("valid arguments");
        assert_eq!(args.config_path, PathBuf::from("prod.toml"));

        let mut config = AppConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.server.udp_bind_address.as_deref(), Some("0.0.0.0:9001"));
        assert_eq!(config.server.max_users, 2000);
        assert_eq!(config.server.max_connections, 2200);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_max_users_is_left_to_validation() {
        let huge = usize::MAX.to_string();
        let args = CliArgs::try_parse_from(["realm", "--max-users", huge.as_str()])
            .expect("valid arguments");

        let mut config = AppConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.server.max_users, usize::MAX);
        assert_eq!(config.server.max_connections, usize::MAX);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_users_must_be_numeric() {
        assert!(CliArgs::try_parse_from(["realm", "--max-users", "many"]).is_err());
    }
}
