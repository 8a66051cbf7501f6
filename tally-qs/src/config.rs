//! Server configuration
//!
//! Resolution order per setting: CLI flag → `TALLY_QS_*` environment
//! variable → `tally-qs.toml` → compiled default.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tally_common::config::{load_toml_config, resolve_data_folder, LoggingConfig};

use crate::cache::DEFAULT_CLEAR_INTERVAL;
use crate::error::Result;

pub const DEFAULT_PORT: u16 = 5790;
pub const CONFIG_FILE: &str = "tally-qs.toml";
pub const DATABASE_FILE: &str = "tally.db";
pub const DATA_FOLDER_ENV: &str = "TALLY_DATA_FOLDER";

/// Command-line arguments for tally-qs
#[derive(Parser, Debug, Default)]
#[command(name = "tally-qs")]
#[command(about = "Listening statistics query server")]
#[command(version)]
pub struct Args {
    /// TOML config file (default: <config dir>/tally/tally-qs.toml)
    #[arg(short, long, env = "TALLY_QS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TALLY_QS_PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "TALLY_QS_BIND")]
    pub bind: Option<IpAddr>,

    /// SQLite history database
    #[arg(long, env = "TALLY_QS_DATABASE")]
    pub database: Option<PathBuf>,

    /// Data folder holding the default database
    #[arg(long, env = "TALLY_DATA_FOLDER")]
    pub data_folder: Option<PathBuf>,

    /// Result cache clear interval in seconds
    #[arg(long, env = "TALLY_QS_CLEAR_INTERVAL")]
    pub clear_interval: Option<u64>,

    /// Viewer id allowed to query (repeatable)
    #[arg(long = "viewer", env = "TALLY_QS_VIEWERS", value_delimiter = ',')]
    pub viewers: Vec<String>,
}

/// `tally-qs.toml` contents
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QsToml {
    pub server: ServerSection,
    pub cache: CacheSection,
    pub viewers: ViewersSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub database: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub clear_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ViewersSection {
    pub allowed: Vec<String>,
}

/// Fully resolved server settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub database: PathBuf,
    pub clear_interval: Duration,
    pub viewers: Vec<String>,
    pub log_level: String,
}

impl ServerConfig {
    /// Load the TOML file named by `args` (or the default one) and merge
    pub fn load(args: &Args) -> Result<Self> {
        let toml: QsToml = load_toml_config(args.config.as_deref(), CONFIG_FILE)?;
        Ok(Self::resolve(args, toml))
    }

    /// Merge CLI/env values over TOML values over defaults
    pub fn resolve(args: &Args, toml: QsToml) -> Self {
        let bind = args
            .bind
            .or(toml.server.bind)
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let port = args.port.or(toml.server.port).unwrap_or(DEFAULT_PORT);

        let database = args
            .database
            .clone()
            .or(toml.server.database)
            .unwrap_or_else(|| {
                resolve_data_folder(args.data_folder.as_deref(), DATA_FOLDER_ENV).join(DATABASE_FILE)
            });

        let clear_interval = args
            .clear_interval
            .or(toml.cache.clear_interval_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CLEAR_INTERVAL);

        let viewers = if args.viewers.is_empty() {
            toml.viewers.allowed
        } else {
            args.viewers.clone()
        };

        Self {
            addr: SocketAddr::new(bind, port),
            database,
            clear_interval,
            viewers,
            log_level: toml.logging.level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args {
            data_folder: Some(PathBuf::from("/srv/tally")),
            ..Args::default()
        };
        let config = ServerConfig::resolve(&args, QsToml::default());

        assert_eq!(config.addr, "127.0.0.1:5790".parse().unwrap());
        assert_eq!(config.database, PathBuf::from("/srv/tally/tally.db"));
        assert_eq!(config.clear_interval, Duration::from_secs(600));
        assert!(config.viewers.is_empty());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_fills_unset_args() {
        let toml: QsToml = toml::from_str(
            r#"
            [server]
            port = 8080
            database = "/data/history.db"

            [cache]
            clear_interval_secs = 60

            [viewers]
            allowed = ["alice", "bob"]

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        let config = ServerConfig::resolve(&Args::default(), toml);

        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.database, PathBuf::from("/data/history.db"));
        assert_eq!(config.clear_interval, Duration::from_secs(60));
        assert_eq!(config.viewers, vec!["alice", "bob"]);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_args_override_toml() {
        let toml: QsToml = toml::from_str(
            r#"
            [server]
            port = 8080
            [viewers]
            allowed = ["alice"]
            "#,
        )
        .unwrap();
        let args = Args {
            port: Some(9000),
            viewers: vec!["carol".to_string()],
            clear_interval: Some(0),
            ..Args::default()
        };
        let config = ServerConfig::resolve(&args, toml);

        assert_eq!(config.addr.port(), 9000);
        assert_eq!(config.viewers, vec!["carol"]);
        // Zero interval falls back to the default
        assert_eq!(config.clear_interval, DEFAULT_CLEAR_INTERVAL);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let args = Args {
            config: Some(PathBuf::from("/nonexistent/tally-qs.toml")),
            ..Args::default()
        };
        let result = ServerConfig::load(&args);

        assert!(matches!(
            result,
            Err(crate::Error::Common(tally_common::Error::Config(_)))
        ));
    }
}
