//! Fetch client configuration
//!
//! Resolution order per setting: CLI flag → `TALLY_FC_*` environment
//! variable → `tally-fc.toml` → compiled default.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tally_common::config::{load_toml_config, resolve_data_folder, LoggingConfig};

use crate::debounce::DEFAULT_QUIET_PERIOD;
use crate::error::Result;
use crate::orchestrator::DEFAULT_PAGE_SIZE;

pub const CONFIG_FILE: &str = "tally-fc.toml";
pub const CACHE_FILE: &str = "track-data.json";
pub const DATA_FOLDER_ENV: &str = "TALLY_DATA_FOLDER";
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5790";

/// Connection and cache settings given on the command line
#[derive(clap::Args, Debug, Default, Clone)]
pub struct ClientArgs {
    /// TOML config file (default: <config dir>/tally/tally-fc.toml)
    #[arg(short, long, env = "TALLY_FC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Query server base URL
    #[arg(long, env = "TALLY_FC_SERVER")]
    pub server: Option<String>,

    /// Viewer id sent to the server's viewer gate
    #[arg(long, env = "TALLY_FC_VIEWER")]
    pub viewer: Option<String>,

    /// Track-data cache file
    #[arg(long, env = "TALLY_FC_CACHE_FILE")]
    pub cache_file: Option<PathBuf>,

    /// Data folder holding the default cache file
    #[arg(long, env = "TALLY_DATA_FOLDER")]
    pub data_folder: Option<PathBuf>,

    /// Tracks loaded per window step
    #[arg(long, env = "TALLY_FC_PAGE_SIZE")]
    pub page_size: Option<usize>,

    /// Quiet period before a filter edit is committed, in milliseconds
    #[arg(long, env = "TALLY_FC_DEBOUNCE_MS")]
    pub debounce_ms: Option<u64>,
}

/// `tally-fc.toml` contents
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FcToml {
    pub server: ServerSection,
    pub client: ClientSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub url: Option<String>,
    pub viewer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub cache_file: Option<PathBuf>,
    pub page_size: Option<usize>,
    pub debounce_ms: Option<u64>,
}

/// Fully resolved client settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub server_url: String,
    pub viewer: Option<String>,
    pub cache_file: PathBuf,
    pub page_size: usize,
    pub debounce: Duration,
    pub log_level: String,
}

impl ClientConfig {
    pub fn load(args: &ClientArgs) -> Result<Self> {
        let toml: FcToml = load_toml_config(args.config.as_deref(), CONFIG_FILE)?;
        Ok(Self::resolve(args, toml))
    }

    pub fn resolve(args: &ClientArgs, toml: FcToml) -> Self {
        let cache_file = args
            .cache_file
            .clone()
            .or(toml.client.cache_file)
            .unwrap_or_else(|| {
                resolve_data_folder(args.data_folder.as_deref(), DATA_FOLDER_ENV).join(CACHE_FILE)
            });

        Self {
            server_url: args
                .server
                .clone()
                .or(toml.server.url)
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            viewer: args.viewer.clone().or(toml.server.viewer),
            cache_file,
            page_size: args
                .page_size
                .or(toml.client.page_size)
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE),
            debounce: args
                .debounce_ms
                .or(toml.client.debounce_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_QUIET_PERIOD),
            log_level: toml.logging.level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = ClientArgs {
            data_folder: Some(PathBuf::from("/home/u/.local/share/tally")),
            ..ClientArgs::default()
        };
        let config = ClientConfig::resolve(&args, FcToml::default());

        assert_eq!(config.server_url, "http://127.0.0.1:5790");
        assert_eq!(config.viewer, None);
        assert_eq!(
            config.cache_file,
            PathBuf::from("/home/u/.local/share/tally/track-data.json")
        );
        assert_eq!(config.page_size, 100);
        assert_eq!(config.debounce, Duration::from_millis(750));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_args_override_toml() {
        let toml: FcToml = toml::from_str(
            r#"
            [server]
            url = "http://stats.lan:8080"
            viewer = "alice"

            [client]
            page_size = 0
            debounce_ms = 250
            "#,
        )
        .unwrap();
        let args = ClientArgs {
            viewer: Some("bob".into()),
            cache_file: Some(PathBuf::from("/tmp/tracks.json")),
            ..ClientArgs::default()
        };
        let config = ClientConfig::resolve(&args, toml);

        assert_eq!(config.server_url, "http://stats.lan:8080");
        assert_eq!(config.viewer.as_deref(), Some("bob"));
        assert_eq!(config.cache_file, PathBuf::from("/tmp/tracks.json"));
        // Zero page size falls back to the default
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.debounce, Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally-fc.toml");
        std::fs::write(&path, "[client]\npage_size = \"many\"\n").unwrap();
        let args = ClientArgs {
            config: Some(path),
            ..ClientArgs::default()
        };

        assert!(matches!(
            ClientConfig::load(&args),
            Err(crate::Error::Common(tally_common::Error::Config(_)))
        ));
    }
}
