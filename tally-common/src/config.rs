//! Configuration loading and data folder resolution
//!
//! Both binaries resolve settings in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing config file is not an error: a warning is logged and compiled
//! defaults are used.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Application folder name under the platform config/data directories
pub const APP_DIR: &str = "tally";

/// Logging section shared by both binaries
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Data folder resolution: CLI → env → OS default
pub fn resolve_data_folder(cli_arg: Option<&Path>, env_var_name: &str) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    default_data_folder()
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/tally (or /var/lib/tally for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/var/lib/tally"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/tally
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/tally"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\tally
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\tally"))
    } else {
        PathBuf::from("./tally_data")
    }
}

/// Default location of a named config file (`<config dir>/tally/<file_name>`)
pub fn default_config_path(file_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(file_name))
}

/// Load a TOML config file
///
/// - Explicit path that does not exist: error (the operator asked for it)
/// - No explicit path: try the default location, fall back to `T::default()`
pub fn load_toml_config<T>(explicit: Option<&Path>, default_file_name: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path(default_file_name) {
            Some(path) if path.exists() => path,
            _ => {
                warn!(
                    "No config file found ({}), using compiled defaults",
                    default_file_name
                );
                return Ok(T::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config = toml::from_str::<T>(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}
