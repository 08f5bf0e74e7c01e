use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{error::ConfigError, schema::GrimoireConfig};

/// File name looked up in the working directory and the user config dir.
pub const CONFIG_FILE_NAME: &str = "grimoire.toml";

/// Load and validate a config file at an explicit path.
pub fn load_from_path(path: &Path) -> Result<GrimoireConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: GrimoireConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Resolve the config to use.
///
/// An explicit path must exist. Otherwise `./grimoire.toml` is tried, then the
/// platform config directory, then built-in defaults.
pub fn discover_and_load(explicit: Option<&Path>) -> Result<GrimoireConfig, ConfigError> {
    if let Some(path) = explicit {
        return load_from_path(path);
    }
    for candidate in candidate_paths() {
        if candidate.is_file() {
            return load_from_path(&candidate);
        }
        debug!(path = %candidate.display(), "config candidate not found");
    }
    info!("no config file found, using defaults");
    let config = GrimoireConfig::default();
    config.validate()?;
    Ok(config)
}

fn candidate_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dirs) = directories::ProjectDirs::from("", "", "grimoire") {
        paths.push(dirs.config_dir().join(CONFIG_FILE_NAME));
    }
    paths
}
