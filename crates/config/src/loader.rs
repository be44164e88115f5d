use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::SwitchboardConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "switchboard.toml",
    "switchboard.yaml",
    "switchboard.yml",
    "switchboard.json",
];

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "switchboard")
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<SwitchboardConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./switchboard.{toml,yaml,yml,json}`
/// 2. `~/.config/switchboard/switchboard.{toml,yaml,yml,json}`
///
/// Returns `SwitchboardConfig::default()` if nothing is found or the file
/// fails to load.
pub fn discover_and_load() -> SwitchboardConfig {
    match find_config_file() {
        Some(path) => load_or_default(&path),
        None => {
            debug!("no config file found, using defaults");
            SwitchboardConfig::default()
        },
    }
}

/// Load an explicitly named file, falling back to defaults on error.
pub fn load_or_default(path: &Path) -> SwitchboardConfig {
    debug!(path = %path.display(), "loading config");
    match load_config(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            SwitchboardConfig::default()
        },
    }
}

fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/switchboard/`).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// Returns the user data directory, or `./.switchboard` when the platform
/// has no notion of one.
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".switchboard"))
}

fn parse_config(raw: &str, path: &Path) -> Result<SwitchboardConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}
