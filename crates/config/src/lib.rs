//! Configuration loading and env substitution.
//!
//! Config files: `switchboard.toml`, `switchboard.yaml` or `switchboard.json`,
//! searched in `./` then `~/.config/switchboard/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in the raw
//! file text.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{config_dir, data_dir, discover_and_load, load_config, load_or_default},
    schema::{CoordinatorConfig, MetricsConfig, RoutingConfig, SwitchboardConfig, VoiceConfig},
};
