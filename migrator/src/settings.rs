// Configuration
//
// Layered with the `config` crate: an optional TOML file, then `SCHEMA_MIGRATOR_*` environment
// variables (`__` separates nested keys).

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::migration::ProviderKey;

pub const ENV_PREFIX: &str = "SCHEMA_MIGRATOR";
pub const DEFAULT_CONFIG_FILE: &str = "migrator.toml";

/// Load the raw configuration. `explicit` must exist; the default file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let file = match explicit {
        Some(path) => File::from(path).required(true),
        None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
    };

    Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to load configuration")
}

/// Everything the host needs to run a migration, beyond the on/off switch.
#[derive(Debug, Clone, Deserialize)]
pub struct MigratorSettings {
    pub provider: ProviderKey,
    pub connection_string: String,
    /// Defaults to this binary's own version.
    #[serde(default)]
    pub target_version: Option<String>,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,
    #[serde(default)]
    pub batch_timeout_secs: Option<u64>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Trusted directory of `<provider>/<from>_to_<to>.sql` overrides.
    #[serde(default)]
    pub script_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("manifest.json")
}

fn default_connect_timeout_secs() -> u64 {
    20
}

impl MigratorSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        config
            .clone()
            .try_deserialize()
            .context("Invalid migrator settings")
    }

    pub fn target_version(&self) -> &str {
        self.target_version
            .as_deref()
            .unwrap_or(env!("CARGO_PKG_VERSION"))
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}
