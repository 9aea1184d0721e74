// Auto-migration switch
//
// Read before any database handle is touched. A missing setting means enabled: an unconfigured
// environment should not silently run on an old schema.

use config::{Config, ConfigError};
use log::warn;

/// Config key (env: `SCHEMA_MIGRATOR_AUTO_DATABASE_MIGRATION`).
pub const AUTO_MIGRATION_KEY: &str = "auto_database_migration";

/// Used when the key is absent or not a boolean.
pub const DEFAULT_ENABLED: bool = true;

pub fn is_enabled(config: &Config) -> bool {
    match config.get_bool(AUTO_MIGRATION_KEY) {
        Ok(enabled) => enabled,
        Err(ConfigError::NotFound(_)) => DEFAULT_ENABLED,
        Err(e) => {
            warn!(
                "[PHASE: migration] [STEP: gate] '{}' is not a boolean ({}); using default {}",
                AUTO_MIGRATION_KEY, e, DEFAULT_ENABLED
            );
            DEFAULT_ENABLED
        }
    }
}
