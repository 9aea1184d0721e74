// Trust violations
//
// These are not migration outcomes. `MigrationManager::try_migrate` returns them as `Err` and the
// host must stop booting.

use thiserror::Error;

use super::script::ScriptKey;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("script '{name}' for {key} resolved outside the trusted script directory ({location})")]
    UntrustedSource {
        key: ScriptKey,
        name: String,
        location: String,
    },

    #[error("checksum mismatch for {key} ({origin}): expected {expected}, computed {computed}")]
    ChecksumMismatch {
        key: ScriptKey,
        origin: &'static str,
        expected: String,
        computed: String,
    },
}
