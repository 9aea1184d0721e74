// Migration outcome

use serde::Serialize;
use std::fmt;

use super::version::SchemaVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationStatus {
    Disabled,
    NotRequired,
    VersionParsingError,
    ScriptNotFound,
    Failed,
    Success,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MigrationStatus::Disabled => "Disabled",
            MigrationStatus::NotRequired => "NotRequired",
            MigrationStatus::VersionParsingError => "VersionParsingError",
            MigrationStatus::ScriptNotFound => "ScriptNotFound",
            MigrationStatus::Failed => "Failed",
            MigrationStatus::Success => "Success",
        };
        f.write_str(s)
    }
}

/// Result of one orchestration run.
///
/// `from_version`/`to_version` are filled in as far as the run got; both are set on `Success`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    status: MigrationStatus,
    error_message: Option<String>,
    from_version: Option<SchemaVersion>,
    to_version: Option<SchemaVersion>,
}

impl MigrationResult {
    fn new(
        status: MigrationStatus,
        error_message: Option<String>,
        from_version: Option<SchemaVersion>,
        to_version: Option<SchemaVersion>,
    ) -> Self {
        Self {
            status,
            error_message,
            from_version,
            to_version,
        }
    }

    pub fn disabled() -> Self {
        Self::new(MigrationStatus::Disabled, None, None, None)
    }

    pub fn not_required(from: SchemaVersion, to: SchemaVersion) -> Self {
        Self::new(MigrationStatus::NotRequired, None, Some(from), Some(to))
    }

    pub fn version_parsing_error(
        message: impl Into<String>,
        from: Option<SchemaVersion>,
        to: Option<SchemaVersion>,
    ) -> Self {
        Self::new(
            MigrationStatus::VersionParsingError,
            Some(message.into()),
            from,
            to,
        )
    }

    pub fn script_not_found(message: impl Into<String>, from: SchemaVersion, to: SchemaVersion) -> Self {
        Self::new(
            MigrationStatus::ScriptNotFound,
            Some(message.into()),
            Some(from),
            Some(to),
        )
    }

    pub fn failed(
        message: impl Into<String>,
        from: Option<SchemaVersion>,
        to: Option<SchemaVersion>,
    ) -> Self {
        Self::new(MigrationStatus::Failed, Some(message.into()), from, to)
    }

    pub fn success(from: SchemaVersion, to: SchemaVersion) -> Self {
        Self::new(MigrationStatus::Success, None, Some(from), Some(to))
    }

    pub fn status(&self) -> MigrationStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn from_version(&self) -> Option<&SchemaVersion> {
        self.from_version.as_ref()
    }

    pub fn to_version(&self) -> Option<&SchemaVersion> {
        self.to_version.as_ref()
    }

    /// The database is at the required version.
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            MigrationStatus::Success | MigrationStatus::NotRequired
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(
            self.status,
            MigrationStatus::Failed
                | MigrationStatus::VersionParsingError
                | MigrationStatus::ScriptNotFound
        )
    }
}
