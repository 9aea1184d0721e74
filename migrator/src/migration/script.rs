// Migration script model
// Provider keys, script identity and loaded script content.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::checksum;
use super::version::SchemaVersion;

/// Which database engine's dialect a script is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderKey {
    SqlServer,
    MySql,
    PostgreSql,
}

impl ProviderKey {
    pub const ALL: [ProviderKey; 3] = [
        ProviderKey::SqlServer,
        ProviderKey::MySql,
        ProviderKey::PostgreSql,
    ];

    /// Stable lowercase name; also the artifact directory name under `sql/`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKey::SqlServer => "sqlserver",
            ProviderKey::MySql => "mysql",
            ProviderKey::PostgreSql => "postgresql",
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sql" | "sqlserver" | "mssql" => Ok(ProviderKey::SqlServer),
            "mysql" | "mariadb" => Ok(ProviderKey::MySql),
            "postgres" | "postgresql" | "pg" => Ok(ProviderKey::PostgreSql),
            other => Err(format!(
                "unknown database provider '{}' (expected sqlserver, mysql or postgresql)",
                other
            )),
        }
    }
}

impl TryFrom<String> for ProviderKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderKey> for String {
    fn from(value: ProviderKey) -> Self {
        value.as_str().to_string()
    }
}

/// Identity of one migration step: provider plus the version range it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptKey {
    pub provider: ProviderKey,
    pub from: SchemaVersion,
    pub to: SchemaVersion,
}

impl fmt::Display for ScriptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.provider, self.from, self.to)
    }
}

/// A script loaded from the artifact store for one run.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub key: ScriptKey,
    /// Artifact name (embedded name or file path) for logs.
    pub name: String,
    pub content: String,
    /// Digest pinned by the registry, if any.
    pub expected_checksum: Option<String>,
}

impl MigrationScript {
    /// Digest of the current content. Recomputed on every call.
    pub fn checksum(&self) -> String {
        checksum::compute(self.content.as_bytes())
    }
}
