// Startup schema migration engine

pub mod audit;
pub mod batch;
pub mod checksum;
pub mod config_gate;
pub mod error;
pub mod executor;
pub mod manager;
pub mod manifest;
pub mod registry;
pub mod result;
pub mod script;
pub mod version;

pub use audit::{AuditEntry, AuditLog, JsonlAuditLog};
pub use batch::Batch;
pub use error::SecurityError;
pub use executor::{BatchRunner, ExecutionError, ScriptExecutor};
pub use manager::{MigrationManager, Stage};
pub use manifest::{JsonFileManifestStore, ManifestRecord, ManifestStore, UpdateManifestCommand};
pub use registry::{ArtifactLocator, ScriptEntry, ScriptProvider, ScriptRegistry};
pub use result::{MigrationResult, MigrationStatus};
pub use script::{MigrationScript, ProviderKey, ScriptKey};
pub use version::{SchemaVersion, VersionParseError};
