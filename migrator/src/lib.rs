// Schema migrator
// Brings a database up to the schema version this build requires, once, at startup.

pub mod database;
pub mod migration;
pub mod settings;
pub mod utils;

pub use migration::{
    MigrationManager, MigrationResult, MigrationStatus, ProviderKey, SchemaVersion, SecurityError,
};
