// Installed-version manifest
//
// The engine reads the manifest once at the start of a run and asks for one update at the end.
// How and where it is stored belongs to the `ManifestStore` implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestRecord {
    pub version_string: String,
    pub install_time_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_migration_time_utc: Option<DateTime<Utc>>,
}

/// Request to record a newly installed version.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateManifestCommand {
    pub version_string: String,
    pub migrated_at: DateTime<Utc>,
}

impl ManifestRecord {
    /// Apply an update. The install time is never touched.
    pub fn apply(&mut self, command: &UpdateManifestCommand) {
        self.version_string = command.version_string.clone();
        self.last_migration_time_utc = Some(command.migrated_at);
    }
}

#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn get(&self) -> Result<ManifestRecord>;
    async fn update(&self, command: UpdateManifestCommand) -> Result<()>;
}

/// Manifest kept as a JSON document on disk.
///
/// The file is created by setup/seeding; this store only reads and rewrites it.
#[derive(Debug, Clone)]
pub struct JsonFileManifestStore {
    path: PathBuf,
}

impl JsonFileManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, record: &ManifestRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record).context("Failed to serialize manifest")?;

        // Write next to the target, flush to disk, then swap in with a rename.
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("Failed to create {:?}", tmp))?;
        file.write_all(&json)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to flush {:?}", tmp))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace manifest {:?}", self.path))?;
        Ok(())
    }
}

#[async_trait]
impl ManifestStore for JsonFileManifestStore {
    async fn get(&self) -> Result<ManifestRecord> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read manifest file: {:?}", self.path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest JSON: {:?}", self.path))
    }

    async fn update(&self, command: UpdateManifestCommand) -> Result<()> {
        let mut record = self.get().await?;
        record.apply(&command);
        self.write(&record).await?;

        info!(
            "[PHASE: migration] [STEP: manifest_update] Manifest {:?} now at version {}",
            self.path, record.version_string
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn seeded(dir: &Path) -> JsonFileManifestStore {
        let path = dir.join("manifest.json");
        std::fs::write(
            &path,
            r#"{ "versionString": "1.0.0", "installTimeUtc": "2024-01-02T03:04:05Z" }"#,
        )
        .unwrap();
        JsonFileManifestStore::new(path)
    }

    #[tokio::test]
    async fn reads_seeded_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(dir.path());

        let record = store.get().await.unwrap();
        assert_eq!(record.version_string, "1.0.0");
        assert_eq!(
            record.install_time_utc,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
        );
        assert_eq!(record.last_migration_time_utc, None);
    }

    #[tokio::test]
    async fn update_keeps_install_time_and_sets_migration_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(dir.path());
        let migrated_at = Utc.with_ymd_and_hms(2025, 6, 7, 8, 9, 10).unwrap();

        store
            .update(UpdateManifestCommand {
                version_string: "1.1.0".to_string(),
                migrated_at,
            })
            .await
            .unwrap();

        let record = store.get().await.unwrap();
        assert_eq!(record.version_string, "1.1.0");
        assert_eq!(
            record.install_time_utc,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
        );
        assert_eq!(record.last_migration_time_utc, Some(migrated_at));
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileManifestStore::new(dir.path().join("absent.json"));

        let err = store.get().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read manifest file"));

        let err = store
            .update(UpdateManifestCommand {
                version_string: "1.1.0".to_string(),
                migrated_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read manifest file"));
        assert!(!dir.path().join("absent.json").exists());
    }

    #[tokio::test]
    async fn corrupt_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileManifestStore::new(path).get().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse manifest JSON"));
    }
}
