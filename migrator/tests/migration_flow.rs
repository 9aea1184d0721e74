// End-to-end migration runs through the public API with in-process collaborators.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use config::Config;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use schema_migrator::migration::{
    checksum, config_gate, AuditLog, BatchRunner, JsonFileManifestStore, JsonlAuditLog,
    ManifestRecord, ManifestStore, MigrationManager, MigrationStatus, ProviderKey, ScriptEntry,
    ScriptKey, ScriptRegistry, SchemaVersion, SecurityError, UpdateManifestCommand,
};

const STEP_SQL: &str = "CREATE TABLE PostView (PostId UNIQUEIDENTIFIER NOT NULL);\nGO\nALTER TABLE Comment ADD IsApproved BIT NOT NULL DEFAULT 0;\nGO\n";

struct CountingManifest {
    record: Mutex<ManifestRecord>,
    update_calls: AtomicU32,
}

impl CountingManifest {
    fn at(version: &str) -> Self {
        Self {
            record: Mutex::new(ManifestRecord {
                version_string: version.to_string(),
                install_time_utc: Utc::now(),
                last_migration_time_utc: None,
            }),
            update_calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ManifestStore for CountingManifest {
    async fn get(&self) -> Result<ManifestRecord> {
        Ok(self.record.lock().unwrap().clone())
    }

    async fn update(&self, command: UpdateManifestCommand) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.record.lock().unwrap().apply(&command);
        Ok(())
    }
}

/// Fake connection: records batches and fails on the `fail_on`-th one (1-based).
struct FakeDb {
    executed: Mutex<Vec<String>>,
    fail_on: Option<usize>,
}

impl FakeDb {
    fn new(fail_on: Option<usize>) -> Self {
        Self {
            executed: Mutex::new(Vec::new()),
            fail_on,
        }
    }
}

#[async_trait]
impl BatchRunner for FakeDb {
    async fn run_batch(&self, sql: &str) -> Result<()> {
        let mut executed = self.executed.lock().unwrap();
        executed.push(sql.to_string());
        if self.fail_on == Some(executed.len()) {
            anyhow::bail!("Column names in each table must be unique.");
        }
        Ok(())
    }
}

fn v(s: &str) -> SchemaVersion {
    SchemaVersion::parse(s).unwrap()
}

fn step_registry() -> Arc<ScriptRegistry> {
    let mut registry = ScriptRegistry::new();
    registry.register(ScriptEntry::embedded(
        ProviderKey::SqlServer,
        v("1.0.0"),
        v("1.1.0"),
        "sqlserver/1.0.0_to_1.1.0.sql",
        STEP_SQL,
    ));
    Arc::new(registry)
}

fn empty_config() -> Config {
    Config::builder().build().unwrap()
}

#[tokio::test]
async fn two_batch_step_succeeds_and_updates_manifest_once() {
    let manifest = Arc::new(CountingManifest::at("1.0.0"));
    let db = FakeDb::new(None);

    let manager = MigrationManager::new(
        empty_config(),
        ProviderKey::SqlServer,
        "1.1.0",
        step_registry(),
        manifest.clone(),
    );
    let result = manager
        .try_migrate(&db, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status(), MigrationStatus::Success);
    assert!(result.is_success());
    assert_eq!(result.error_message(), None);
    assert_eq!(result.from_version(), Some(&v("1.0.0")));
    assert_eq!(result.to_version(), Some(&v("1.1.0")));
    assert_eq!(db.executed.lock().unwrap().len(), 2);
    assert_eq!(manifest.update_calls.load(Ordering::SeqCst), 1);
    assert_eq!(manifest.record.lock().unwrap().version_string, "1.1.0");
}

#[tokio::test]
async fn failing_second_batch_never_touches_manifest() {
    let manifest = Arc::new(CountingManifest::at("1.0.0"));
    let db = FakeDb::new(Some(2));

    let manager = MigrationManager::new(
        empty_config(),
        ProviderKey::SqlServer,
        "1.1.0",
        step_registry(),
        manifest.clone(),
    );
    let result = manager
        .try_migrate(&db, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.status(), MigrationStatus::Failed);
    assert!(result.is_failed());
    assert!(result.error_message().unwrap().contains("batch 2"));
    assert_eq!(db.executed.lock().unwrap().len(), 2);
    assert_eq!(manifest.update_calls.load(Ordering::SeqCst), 0);
    assert_eq!(manifest.record.lock().unwrap().version_string, "1.0.0");
}

#[tokio::test]
async fn rerun_after_failure_retries_from_the_first_batch() {
    let manifest = Arc::new(CountingManifest::at("1.0.0"));
    let manager = MigrationManager::new(
        empty_config(),
        ProviderKey::SqlServer,
        "1.1.0",
        step_registry(),
        manifest.clone(),
    );

    let first = manager
        .try_migrate(&FakeDb::new(Some(2)), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.status(), MigrationStatus::Failed);

    let db = FakeDb::new(None);
    let second = manager
        .try_migrate(&db, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.status(), MigrationStatus::Success);
    assert_eq!(db.executed.lock().unwrap().len(), 2);

    let third = manager
        .try_migrate(&FakeDb::new(None), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(third.status(), MigrationStatus::NotRequired);
    assert_eq!(manifest.update_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_switch_short_circuits() {
    let config = Config::builder()
        .set_override(config_gate::AUTO_MIGRATION_KEY, false)
        .unwrap()
        .build()
        .unwrap();
    let manifest = Arc::new(CountingManifest::at("0.0.1"));
    let db = FakeDb::new(None);

    let result = MigrationManager::new(
        config,
        ProviderKey::SqlServer,
        "1.1.0",
        step_registry(),
        manifest.clone(),
    )
    .try_migrate(&db, &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(result.status(), MigrationStatus::Disabled);
    assert!(db.executed.lock().unwrap().is_empty());
    assert_eq!(manifest.update_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn builtin_scripts_with_file_backed_manifest_and_audit() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_path = dir.path().join("manifest.json");
    std::fs::write(
        &manifest_path,
        r#"{ "versionString": "v1.0.0", "installTimeUtc": "2023-05-01T12:00:00Z" }"#,
    )
    .unwrap();
    let audit_path = dir.path().join("audit").join("migrations.jsonl");
    let audit = Arc::new(JsonlAuditLog::new(audit_path.clone()));
    let store = Arc::new(JsonFileManifestStore::new(manifest_path.clone()));

    let manager = MigrationManager::new(
        empty_config(),
        ProviderKey::SqlServer,
        "1.1.0",
        Arc::new(ScriptRegistry::builtin()),
        store.clone(),
    )
    .with_audit_log(audit.clone());

    let db = FakeDb::new(None);
    let result = manager
        .try_migrate(&db, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.status(), MigrationStatus::Success);

    // The bundled SQL Server step is three GO-separated batches.
    let executed = db.executed.lock().unwrap().clone();
    assert_eq!(executed.len(), 3);
    assert!(executed.iter().all(|sql| !sql.lines().any(|l| l.trim() == "GO")));

    let record = store.get().await.unwrap();
    assert_eq!(record.version_string, "1.1.0");
    assert!(record.last_migration_time_utc.is_some());

    let key = ScriptKey {
        provider: ProviderKey::SqlServer,
        from: v("1.0.0"),
        to: v("1.1.0"),
    };
    let recorded = audit.last_checksum(&key).await.unwrap().unwrap();
    let entry = ScriptRegistry::builtin()
        .entries()
        .iter()
        .find(|e| e.provider == ProviderKey::SqlServer)
        .cloned()
        .unwrap();
    match entry.locator {
        schema_migrator::migration::ArtifactLocator::Embedded { sql, .. } => {
            assert_eq!(recorded, checksum::compute(sql.as_bytes()));
        }
        other => panic!("unexpected locator {:?}", other),
    }
}

#[tokio::test]
async fn tampered_script_against_audit_history_is_a_security_error() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(JsonlAuditLog::new(dir.path().join("audit.jsonl")));
    let key = ScriptKey {
        provider: ProviderKey::SqlServer,
        from: v("1.0.0"),
        to: v("1.1.0"),
    };

    // A previous run executed different content under the same key.
    audit
        .append(&schema_migrator::migration::AuditEntry {
            run_id: uuid::Uuid::new_v4(),
            provider: key.provider,
            from_version: key.from.clone(),
            to_version: key.to.clone(),
            script: "sqlserver/1.0.0_to_1.1.0.sql".to_string(),
            checksum: checksum::compute(b"SELECT 'original';"),
            batch_count: 1,
            duration_ms: 3,
            executed_at: Utc::now(),
        })
        .await
        .unwrap();

    let manifest = Arc::new(CountingManifest::at("1.0.0"));
    let db = FakeDb::new(None);
    let err = MigrationManager::new(
        empty_config(),
        ProviderKey::SqlServer,
        "1.1.0",
        step_registry(),
        manifest.clone(),
    )
    .with_audit_log(audit)
    .try_migrate(&db, &CancellationToken::new())
    .await
    .unwrap_err();

    assert!(matches!(err, SecurityError::ChecksumMismatch { .. }));
    assert!(db.executed.lock().unwrap().is_empty());
    assert_eq!(manifest.update_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn script_from_untrusted_directory_aborts() {
    let trusted = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let path = outside.path().join("1.0.0_to_1.1.0.sql");
    std::fs::write(&path, "SELECT 1;").unwrap();

    let mut registry = ScriptRegistry::new();
    registry
        .set_trusted_root(trusted.path())
        .register(ScriptEntry {
            provider: ProviderKey::PostgreSql,
            from: v("1.0.0"),
            to: v("1.1.0"),
            locator: schema_migrator::migration::ArtifactLocator::File(path),
            expected_checksum: None,
        });

    let manifest = Arc::new(CountingManifest::at("1.0.0"));
    let db = FakeDb::new(None);
    let err = MigrationManager::new(
        empty_config(),
        ProviderKey::PostgreSql,
        "1.1.0",
        Arc::new(registry),
        manifest,
    )
    .try_migrate(&db, &CancellationToken::new())
    .await
    .unwrap_err();

    assert!(matches!(err, SecurityError::UntrustedSource { .. }));
    assert!(db.executed.lock().unwrap().is_empty());
}
