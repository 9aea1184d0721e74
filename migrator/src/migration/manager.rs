// Migration manager
//
// One startup run: gate -> versions -> script -> checksum -> batches -> manifest.
// Every ordinary outcome comes back as a `MigrationResult`; only trust violations are `Err`.

use chrono::Utc;
use config::Config;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::audit::{AuditEntry, AuditLog};
use super::batch;
use super::checksum;
use super::config_gate;
use super::error::SecurityError;
use super::executor::{BatchRunner, ScriptExecutor};
use super::manifest::{ManifestStore, UpdateManifestCommand};
use super::registry::ScriptProvider;
use super::result::MigrationResult;
use super::script::{MigrationScript, ProviderKey};
use super::version::SchemaVersion;

/// Steps of a run, in order. Used to tag log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    GateChecked,
    VersionsResolved,
    ScriptResolved,
    ChecksumComputed,
    Executed,
    ManifestUpdated,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::GateChecked => "gate_checked",
            Stage::VersionsResolved => "versions_resolved",
            Stage::ScriptResolved => "script_resolved",
            Stage::ChecksumComputed => "checksum_computed",
            Stage::Executed => "executed",
            Stage::ManifestUpdated => "manifest_updated",
            Stage::Done => "done",
        }
    }
}

pub struct MigrationManager {
    config: Config,
    provider: ProviderKey,
    target_version: String,
    scripts: Arc<dyn ScriptProvider>,
    manifest: Arc<dyn ManifestStore>,
    audit: Option<Arc<dyn AuditLog>>,
    executor: ScriptExecutor,
}

impl MigrationManager {
    /// `target_version` is the version the running binary requires (usually its own version).
    pub fn new(
        config: Config,
        provider: ProviderKey,
        target_version: impl Into<String>,
        scripts: Arc<dyn ScriptProvider>,
        manifest: Arc<dyn ManifestStore>,
    ) -> Self {
        Self {
            config,
            provider,
            target_version: target_version.into(),
            scripts,
            manifest,
            audit: None,
            executor: ScriptExecutor::new(),
        }
    }

    pub fn with_executor(mut self, executor: ScriptExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_audit_log(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn is_enabled(&self) -> bool {
        config_gate::is_enabled(&self.config)
    }

    /// Bring the database behind `db` up to the target version.
    ///
    /// The connection is borrowed for the duration of the run and never opened or closed here.
    pub async fn try_migrate(
        &self,
        db: &dyn BatchRunner,
        cancel: &CancellationToken,
    ) -> Result<MigrationResult, SecurityError> {
        let run_id = Uuid::new_v4();
        step(Stage::Idle, &format!("Starting migration run {}", run_id));

        if !self.is_enabled() {
            info!(
                "[PHASE: migration] [STEP: {}] Automatic migration is disabled ({} = false)",
                Stage::GateChecked.as_str(),
                config_gate::AUTO_MIGRATION_KEY
            );
            return Ok(MigrationResult::disabled());
        }
        step(Stage::GateChecked, "Automatic migration is enabled");

        let manifest = match self.manifest.get().await {
            Ok(record) => record,
            Err(e) => {
                let message = format!("Failed to read manifest: {:#}", e);
                error!("[PHASE: migration] [STEP: read_manifest] {}", message);
                return Ok(MigrationResult::failed(message, None, None));
            }
        };

        let from = match SchemaVersion::parse(&manifest.version_string) {
            Ok(v) => v,
            Err(e) => {
                let message = format!(
                    "Installed version '{}' is not a valid version: {}",
                    manifest.version_string, e
                );
                error!("[PHASE: migration] [STEP: resolve_versions] {}", message);
                return Ok(MigrationResult::version_parsing_error(message, None, None));
            }
        };
        let to = match SchemaVersion::parse(&self.target_version) {
            Ok(v) => v,
            Err(e) => {
                let message = format!(
                    "Target version '{}' is not a valid version: {}",
                    self.target_version, e
                );
                error!("[PHASE: migration] [STEP: resolve_versions] {}", message);
                return Ok(MigrationResult::version_parsing_error(
                    message,
                    Some(from),
                    None,
                ));
            }
        };
        step(
            Stage::VersionsResolved,
            &format!("Installed {} / required {} ({})", from, to, self.provider),
        );

        if from >= to {
            if from > to {
                warn!(
                    "[PHASE: migration] [STEP: {}] Installed schema {} is newer than this binary ({}); leaving it untouched",
                    Stage::VersionsResolved.as_str(),
                    from,
                    to
                );
            } else {
                info!(
                    "[PHASE: migration] [STEP: {}] Schema is current, no migration required",
                    Stage::VersionsResolved.as_str()
                );
            }
            return Ok(MigrationResult::not_required(from, to));
        }

        let script = match self.scripts.resolve(self.provider, &from, &to).await {
            Ok(Some(script)) => script,
            Ok(None) => {
                let message = format!(
                    "No migration script registered for {} {} -> {}",
                    self.provider, from, to
                );
                error!("[PHASE: migration] [STEP: resolve_script] {}", message);
                return Ok(MigrationResult::script_not_found(message, from, to));
            }
            Err(e) => {
                error!("[PHASE: migration] [STEP: resolve_script] {}", e);
                return Err(e);
            }
        };
        step(
            Stage::ScriptResolved,
            &format!("Using '{}' for {}", script.name, script.key),
        );

        let computed = script.checksum();
        if let Err(result) = self.verify_checksum(&script, &computed, &from, &to).await? {
            return Ok(result);
        }
        step(
            Stage::ChecksumComputed,
            &format!("sha256 {} ({})", computed, script.name),
        );

        let batches = batch::split(&script.content);
        if batches.is_empty() {
            let message = format!(
                "Script '{}' for {} contains no executable batches",
                script.name, script.key
            );
            error!("[PHASE: migration] [STEP: execute] {}", message);
            return Ok(MigrationResult::failed(message, Some(from), Some(to)));
        }

        let started = Instant::now();
        if let Err(e) = self.executor.execute(db, &batches, cancel).await {
            let message = format!(
                "Migration {} -> {} ('{}') failed: {}",
                from, to, script.name, e
            );
            error!("[PHASE: migration] [STEP: execute] {}", message);
            return Ok(MigrationResult::failed(message, Some(from), Some(to)));
        }
        let duration_ms = started.elapsed().as_millis() as i64;
        step(
            Stage::Executed,
            &format!("{} batches applied in {}ms", batches.len(), duration_ms),
        );

        if let Some(audit) = &self.audit {
            let entry = AuditEntry {
                run_id,
                provider: script.key.provider,
                from_version: script.key.from.clone(),
                to_version: script.key.to.clone(),
                script: script.name.clone(),
                checksum: computed.clone(),
                batch_count: batches.len(),
                duration_ms,
                executed_at: Utc::now(),
            };
            // The schema change already happened; a lost audit line must not block the manifest.
            if let Err(e) = audit.append(&entry).await {
                warn!(
                    "[PHASE: migration] [STEP: audit] Failed to record audit entry: {:#}",
                    e
                );
            }
        }

        let command = UpdateManifestCommand {
            version_string: to.to_string(),
            migrated_at: Utc::now(),
        };
        if let Err(e) = self.manifest.update(command).await {
            let message = format!(
                "Schema migrated to {} but the manifest update failed: {:#}",
                to, e
            );
            error!("[PHASE: migration] [STEP: manifest_update] {}", message);
            return Ok(MigrationResult::failed(message, Some(from), Some(to)));
        }
        step(Stage::ManifestUpdated, &format!("Manifest now at {}", to));

        step(
            Stage::Done,
            &format!("Migration run {} succeeded: {} -> {}", run_id, from, to),
        );
        Ok(MigrationResult::success(from, to))
    }

    /// Compare the fresh checksum with the registry pin and the audit history.
    ///
    /// Outer `Err` is a trust violation; inner `Err` is an ordinary failed result.
    async fn verify_checksum(
        &self,
        script: &MigrationScript,
        computed: &str,
        from: &SchemaVersion,
        to: &SchemaVersion,
    ) -> Result<Result<(), MigrationResult>, SecurityError> {
        if let Some(expected) = &script.expected_checksum {
            if !checksum::matches(expected, computed) {
                return Err(mismatch(script, "registry", expected, computed));
            }
        }

        let Some(audit) = &self.audit else {
            return Ok(Ok(()));
        };

        match audit.last_checksum(&script.key).await {
            Ok(Some(recorded)) if !checksum::matches(&recorded, computed) => {
                Err(mismatch(script, "audit log", &recorded, computed))
            }
            Ok(_) => Ok(Ok(())),
            Err(e) => {
                let message = format!("Failed to read checksum audit log: {:#}", e);
                error!("[PHASE: migration] [STEP: checksum] {}", message);
                Ok(Err(MigrationResult::failed(
                    message,
                    Some(from.clone()),
                    Some(to.clone()),
                )))
            }
        }
    }
}

fn step(stage: Stage, detail: &str) {
    info!("[PHASE: migration] [STEP: {}] {}", stage.as_str(), detail);
}

fn mismatch(
    script: &MigrationScript,
    origin: &'static str,
    expected: &str,
    computed: &str,
) -> SecurityError {
    let err = SecurityError::ChecksumMismatch {
        key: script.key.clone(),
        origin,
        expected: expected.to_string(),
        computed: computed.to_string(),
    };
    error!("[PHASE: migration] [STEP: checksum] {}", err);
    err
}
