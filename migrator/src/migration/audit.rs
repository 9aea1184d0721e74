// Checksum audit ledger
//
// One record per executed script. Before a script runs again under the same key, its fresh
// checksum must match the last one recorded here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::script::{ProviderKey, ScriptKey};
use super::version::SchemaVersion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub run_id: Uuid,
    pub provider: ProviderKey,
    pub from_version: SchemaVersion,
    pub to_version: SchemaVersion,
    pub script: String,
    pub checksum: String,
    pub batch_count: usize,
    pub duration_ms: i64,
    pub executed_at: DateTime<Utc>,
}

impl AuditEntry {
    fn is_for(&self, key: &ScriptKey) -> bool {
        self.provider == key.provider && self.from_version == key.from && self.to_version == key.to
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Checksum of the most recent execution recorded for `key`.
    async fn last_checksum(&self, key: &ScriptKey) -> Result<Option<String>>;
    async fn append(&self, entry: &AuditEntry) -> Result<()>;
}

/// Append-only JSON-lines file.
#[derive(Debug, Clone)]
pub struct JsonlAuditLog {
    path: PathBuf,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AuditLog for JsonlAuditLog {
    async fn last_checksum(&self, key: &ScriptKey) -> Result<Option<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read audit log: {:?}", self.path))
            }
        };

        let mut last = None;
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) if entry.is_for(key) => last = Some(entry.checksum),
                Ok(_) => {}
                Err(e) => warn!(
                    "[PHASE: migration] [STEP: audit] Skipping malformed audit line {} in {:?}: {}",
                    line_no + 1,
                    self.path,
                    e
                ),
            }
        }
        Ok(last)
    }

    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create audit log folder: {:?}", parent))?;
        }

        let mut line = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open audit log: {:?}", self.path))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to audit log: {:?}", self.path))?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to flush audit log: {:?}", self.path))?;
        Ok(())
    }
}
