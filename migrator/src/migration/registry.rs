// Script registry
//
// Explicit (provider, version range) -> artifact table. Bundled scripts are embedded with
// `include_str!`; file-based scripts are only accepted from a trusted directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::path::{Path, PathBuf};

use super::error::SecurityError;
use super::script::{MigrationScript, ProviderKey, ScriptKey};
use super::version::SchemaVersion;

/// Where a script's SQL comes from.
#[derive(Debug, Clone)]
pub enum ArtifactLocator {
    Embedded {
        name: &'static str,
        sql: &'static str,
    },
    File(PathBuf),
}

impl ArtifactLocator {
    pub fn display_name(&self) -> String {
        match self {
            ArtifactLocator::Embedded { name, .. } => (*name).to_string(),
            ArtifactLocator::File(path) => path.display().to_string(),
        }
    }
}

/// One registered migration step.
///
/// Applies to an installed version `v` when `from <= v < to`, and produces `to`.
#[derive(Debug, Clone)]
pub struct ScriptEntry {
    pub provider: ProviderKey,
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub locator: ArtifactLocator,
    pub expected_checksum: Option<String>,
}

impl ScriptEntry {
    pub fn embedded(
        provider: ProviderKey,
        from: SchemaVersion,
        to: SchemaVersion,
        name: &'static str,
        sql: &'static str,
    ) -> Self {
        Self {
            provider,
            from,
            to,
            locator: ArtifactLocator::Embedded { name, sql },
            expected_checksum: None,
        }
    }

    pub fn with_expected_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.expected_checksum = Some(checksum.into());
        self
    }

    pub fn key(&self) -> ScriptKey {
        ScriptKey {
            provider: self.provider,
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }

    fn covers(&self, provider: ProviderKey, from: &SchemaVersion, to: &SchemaVersion) -> bool {
        self.provider == provider && self.to == *to && self.from <= *from && *from < self.to
    }
}

/// Resolves the script that moves a database from one version to another.
#[async_trait]
pub trait ScriptProvider: Send + Sync {
    /// `Ok(None)` when nothing is registered for the step; `Err` only for trust violations.
    async fn resolve(
        &self,
        provider: ProviderKey,
        from: &SchemaVersion,
        to: &SchemaVersion,
    ) -> Result<Option<MigrationScript>, SecurityError>;
}

#[derive(Debug, Clone, Default)]
pub struct ScriptRegistry {
    entries: Vec<ScriptEntry>,
    trusted_root: Option<PathBuf>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts shipped inside the binary.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(ScriptEntry::embedded(
                ProviderKey::SqlServer,
                SchemaVersion::new(1, 0, 0),
                SchemaVersion::new(1, 1, 0),
                "sqlserver/1.0.0_to_1.1.0.sql",
                include_str!("../../sql/sqlserver/1.0.0_to_1.1.0.sql"),
            ))
            .register(ScriptEntry::embedded(
                ProviderKey::PostgreSql,
                SchemaVersion::new(1, 0, 0),
                SchemaVersion::new(1, 1, 0),
                "postgresql/1.0.0_to_1.1.0.sql",
                include_str!("../../sql/postgresql/1.0.0_to_1.1.0.sql"),
            ))
            .register(ScriptEntry::embedded(
                ProviderKey::MySql,
                SchemaVersion::new(1, 0, 0),
                SchemaVersion::new(1, 1, 0),
                "mysql/1.0.0_to_1.1.0.sql",
                include_str!("../../sql/mysql/1.0.0_to_1.1.0.sql"),
            ));
        registry
    }

    pub fn register(&mut self, entry: ScriptEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[ScriptEntry] {
        &self.entries
    }

    /// Accept file artifacts that canonicalize to a path under `root`.
    pub fn set_trusted_root(&mut self, root: impl Into<PathBuf>) -> &mut Self {
        self.trusted_root = Some(root.into());
        self
    }

    /// Register every `<provider>/<from>_to_<to>.sql` under `dir` and trust `dir`.
    ///
    /// Returns how many scripts were added. Files whose names don't describe a forward step are
    /// skipped with a warning.
    pub fn load_directory(&mut self, dir: &Path) -> Result<usize> {
        let root = dir
            .canonicalize()
            .with_context(|| format!("Script directory not found: {:?}", dir))?;

        let mut added = 0;
        for provider in ProviderKey::ALL {
            let provider_dir = root.join(provider.as_str());
            if !provider_dir.is_dir() {
                continue;
            }

            let mut files: Vec<PathBuf> = std::fs::read_dir(&provider_dir)
                .with_context(|| format!("Failed to list script directory: {:?}", provider_dir))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "sql"))
                .collect();
            files.sort();

            for path in files {
                match parse_step_file_name(&path) {
                    Some((from, to)) => {
                        self.register(ScriptEntry {
                            provider,
                            from,
                            to,
                            locator: ArtifactLocator::File(path),
                            expected_checksum: None,
                        });
                        added += 1;
                    }
                    None => warn!(
                        "[PHASE: migration] [STEP: load_scripts] Skipping {:?}: expected <from>_to_<to>.sql with from < to",
                        path
                    ),
                }
            }
        }

        info!(
            "[PHASE: migration] [STEP: load_scripts] Registered {} scripts from {:?}",
            added, root
        );
        self.trusted_root = Some(root);
        Ok(added)
    }

    /// The entry covering `from -> to` for `provider`. The narrowest range (highest `from`) wins.
    pub fn select(
        &self,
        provider: ProviderKey,
        from: &SchemaVersion,
        to: &SchemaVersion,
    ) -> Option<&ScriptEntry> {
        self.entries
            .iter()
            .filter(|e| e.covers(provider, from, to))
            .max_by(|a, b| a.from.cmp(&b.from))
    }

    async fn load(&self, entry: &ScriptEntry) -> Result<Option<MigrationScript>, SecurityError> {
        let name = entry.locator.display_name();
        let content = match &entry.locator {
            ArtifactLocator::Embedded { sql, .. } => (*sql).to_string(),
            ArtifactLocator::File(path) => {
                let canonical = match path.canonicalize() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(
                            "[PHASE: migration] [STEP: resolve_script] Script file {:?} is missing: {}",
                            path, e
                        );
                        return Ok(None);
                    }
                };

                let trusted = self
                    .trusted_root
                    .as_ref()
                    .and_then(|root| root.canonicalize().ok())
                    .is_some_and(|root| canonical.starts_with(root));
                if !trusted {
                    return Err(SecurityError::UntrustedSource {
                        key: entry.key(),
                        name,
                        location: canonical.display().to_string(),
                    });
                }

                match tokio::fs::read_to_string(&canonical).await {
                    Ok(sql) => sql,
                    Err(e) => {
                        warn!(
                            "[PHASE: migration] [STEP: resolve_script] Script file {:?} is unreadable: {}",
                            canonical, e
                        );
                        return Ok(None);
                    }
                }
            }
        };

        Ok(Some(MigrationScript {
            key: entry.key(),
            name,
            content,
            expected_checksum: entry.expected_checksum.clone(),
        }))
    }
}

#[async_trait]
impl ScriptProvider for ScriptRegistry {
    async fn resolve(
        &self,
        provider: ProviderKey,
        from: &SchemaVersion,
        to: &SchemaVersion,
    ) -> Result<Option<MigrationScript>, SecurityError> {
        match self.select(provider, from, to) {
            Some(entry) => self.load(entry).await,
            None => Ok(None),
        }
    }
}

fn parse_step_file_name(path: &Path) -> Option<(SchemaVersion, SchemaVersion)> {
    let stem = path.file_stem()?.to_str()?;
    let (from, to) = stem.split_once("_to_")?;
    let from = SchemaVersion::parse(from).ok()?;
    let to = SchemaVersion::parse(to).ok()?;
    (from < to).then_some((from, to))
}
