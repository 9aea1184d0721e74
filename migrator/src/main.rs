// schema-migrator
//
// Runs the startup migration and reports through the exit code:
//   0  database is at the required version (or migration is switched off)
//   1  migration failed; do not start serving
//   2  bad command line
//   3  untrusted or tampered script; hard stop

use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use schema_migrator::database::DatabaseConnection;
use schema_migrator::migration::{
    config_gate, JsonFileManifestStore, JsonlAuditLog, MigrationManager, ScriptExecutor,
    ScriptRegistry,
};
use schema_migrator::settings::{self, MigratorSettings};
use schema_migrator::utils::logging;

const EXIT_FAILED: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_SECURITY: u8 = 3;

const USAGE: &str = "usage: schema-migrator [--config <path>]";

/// `--config <path>` or `--config=<path>`.
fn config_path_arg(args: &[String]) -> Result<Option<PathBuf>, String> {
    let mut iter = args.iter().skip(1);
    let mut path = None;
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let value = iter
                .next()
                .ok_or_else(|| "--config needs a path".to_string())?;
            path = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--config=") {
            path = Some(PathBuf::from(value));
        } else {
            return Err(format!("unexpected argument '{}'", arg));
        }
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    let config_path = match config_path_arg(&args) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("schema-migrator: {}\n{}", e, USAGE);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let config = match settings::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("schema-migrator: {:#}", e);
            return ExitCode::from(EXIT_FAILED);
        }
    };

    let log_file = config.get_string("log_file").ok().map(PathBuf::from);
    if let Err(e) = logging::init_logging(LevelFilter::Info, log_file.as_deref()) {
        eprintln!("schema-migrator: failed to initialize logging: {}", e);
    }

    info!(
        "[PHASE: initialization] schema-migrator {} starting",
        env!("CARGO_PKG_VERSION")
    );

    // Switched off: no settings validation, no connection.
    if !config_gate::is_enabled(&config) {
        info!(
            "[PHASE: migration] [STEP: gate_checked] {} is false, skipping migration",
            config_gate::AUTO_MIGRATION_KEY
        );
        return ExitCode::SUCCESS;
    }

    let settings = match MigratorSettings::from_config(&config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("[PHASE: initialization] {:#}", e);
            return ExitCode::from(EXIT_FAILED);
        }
    };

    let mut registry = ScriptRegistry::builtin();
    if let Some(dir) = &settings.script_dir {
        if let Err(e) = registry.load_directory(dir) {
            error!("[PHASE: initialization] {:#}", e);
            return ExitCode::from(EXIT_FAILED);
        }
    }

    let connection = match DatabaseConnection::connect(
        settings.provider,
        &settings.connection_string,
        settings.connect_timeout(),
    )
    .await
    {
        Ok(connection) => connection,
        Err(e) => {
            error!("[PHASE: database] [STEP: connect] {:#}", e);
            return ExitCode::from(EXIT_FAILED);
        }
    };

    let mut manager = MigrationManager::new(
        config,
        connection.provider_key(),
        settings.target_version(),
        Arc::new(registry),
        Arc::new(JsonFileManifestStore::new(settings.manifest_path.clone())),
    )
    .with_executor(ScriptExecutor::new().with_batch_timeout(settings.batch_timeout()));
    if let Some(path) = &settings.audit_log_path {
        manager = manager.with_audit_log(Arc::new(JsonlAuditLog::new(path.clone())));
    }

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("[PHASE: migration] Interrupt received, stopping after the current batch");
                cancel.cancel();
            }
        })
    };

    let outcome = manager.try_migrate(&connection, &cancel).await;
    ctrl_c.abort();
    connection.close().await;

    match outcome {
        Ok(result) => {
            let summary = serde_json::to_string(&result).unwrap_or_default();
            if result.is_failed() {
                error!(
                    "[PHASE: migration] [STEP: done] {} - refusing to start: {}",
                    result.status(),
                    summary
                );
                ExitCode::from(EXIT_FAILED)
            } else {
                info!("[PHASE: migration] [STEP: done] {}: {}", result.status(), summary);
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("[PHASE: migration] [STEP: done] Security violation, aborting: {}", e);
            ExitCode::from(EXIT_SECURITY)
        }
    }
}
