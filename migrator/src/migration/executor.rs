// Script execution
//
// Batches run one at a time, in order, on the caller's connection. The first failure stops the
// run. Nothing is rolled back: DDL is not transactional on every engine, so scripts are written
// to be re-runnable per batch instead.

use async_trait::async_trait;
use log::{error, info, warn};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::batch::Batch;

/// Something that can submit one SQL batch. Implemented by `DatabaseConnection`.
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run_batch(&self, sql: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("batch {index} of {total} failed: {source:#}")]
    Batch {
        index: usize,
        total: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("cancelled after {completed} of {total} batches")]
    Cancelled { completed: usize, total: usize },

    #[error("batch {index} of {total} timed out after {after:?}")]
    TimedOut {
        index: usize,
        total: usize,
        after: Duration,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ScriptExecutor {
    batch_timeout: Option<Duration>,
}

impl ScriptExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit how long a single batch may run. `None` leaves it to the driver.
    pub fn with_batch_timeout(mut self, batch_timeout: Option<Duration>) -> Self {
        self.batch_timeout = batch_timeout;
        self
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout
    }

    /// Run `batches` in order. Cancellation is only observed between batches.
    pub async fn execute(
        &self,
        runner: &dyn BatchRunner,
        batches: &[Batch],
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let total = batches.len();

        for (completed, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    "[PHASE: migration] [STEP: execute] Cancellation requested after {}/{} batches",
                    completed, total
                );
                return Err(ExecutionError::Cancelled { completed, total });
            }

            info!(
                "[PHASE: migration] [STEP: execute] Executing batch {}/{}",
                batch.index, total
            );
            let started = Instant::now();

            let outcome = match self.batch_timeout {
                Some(limit) => match timeout(limit, runner.run_batch(&batch.sql)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(
                            "[PHASE: migration] [STEP: execute] Batch {}/{} timed out after {:?}",
                            batch.index, total, limit
                        );
                        return Err(ExecutionError::TimedOut {
                            index: batch.index,
                            total,
                            after: limit,
                        });
                    }
                },
                None => runner.run_batch(&batch.sql).await,
            };

            if let Err(source) = outcome {
                error!(
                    "[PHASE: migration] [STEP: execute] Batch {}/{} failed: {:#}",
                    batch.index, total, source
                );
                return Err(ExecutionError::Batch {
                    index: batch.index,
                    total,
                    source,
                });
            }

            info!(
                "[PHASE: migration] [STEP: execute] Batch {}/{} completed ({}ms)",
                batch.index,
                total,
                started.elapsed().as_millis()
            );
        }

        Ok(())
    }
}
