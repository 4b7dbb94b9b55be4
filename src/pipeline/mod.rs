//! Pipeline orchestration
//!
//! A pipeline is an ordered list of stages run sequentially. The first stage
//! error aborts the rest (nothing is rolled back). Each rebuild holds a
//! single-flight lock for its pipeline and is recorded in `pipeline_runs`.

mod products;
mod tickets;

pub use products::*;
pub use tickets::*;

use crate::audio::{RegistrationStats, TranscriptionStats};
use crate::backfill::BackfillStats;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::unify::UnionStats;
use crate::warehouse::{PipelineRun, RunStatus, Warehouse};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// How often and how patiently a failing stage is retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    /// One attempt, no retries
    fn default() -> Self {
        Self::from_config(&RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        })
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            backoff_multiplier: config.backoff_multiplier.max(1.0),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Wait before retrying after the `attempt`-th failure (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let wait_ms = (self.initial_backoff.as_millis() as f64 * factor)
            .min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(wait_ms.round() as u64)
    }
}

/// Errors that will fail the same way on every attempt
fn is_retryable(err: &Error) -> bool {
    !matches!(
        err,
        Error::Schema(_)
            | Error::Config(_)
            | Error::NotInitialized
            | Error::RebuildInProgress(_)
    )
}

/// How one stage went
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub name: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Run one stage under `policy`, appending its outcome to `outcomes`
///
/// The error of the last attempt is returned wrapped with the stage name.
pub async fn run_stage<T, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    outcomes: &mut Vec<StageOutcome>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    info!(stage = %name, "Starting stage");

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!(stage = %name, attempts = attempt, elapsed_ms, "Stage completed");
                outcomes.push(StageOutcome {
                    name: name.to_string(),
                    attempts: attempt,
                    elapsed_ms,
                    error: None,
                });
                return Ok(value);
            }
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let wait = policy.backoff_for(attempt);
                warn!(
                    stage = %name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    "Stage failed, retrying: {}",
                    e
                );
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                error!(stage = %name, attempts = attempt, "Stage failed: {}", e);
                outcomes.push(StageOutcome {
                    name: name.to_string(),
                    attempts: attempt,
                    elapsed_ms,
                    error: Some(e.to_string()),
                });
                return Err(Error::in_stage(name, e));
            }
        }
    }
}

/// Holds the rebuild lock of one pipeline until released
pub struct SingleFlight<'w> {
    wh: &'w Warehouse,
    pipeline: String,
    holder: String,
}

impl<'w> SingleFlight<'w> {
    /// Take the lock or fail with `RebuildInProgress`
    pub async fn acquire(wh: &'w Warehouse, pipeline: &str) -> Result<Self> {
        let holder = Uuid::new_v4().to_string();
        if !wh.try_acquire_lock(pipeline, &holder).await? {
            return Err(Error::RebuildInProgress(pipeline.to_string()));
        }
        Ok(Self {
            wh,
            pipeline: pipeline.to_string(),
            holder,
        })
    }

    pub async fn release(self) -> Result<()> {
        self.wh.release_lock(&self.pipeline, &self.holder).await
    }
}

/// Everything a rebuild did, stored with its run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub pipeline: String,
    pub run_id: String,
    pub status: RunStatus,
    pub stages: Vec<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<RegistrationStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub union: Option<UnionStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uris_filled: Option<u64>,
    pub backfills: Vec<BackfillStats>,
    pub error: Option<String>,
}

impl PipelineReport {
    fn new(run: &PipelineRun) -> Self {
        Self {
            pipeline: run.pipeline.clone(),
            run_id: run.id.clone(),
            status: RunStatus::Running,
            stages: Vec::new(),
            registration: None,
            transcription: None,
            union: None,
            uris_filled: None,
            backfills: Vec::new(),
            error: None,
        }
    }
}

/// Take the lock and open a run record
async fn begin_run<'w>(
    wh: &'w Warehouse,
    pipeline: &str,
) -> Result<(SingleFlight<'w>, PipelineReport)> {
    let guard = SingleFlight::acquire(wh, pipeline).await?;
    match wh.start_run(pipeline).await {
        Ok(run) => {
            info!(pipeline = %pipeline, run_id = %run.id, "Rebuild started");
            Ok((guard, PipelineReport::new(&run)))
        }
        Err(e) => {
            guard.release().await?;
            Err(e)
        }
    }
}

/// Close the run record, release the lock, and hand back the stages' result
async fn end_run(
    wh: &Warehouse,
    guard: SingleFlight<'_>,
    mut report: PipelineReport,
    result: Result<()>,
) -> Result<PipelineReport> {
    report.status = if result.is_ok() {
        RunStatus::Completed
    } else {
        RunStatus::Failed
    };
    report.error = result.as_ref().err().map(|e| e.to_string());

    let recorded = match serde_json::to_string(&report) {
        Ok(stats) => {
            wh.complete_run(&report.run_id, report.status, Some(stats), report.error.clone())
                .await
        }
        Err(e) => Err(e.into()),
    };
    let released = guard.release().await;

    result?;
    recorded?;
    released?;

    info!(
        pipeline = %report.pipeline,
        run_id = %report.run_id,
        stages = report.stages.len(),
        "Rebuild completed"
    );
    Ok(report)
}
