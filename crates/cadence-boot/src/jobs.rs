use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use cadence_scheduler::{Job, JobClass, JobContext, JobError, JobListener};

pub const REPORT_JOB: &str = "cadence_boot::jobs::ReportJob";
pub const CLEANUP_JOB: &str = "cadence_boot::jobs::CleanupJob";

/// Every job class this binary knows how to run.
pub fn job_classes() -> Vec<JobClass> {
    vec![
        JobClass::new(REPORT_JOB, Arc::new(ReportJob::default())),
        JobClass::new(CLEANUP_JOB, Arc::new(CleanupJob)).with_declared_name("cleanupJob"),
    ]
}

/// Logs a line per fire.
#[derive(Default)]
pub struct ReportJob {
    runs: AtomicU64,
}

#[async_trait]
impl Job for ReportJob {
    async fn execute(&self, ctx: JobContext) -> Result<(), JobError> {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let tenant = ctx.data.get("tenant").and_then(Value::as_str).unwrap_or("-");
        info!(
            job = %ctx.job_key,
            run,
            tenant,
            misfired = ctx.misfired,
            "report generated"
        );
        Ok(())
    }
}

/// Works through `batches` batches (default 5), stopping early when interrupted.
pub struct CleanupJob;

#[async_trait]
impl Job for CleanupJob {
    async fn execute(&self, ctx: JobContext) -> Result<(), JobError> {
        let batches = ctx.data.get("batches").and_then(Value::as_u64).unwrap_or(5);
        for batch in 1..=batches {
            tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    warn!(job = %ctx.job_key, batch, "cleanup interrupted");
                    return Err(JobError::Interrupted);
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {
                    debug!(job = %ctx.job_key, batch, "cleanup batch done");
                }
            }
        }
        Ok(())
    }
}

/// Logs how long each fire took.
pub struct AuditListener;

impl JobListener for AuditListener {
    fn name(&self) -> &str {
        "audit"
    }

    fn job_was_executed(&self, ctx: &JobContext, result: &Result<(), JobError>) {
        let took_ms = (Utc::now() - ctx.fire_time).num_milliseconds();
        match result {
            Ok(()) => info!(engine = %ctx.engine_name, job = %ctx.job_key, took_ms, "fire finished"),
            Err(e) => warn!(engine = %ctx.engine_name, job = %ctx.job_key, took_ms, "fire failed: {e}"),
        }
    }
}
