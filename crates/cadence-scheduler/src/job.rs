use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use cadence_core::{JobData, JobKey, TriggerKey};

/// Failure reported by a job's own code.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job noticed a stop request and gave up early.
    #[error("job interrupted")]
    Interrupted,

    #[error("job failed: {0}")]
    Failed(String),
}

/// Executable logic of one job class. Every fire of every job scheduled on the
/// class's engine runs through the same instance.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn execute(&self, ctx: JobContext) -> Result<(), JobError>;
}

/// Everything a job sees about the fire it is running.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub engine_name: String,
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    pub scheduled_fire_time: DateTime<Utc>,
    pub fire_time: DateTime<Utc>,
    /// Job data overlaid by trigger data.
    pub data: JobData,
    /// Set when the fire ran late and went through its misfire policy.
    pub misfired: bool,
    pub(crate) cancel: CancellationToken,
}

impl JobContext {
    /// True once a stop has been requested for this fire.
    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token to `select!` on in long-running jobs.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A registered job class: identifier, optional declared short name, and its logic.
#[derive(Clone)]
pub struct JobClass {
    pub id: String,
    /// Overrides the simple class name when deriving the settings key.
    pub declared_name: Option<String>,
    pub job: Arc<dyn Job>,
}

impl JobClass {
    pub fn new(id: impl Into<String>, job: Arc<dyn Job>) -> Self {
        Self {
            id: id.into(),
            declared_name: None,
            job,
        }
    }

    pub fn with_declared_name(mut self, name: impl Into<String>) -> Self {
        self.declared_name = Some(name.into());
        self
    }
}

impl std::fmt::Debug for JobClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobClass")
            .field("id", &self.id)
            .field("declared_name", &self.declared_name)
            .finish_non_exhaustive()
    }
}

/// Observes job executions on every engine it is attached to.
pub trait JobListener: Send + Sync {
    fn name(&self) -> &str;

    fn job_to_be_executed(&self, _ctx: &JobContext) {}

    fn job_was_executed(&self, _ctx: &JobContext, _result: &Result<(), JobError>) {}
}

/// Observes trigger activity on every engine it is attached to.
pub trait TriggerListener: Send + Sync {
    fn name(&self) -> &str;

    fn trigger_fired(&self, _ctx: &JobContext) {}

    fn trigger_misfired(&self, _trigger: &TriggerKey) {}

    /// The trigger has no further fire times and was removed.
    fn trigger_complete(&self, _trigger: &TriggerKey) {}
}

/// Process-wide observers handed to every provisioned engine.
#[derive(Clone, Default)]
pub struct Listeners {
    pub job: Option<Arc<dyn JobListener>>,
    pub trigger: Option<Arc<dyn TriggerListener>>,
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("job", &self.job.as_ref().map(|l| l.name().to_string()))
            .field("trigger", &self.trigger.as_ref().map(|l| l.name().to_string()))
            .finish()
    }
}
