use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CadenceError, Result};

/// Group used when a request does not name one.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Suffix appended to a job name to derive its trigger name.
pub const TRIGGER_SUFFIX: &str = "Trigger";

/// String-keyed payload handed to jobs at fire time.
pub type JobData = serde_json::Map<String, serde_json::Value>;

/// Identity of a job inside one engine: `(name, group)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Identity of a trigger inside one engine: `(name, group)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// The trigger key every scheduled job owns: `<job name>Trigger` in the job's group.
    pub fn for_job(job: &JobKey) -> Self {
        Self::new(format!("{}{}", job.name, TRIGGER_SUFFIX), job.group.clone())
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// One schedulable unit, addressed to the engine of `job_class`.
///
/// The firing policy comes from `cron_expression` when it is non-empty,
/// otherwise from the fixed-interval fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_name: String,
    #[serde(default = "default_group")]
    pub job_group: String,
    /// Fully-qualified job-class identifier; selects the owning engine.
    pub job_class: String,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub repeat_interval_secs: Option<u64>,
    /// `0` fires once, `-1` repeats indefinitely.
    #[serde(default)]
    pub repeat_count: Option<i32>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry: Option<u32>,
    #[serde(default)]
    pub job_data: Option<JobData>,
    #[serde(default)]
    pub description: Option<String>,
    /// Name of the engine that accepted the job; set by a successful add.
    #[serde(default)]
    pub engine_name: Option<String>,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

impl JobRequest {
    pub fn new(job_name: impl Into<String>, job_class: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            job_group: default_group(),
            job_class: job_class.into(),
            cron_expression: None,
            repeat_interval_secs: None,
            repeat_count: None,
            start_at: None,
            retry: None,
            job_data: None,
            description: None,
            engine_name: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.job_group = group.into();
        self
    }

    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.cron_expression = Some(expression.into());
        self
    }

    pub fn with_interval(mut self, every_secs: u64, repeat_count: i32) -> Self {
        self.repeat_interval_secs = Some(every_secs);
        self.repeat_count = Some(repeat_count);
        self
    }

    pub fn with_start_at(mut self, at: DateTime<Utc>) -> Self {
        self.start_at = Some(at);
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_data(mut self, data: JobData) -> Self {
        self.job_data = Some(data);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn job_key(&self) -> JobKey {
        JobKey::new(self.job_name.clone(), self.job_group.clone())
    }

    pub fn trigger_key(&self) -> TriggerKey {
        TriggerKey::for_job(&self.job_key())
    }

    /// The cron expression, if one is set and not blank.
    pub fn cron(&self) -> Option<&str> {
        self.cron_expression
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }

    /// Reject requests that cannot address a job at all.
    pub fn validate(&self) -> Result<()> {
        if self.job_name.trim().is_empty() {
            return Err(CadenceError::InvalidRequest("job name is empty".into()));
        }
        if self.job_group.trim().is_empty() {
            return Err(CadenceError::InvalidRequest(format!(
                "job group is empty for job {}",
                self.job_name
            )));
        }
        if self.job_class.trim().is_empty() {
            return Err(CadenceError::InvalidRequest(format!(
                "job class is empty for job {}",
                self.job_name
            )));
        }
        Ok(())
    }
}

/// Addresses every trigger of one group on the engine of `job_class`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRequest {
    pub job_class: String,
    pub job_group: String,
}

impl GroupRequest {
    pub fn new(job_class: impl Into<String>, job_group: impl Into<String>) -> Self {
        Self {
            job_class: job_class.into(),
            job_group: job_group.into(),
        }
    }
}
