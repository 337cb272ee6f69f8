use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cadence_core::{JobData, JobKey, TriggerKey};

/// Repeat count meaning "keep firing until deleted".
pub const REPEAT_INDEFINITELY: i32 = -1;

/// Counter payload keys attached to every cron trigger.
pub const FAIL_COUNT_KEY: &str = "fail_count";
pub const STOP_FLAG_KEY: &str = "stop";
pub const RETRY_KEY: &str = "retry";

/// Defines when and how often a trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Calendar cron expression with a leading seconds field.
    Cron { expression: String },

    /// Fire at `start_at`, then every `repeat_interval_ms`, `repeat_count` more times.
    FixedInterval {
        start_at: DateTime<Utc>,
        repeat_interval_ms: i64,
        repeat_count: i32,
    },
}

/// What to do with a fire the engine could not run on time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    /// Run the missed fire once as soon as it is noticed, then resume the schedule.
    FireNow,
    /// Drop missed fires; later fires keep their originally computed times.
    IgnoreMisfires,
}

impl std::fmt::Display for MisfirePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MisfirePolicy::FireNow => "fire_now",
            MisfirePolicy::IgnoreMisfires => "ignore_misfires",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MisfirePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fire_now" => Ok(MisfirePolicy::FireNow),
            "ignore_misfires" => Ok(MisfirePolicy::IgnoreMisfires),
            other => Err(format!("unknown misfire policy: {other}")),
        }
    }
}

/// A fully built firing policy, ready to hand to an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub schedule: Schedule,
    pub misfire_policy: MisfirePolicy,
    /// Merged over the job's data at fire time.
    pub data: JobData,
}

/// The job half of a schedule submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    pub description: Option<String>,
    pub data: JobData,
    /// Re-run a fire cut short by an unclean engine stop when the engine next opens
    /// its store; otherwise such a fire is dropped.
    pub requests_recovery: bool,
    /// Kept after its last trigger completes.
    pub durable: bool,
}

/// Lifecycle state of a stored trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// No such trigger.
    None,
    /// Waiting for its next fire time.
    Normal,
    Paused,
    /// No further fire times.
    Complete,
    /// Stored data could not be interpreted.
    Error,
    Blocked,
}

impl TriggerState {
    /// Upper-case label used by state queries.
    pub fn label(&self) -> &'static str {
        match self {
            TriggerState::None => "NONE",
            TriggerState::Normal => "NORMAL",
            TriggerState::Paused => "PAUSED",
            TriggerState::Complete => "COMPLETE",
            TriggerState::Error => "ERROR",
            TriggerState::Blocked => "BLOCKED",
        }
    }
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerState::None => "none",
            TriggerState::Normal => "normal",
            TriggerState::Paused => "paused",
            TriggerState::Complete => "complete",
            TriggerState::Error => "error",
            TriggerState::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TriggerState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(TriggerState::None),
            "normal" => Ok(TriggerState::Normal),
            "paused" => Ok(TriggerState::Paused),
            "complete" => Ok(TriggerState::Complete),
            "error" => Ok(TriggerState::Error),
            "blocked" => Ok(TriggerState::Blocked),
            other => Err(format!("unknown trigger state: {other}")),
        }
    }
}

/// A trigger row as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredTrigger {
    /// Row id; a replaced trigger gets a new one even when its key is reused.
    pub seq: i64,
    pub spec: TriggerSpec,
    pub state: TriggerState,
    pub next_fire: Option<DateTime<Utc>>,
    pub prev_fire: Option<DateTime<Utc>>,
    pub times_fired: u32,
}

/// Snapshot of one fire that is executing right now.
#[derive(Debug, Clone)]
pub struct ExecutingJob {
    pub fire_id: String,
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    pub fire_time: DateTime<Utc>,
}
