use thiserror::Error;

use cadence_core::CadenceError;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A per-job-class or store setting is malformed.
    #[error("Configuration error: {0}")]
    Config(#[from] CadenceError),

    /// No engine was provisioned for this job class (unknown or disabled).
    #[error("No engine registered for job class {job_class}")]
    UnregisteredJobClass { job_class: String },

    /// A live engine already serves this job class.
    #[error("Job class {job_class} is already registered")]
    AlreadyRegistered { job_class: String },

    /// A non-empty cron expression that does not parse.
    #[error("Invalid cron expression {expression:?}: {reason}")]
    InvalidCron { expression: String, reason: String },

    /// The request cannot be turned into a trigger or job.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A job or trigger with the same key is already stored.
    #[error("Object already exists: {key}")]
    ObjectAlreadyExists { key: String },

    /// No job with the given key exists in the engine.
    #[error("Job not found: {key}")]
    JobNotFound { key: String },

    /// The trigger's schedule produces no fire time at all.
    #[error("Trigger {trigger} will never fire")]
    WillNeverFire { trigger: String },

    /// The engine has been shut down and accepts no more calls.
    #[error("Engine {engine} is shut down")]
    EngineShutdown { engine: String },

    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored JSON (schedule or job data) could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The engine's worker runtime could not be built.
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Config(_) => "CONFIG_ERROR",
            SchedulerError::UnregisteredJobClass { .. } => "UNREGISTERED_JOB_CLASS",
            SchedulerError::AlreadyRegistered { .. } => "ALREADY_REGISTERED",
            SchedulerError::InvalidCron { .. } => "INVALID_ARGUMENT",
            SchedulerError::InvalidArgument(_) => "INVALID_ARGUMENT",
            SchedulerError::ObjectAlreadyExists { .. } => "OBJECT_ALREADY_EXISTS",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::WillNeverFire { .. } => "WILL_NEVER_FIRE",
            SchedulerError::EngineShutdown { .. } => "ENGINE_SHUTDOWN",
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::Runtime(_) => "RUNTIME_ERROR",
            SchedulerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Caller mistakes: retrying the same request cannot succeed.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidCron { .. } | SchedulerError::InvalidArgument(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
