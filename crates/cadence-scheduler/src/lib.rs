//! `cadence-scheduler`: one isolated scheduling engine per job class, with
//! SQLite persistence and a synchronous lifecycle API.
//!
//! # Overview
//!
//! At startup every [`JobClass`] goes through the [`Provisioner`], which
//! resolves its settings, builds an [`Engine`] (own worker runtime, own table
//! namespace) and stores it in the [`EngineRegistry`]. At runtime
//! [`JobService`] routes each request to its class's engine, turning the
//! request into a trigger through [`trigger::build_trigger`].
//!
//! # Firing policies
//!
//! | Request                 | Schedule        | Misfire policy    |
//! |-------------------------|-----------------|-------------------|
//! | non-empty cron          | `Cron`          | fire now, once    |
//! | interval / repeat count | `FixedInterval` | ignore missed     |
//! | neither                 | `FixedInterval` | single fire, now  |

pub mod db;
pub mod engine;
pub mod error;
pub mod job;
pub mod provision;
pub mod registry;
pub mod schedule;
pub mod service;
pub mod store;
pub mod trigger;
pub mod types;

pub use engine::{Engine, EngineSettings, EngineState, NON_CLUSTERED};
pub use error::{Result, SchedulerError};
pub use job::{Job, JobClass, JobContext, JobError, JobListener, Listeners, TriggerListener};
pub use provision::{EngineCustomizer, Provisioner, RegistrationReport};
pub use registry::EngineRegistry;
pub use service::{JobService, SCHEDULED};
pub use types::{
    ExecutingJob, JobDetail, MisfirePolicy, Schedule, TriggerSpec, TriggerState,
    REPEAT_INDEFINITELY,
};
