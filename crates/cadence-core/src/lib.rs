//! `cadence-core` — request types, configuration loading and the per-job-class
//! configuration resolver shared by the scheduler and the boot binary.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CadenceConfig, ConfigResolver, EngineConfig, StoreConfig};
pub use error::{CadenceError, Result};
pub use types::{GroupRequest, JobData, JobKey, JobRequest, TriggerKey, DEFAULT_GROUP};
