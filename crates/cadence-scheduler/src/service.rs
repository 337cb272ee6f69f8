use std::sync::Arc;

use tracing::{info, warn};

use cadence_core::{GroupRequest, JobRequest};

use crate::{
    engine::Engine,
    error::{Result, SchedulerError},
    registry::EngineRegistry,
    trigger::{build_job_detail, build_trigger},
    types::TriggerState,
};

/// Label reported for a job whose first trigger is waiting normally.
pub const SCHEDULED: &str = "SCHEDULED";

/// Lifecycle operations on jobs, routed to the engine of each request's job class.
///
/// Every operation resolves the engine first, so an unregistered job class is
/// always an `UnregisteredJobClass` error and never a `false`.
#[derive(Debug, Clone, Copy)]
pub struct JobService<'a> {
    registry: &'a EngineRegistry,
}

impl<'a> JobService<'a> {
    pub fn new(registry: &'a EngineRegistry) -> Self {
        Self { registry }
    }

    /// Schedule a new job. `false` when the job or its trigger already exists;
    /// on success the accepting engine's name is written to `request`.
    pub fn add(&self, request: &mut JobRequest) -> Result<bool> {
        let engine = self.engine(&request.job_class)?;
        validate(request)?;
        let trigger = build_trigger(request)?;
        let job = build_job_detail(request);

        match engine.schedule_job(&job, &trigger) {
            Ok(first_fire) => {
                request.engine_name = Some(engine.name().to_string());
                info!(engine = %engine.name(), job = %job.key, %first_fire, "job added");
                Ok(true)
            }
            Err(SchedulerError::ObjectAlreadyExists { key }) => {
                warn!(engine = %engine.name(), job = %job.key, existing = %key, "job already scheduled");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the job's trigger with one rebuilt from `request`; the job body
    /// is untouched. `false` when the job has no trigger at the derived key.
    pub fn update(&self, request: &JobRequest) -> Result<bool> {
        let engine = self.engine(&request.job_class)?;
        validate(request)?;
        let trigger = build_trigger(request)?;

        match engine.reschedule_job(&request.trigger_key(), &trigger)? {
            Some(first_fire) => {
                info!(engine = %engine.name(), trigger = %trigger.key, %first_fire, "job rescheduled");
                Ok(true)
            }
            None => {
                warn!(engine = %engine.name(), trigger = %trigger.key, "no trigger to reschedule");
                Ok(false)
            }
        }
    }

    pub fn delete(&self, request: &JobRequest) -> Result<bool> {
        let engine = self.engine(&request.job_class)?;
        let deleted = engine.delete_job(&request.job_key())?;
        info!(engine = %engine.name(), job = %request.job_key(), deleted, "job delete");
        Ok(deleted)
    }

    pub fn pause(&self, request: &JobRequest) -> Result<bool> {
        let engine = self.engine(&request.job_class)?;
        engine.pause_job(&request.job_key())?;
        info!(engine = %engine.name(), job = %request.job_key(), "job paused");
        Ok(true)
    }

    pub fn resume(&self, request: &JobRequest) -> Result<bool> {
        let engine = self.engine(&request.job_class)?;
        engine.resume_job(&request.job_key())?;
        info!(engine = %engine.name(), job = %request.job_key(), "job resumed");
        Ok(true)
    }

    /// Run the job once right away, with the request's data overlaid on the job data.
    pub fn fire_now(&self, request: &JobRequest) -> Result<bool> {
        let engine = self.engine(&request.job_class)?;
        let data = request.job_data.clone().unwrap_or_default();
        let trigger = engine.trigger_job(&request.job_key(), data)?;
        info!(engine = %engine.name(), job = %request.job_key(), %trigger, "job fired manually");
        Ok(true)
    }

    /// Whether a fire of a job with this name is executing right now.
    pub fn is_running(&self, request: &JobRequest) -> Result<bool> {
        let engine = self.engine(&request.job_class)?;
        Ok(engine
            .currently_executing()?
            .iter()
            .any(|fire| fire.job_key.name == request.job_name))
    }

    pub fn exists(&self, request: &JobRequest) -> Result<bool> {
        self.engine(&request.job_class)?
            .check_exists(&request.job_key())
    }

    /// Coarse state of the job's first trigger: `SCHEDULED` for a normal
    /// trigger, the upper-case state name otherwise, `None` without triggers.
    pub fn state(&self, request: &JobRequest) -> Result<Option<String>> {
        let engine = self.engine(&request.job_class)?;
        let Some(first) = engine.triggers_of_job(&request.job_key())?.into_iter().next() else {
            return Ok(None);
        };
        let label = match engine.trigger_state(&first)? {
            TriggerState::Normal => SCHEDULED.to_string(),
            other => other.label().to_string(),
        };
        Ok(Some(label))
    }

    pub fn pause_group(&self, request: &GroupRequest) -> Result<bool> {
        let engine = self.engine(&request.job_class)?;
        let paused = engine.pause_trigger_group(&request.job_group)?;
        info!(engine = %engine.name(), group = %request.job_group, triggers = paused, "group paused");
        Ok(true)
    }

    pub fn resume_group(&self, request: &GroupRequest) -> Result<bool> {
        let engine = self.engine(&request.job_class)?;
        let resumed = engine.resume_trigger_group(&request.job_group)?;
        info!(engine = %engine.name(), group = %request.job_group, triggers = resumed, "group resumed");
        Ok(true)
    }

    /// Ask every running fire of the job to stop. Jobs that ignore their
    /// cancellation token run to completion regardless.
    pub fn stop_running(&self, request: &JobRequest) -> Result<bool> {
        let engine = self.engine(&request.job_class)?;
        engine.interrupt(&request.job_key())
    }

    fn engine(&self, job_class: &str) -> Result<Arc<Engine>> {
        self.registry.get(job_class)
    }
}

fn validate(request: &JobRequest) -> Result<()> {
    request
        .validate()
        .map_err(|e| SchedulerError::InvalidArgument(e.to_string()))
}
