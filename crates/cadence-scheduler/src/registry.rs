use std::sync::{Arc, Mutex};

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{error, info};

use crate::{
    engine::Engine,
    error::{Result, SchedulerError},
};

/// Engines keyed by the job class they serve.
///
/// Written once per job class at startup, read concurrently by every
/// lifecycle call afterwards.
#[derive(Default)]
pub struct EngineRegistry {
    engines: DashMap<String, Arc<Engine>>,
    /// Registration order, for ordered start and reverse-ordered shutdown.
    order: Mutex<Vec<String>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `engine` for `job_class`.
    ///
    /// A job class whose engine was shut down may be registered again; one
    /// with a live engine is rejected with `AlreadyRegistered`.
    pub fn put(&self, job_class: &str, engine: Arc<Engine>) -> Result<()> {
        match self.engines.entry(job_class.to_string()) {
            Entry::Occupied(mut slot) => {
                if !slot.get().is_shutdown() {
                    return Err(SchedulerError::AlreadyRegistered {
                        job_class: job_class.to_string(),
                    });
                }
                slot.insert(engine);
            }
            Entry::Vacant(slot) => {
                slot.insert(engine);
            }
        }

        let mut order = self.lock_order()?;
        order.retain(|key| key != job_class);
        order.push(job_class.to_string());
        Ok(())
    }

    /// Engine serving `job_class`, or `UnregisteredJobClass`.
    pub fn get(&self, job_class: &str) -> Result<Arc<Engine>> {
        self.engines
            .get(job_class)
            .map(|engine| Arc::clone(engine.value()))
            .ok_or_else(|| SchedulerError::UnregisteredJobClass {
                job_class: job_class.to_string(),
            })
    }

    /// True when `job_class` has an engine that is not shut down.
    pub fn is_live(&self, job_class: &str) -> bool {
        self.engines
            .get(job_class)
            .is_some_and(|engine| !engine.is_shutdown())
    }

    /// Unregister `job_class`. The engine is returned as-is, not shut down.
    pub fn remove(&self, job_class: &str) -> Option<Arc<Engine>> {
        let removed = self.engines.remove(job_class).map(|(_, engine)| engine);
        if removed.is_some() {
            if let Ok(mut order) = self.order.lock() {
                order.retain(|key| key != job_class);
            }
        }
        removed
    }

    /// Job classes in registration order.
    pub fn job_classes(&self) -> Vec<String> {
        self.order.lock().map(|order| order.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Start every engine flagged for auto-start. Returns how many were started.
    pub fn start_all(&self) -> Result<usize> {
        let mut started = 0;
        for job_class in self.job_classes() {
            let engine = self.get(&job_class)?;
            if engine.settings().auto_start && !engine.is_started() && !engine.is_shutdown() {
                engine.start()?;
                started += 1;
            }
        }
        info!(started, registered = self.len(), "auto-start engines started");
        Ok(started)
    }

    /// Shut every engine down, last registered first, waiting for in-flight fires.
    ///
    /// Every engine is attempted; the first failure is returned.
    pub fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for job_class in self.job_classes().into_iter().rev() {
            let Ok(engine) = self.get(&job_class) else {
                continue;
            };
            info!(job_class = %job_class, engine = %engine.name(), "shutting down engine");
            if let Err(e) = engine.shutdown(true) {
                error!(job_class = %job_class, "engine shutdown failed: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock_order(&self) -> Result<std::sync::MutexGuard<'_, Vec<String>>> {
        self.order
            .lock()
            .map_err(|_| SchedulerError::Internal("registry order lock poisoned".into()))
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("job_classes", &self.job_classes())
            .finish()
    }
}
