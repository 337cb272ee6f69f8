use std::sync::Arc;

use tracing::{error, info, warn};

use cadence_core::{CadenceConfig, ConfigResolver, EngineConfig, StoreConfig};

use crate::{
    engine::{Engine, EngineSettings},
    error::{Result, SchedulerError},
    job::{JobClass, Listeners},
    registry::EngineRegistry,
};

/// Adjusts engine settings after resolution and before the engine is built.
pub trait EngineCustomizer: Send + Sync {
    fn customize(&self, job_class: &JobClass, settings: &mut EngineSettings);
}

/// Outcome of [`Provisioner::register_all`].
#[derive(Debug, Default)]
pub struct RegistrationReport {
    pub provisioned: Vec<String>,
    /// Job classes whose engine is disabled.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, SchedulerError)>,
}

impl RegistrationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Builds one engine per enabled job class and registers it.
pub struct Provisioner {
    resolver: ConfigResolver,
    store: StoreConfig,
    listeners: Listeners,
    customizers: Vec<Arc<dyn EngineCustomizer>>,
}

impl Provisioner {
    pub fn new(config: &CadenceConfig) -> Self {
        Self::from_parts(config.resolver(), config.store.clone())
    }

    pub fn from_parts(resolver: ConfigResolver, store: StoreConfig) -> Self {
        Self {
            resolver,
            store,
            listeners: Listeners::default(),
            customizers: Vec::new(),
        }
    }

    /// Listeners attached to every engine built from now on.
    pub fn with_listeners(mut self, listeners: Listeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Customizers run in the order they were added.
    pub fn with_customizer(mut self, customizer: Arc<dyn EngineCustomizer>) -> Self {
        self.customizers.push(customizer);
        self
    }

    pub fn resolve(&self, job_class: &JobClass) -> Result<EngineConfig> {
        Ok(self
            .resolver
            .resolve(&job_class.id, job_class.declared_name.as_deref())?)
    }

    /// Resolve the settings of `job_class` and provision its engine.
    pub fn register(&self, registry: &EngineRegistry, job_class: &JobClass) -> Result<Option<Arc<Engine>>> {
        let config = self.resolve(job_class)?;
        self.provision(registry, job_class, &config)
    }

    /// Build, initialise and register the engine for `job_class`.
    ///
    /// Disabled job classes yield `None` and touch nothing.
    pub fn provision(
        &self,
        registry: &EngineRegistry,
        job_class: &JobClass,
        config: &EngineConfig,
    ) -> Result<Option<Arc<Engine>>> {
        if !config.enabled {
            info!(job_class = %job_class.id, key = %config.config_key, "engine disabled, skipping");
            return Ok(None);
        }
        if registry.is_live(&job_class.id) {
            return Err(SchedulerError::AlreadyRegistered {
                job_class: job_class.id.clone(),
            });
        }

        let mut settings = EngineSettings::from_config(config, &self.store);
        for customizer in &self.customizers {
            customizer.customize(job_class, &mut settings);
        }

        let engine = Arc::new(Engine::new(
            settings,
            Arc::clone(&job_class.job),
            self.listeners.clone(),
        )?);

        if let Err(e) = registry.put(&job_class.id, Arc::clone(&engine)) {
            if let Err(stop) = engine.shutdown(false) {
                warn!(engine = %engine.name(), "discarding unregistered engine failed: {stop}");
            }
            return Err(e);
        }

        info!(
            job_class = %job_class.id,
            engine = %engine.name(),
            auto_start = engine.settings().auto_start,
            "engine provisioned"
        );
        Ok(Some(engine))
    }

    /// Register every job class; a failure is recorded and the rest continue.
    pub fn register_all(&self, registry: &EngineRegistry, job_classes: &[JobClass]) -> RegistrationReport {
        let mut report = RegistrationReport::default();
        for job_class in job_classes {
            match self.register(registry, job_class) {
                Ok(Some(_)) => report.provisioned.push(job_class.id.clone()),
                Ok(None) => report.skipped.push(job_class.id.clone()),
                Err(e) => {
                    error!(job_class = %job_class.id, code = e.code(), "engine provisioning failed: {e}");
                    report.failed.push((job_class.id.clone(), e));
                }
            }
        }
        info!(
            provisioned = report.provisioned.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "job class registration finished"
        );
        report
    }
}
