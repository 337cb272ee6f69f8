use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::{
    runtime::Runtime,
    sync::{watch, Notify, OwnedSemaphorePermit, Semaphore},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use cadence_core::{EngineConfig, JobData, JobKey, StoreConfig, TriggerKey};

use crate::{
    error::{Result, SchedulerError},
    job::{Job, JobContext, JobError, Listeners},
    schedule::{first_fire_time, plan_fire, truncate_to_millis},
    store::{FireRecord, TriggerStore},
    trigger::manual_trigger,
    types::{ExecutingJob, JobDetail, StoredTrigger, TriggerSpec, TriggerState},
};

/// Instance id carried by engines that are not clustered.
pub const NON_CLUSTERED: &str = "NON_CLUSTERED";

/// Everything needed to build one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub name: String,
    pub instance_id: String,
    pub thread_count: usize,
    pub thread_name_prefix: String,
    pub table_prefix: String,
    pub clustered: bool,
    pub auto_start: bool,
    pub store: StoreConfig,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig, store: &StoreConfig) -> Self {
        let instance_id = if config.clustered {
            format!("{}-{}", config.instance_name, Uuid::new_v4().simple())
        } else {
            NON_CLUSTERED.to_string()
        };
        Self {
            name: config.instance_name.clone(),
            instance_id,
            thread_count: config.thread_count,
            thread_name_prefix: config.thread_name_prefix.clone(),
            table_prefix: config.table_prefix.clone(),
            clustered: config.clustered,
            auto_start: config.auto_start,
            store: store.clone(),
        }
    }
}

/// Run state of an engine. Engines are built in standby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Standby,
    Started,
    Shutdown,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::Standby => "standby",
            EngineState::Started => "started",
            EngineState::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}

/// A fire in progress and the token that asks it to stop.
struct Running {
    job: ExecutingJob,
    cancel: CancellationToken,
}

/// State shared between the engine handle, its poll loop and its fires.
struct Shared {
    name: String,
    job: Arc<dyn Job>,
    store: Mutex<TriggerStore>,
    listeners: Listeners,
    executing: DashMap<String, Running>,
    permits: Arc<Semaphore>,
    wake: Notify,
    tracker: TaskTracker,
    poll_interval: Duration,
    misfire_threshold: chrono::Duration,
}

/// One job class's scheduler: a SQLite trigger store, a poll loop, and a
/// dedicated worker runtime that every fire of the class runs on.
///
/// All methods are synchronous. [`Engine::shutdown`] blocks on the worker
/// runtime and must not be called from inside an async context.
pub struct Engine {
    settings: EngineSettings,
    shared: Arc<Shared>,
    state: watch::Sender<EngineState>,
    runtime: Mutex<Option<Runtime>>,
}

impl Engine {
    /// Build the worker runtime, open the store and park the poll loop in standby.
    pub fn new(settings: EngineSettings, job: Arc<dyn Job>, listeners: Listeners) -> Result<Self> {
        if settings.thread_count == 0 {
            return Err(SchedulerError::InvalidArgument(format!(
                "engine {} needs at least one worker thread",
                settings.name
            )));
        }

        let prefix = settings.thread_name_prefix.clone();
        let next_thread = AtomicUsize::new(0);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(settings.thread_count)
            .thread_name_fn(move || {
                let n = next_thread.fetch_add(1, Ordering::SeqCst) + 1;
                format!("{prefix}{n}")
            })
            .enable_all()
            .build()?;

        let mut store = TriggerStore::open(&settings.store.path, &settings.table_prefix)?;
        let recovery = store.recover_interrupted(Utc::now())?;
        if recovery.rearmed + recovery.dropped > 0 {
            warn!(
                engine = %settings.name,
                rearmed = recovery.rearmed,
                dropped = recovery.dropped,
                "recovered fires interrupted by an unclean stop"
            );
        }
        let misfire_ms = i64::try_from(settings.store.misfire_threshold_ms).unwrap_or(i64::MAX);

        let shared = Arc::new(Shared {
            name: settings.name.clone(),
            job,
            store: Mutex::new(store),
            listeners,
            executing: DashMap::new(),
            permits: Arc::new(Semaphore::new(settings.thread_count)),
            wake: Notify::new(),
            tracker: TaskTracker::new(),
            poll_interval: Duration::from_millis(settings.store.poll_interval_ms),
            misfire_threshold: chrono::Duration::milliseconds(misfire_ms),
        });

        let (state, state_rx) = watch::channel(EngineState::Standby);
        runtime.spawn(poll_loop(Arc::clone(&shared), state_rx));

        info!(
            engine = %settings.name,
            instance_id = %settings.instance_id,
            threads = settings.thread_count,
            table_prefix = %settings.table_prefix,
            clustered = settings.clustered,
            "engine initialised"
        );
        if settings.clustered && settings.store.path == crate::store::IN_MEMORY {
            warn!(engine = %settings.name, "clustered engine on a private in-memory store");
        }

        Ok(Self {
            settings,
            shared,
            state,
            runtime: Mutex::new(Some(runtime)),
        })
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    pub fn is_started(&self) -> bool {
        self.state() == EngineState::Started
    }

    pub fn is_shutdown(&self) -> bool {
        self.state() == EngineState::Shutdown
    }

    /// Begin firing triggers.
    pub fn start(&self) -> Result<()> {
        self.ensure_live()?;
        self.state.send_replace(EngineState::Started);
        info!(engine = %self.name(), "engine started");
        Ok(())
    }

    /// Stop firing triggers; running fires continue.
    pub fn standby(&self) -> Result<()> {
        self.ensure_live()?;
        self.state.send_replace(EngineState::Standby);
        info!(engine = %self.name(), "engine in standby");
        Ok(())
    }

    /// Stop the engine for good. With `wait`, in-flight fires get up to the
    /// store's shutdown timeout to finish before they are cancelled.
    /// Calling it again is a no-op.
    pub fn shutdown(&self, wait: bool) -> Result<()> {
        let runtime = self.lock_runtime()?.take();
        let Some(runtime) = runtime else {
            return Ok(());
        };
        self.state.send_replace(EngineState::Shutdown);
        self.shared.tracker.close();

        if wait {
            let timeout = Duration::from_secs(self.settings.store.shutdown_timeout_secs);
            let tracker = self.shared.tracker.clone();
            let drained = runtime.block_on(async move {
                tokio::time::timeout(timeout, tracker.wait()).await.is_ok()
            });
            if !drained {
                warn!(
                    engine = %self.name(),
                    running = self.shared.executing.len(),
                    "fires still running at shutdown timeout, cancelling"
                );
                self.cancel_all();
            }
            runtime.shutdown_timeout(Duration::from_secs(1));
        } else {
            self.cancel_all();
            runtime.shutdown_background();
        }
        info!(engine = %self.name(), "engine shut down");
        Ok(())
    }

    /// Store a new job with its trigger. Returns the first fire time.
    pub fn schedule_job(&self, job: &JobDetail, trigger: &TriggerSpec) -> Result<DateTime<Utc>> {
        self.ensure_live()?;
        let first = self.first_fire(trigger)?;
        let state = self.store()?.store_job_and_trigger(job, trigger, first)?;
        self.shared.wake.notify_one();
        debug!(engine = %self.name(), job = %job.key, trigger = %trigger.key, %first, %state, "job scheduled");
        Ok(first)
    }

    /// Replace the trigger at `old` with `trigger`. `None` when `old` does not exist.
    pub fn reschedule_job(&self, old: &TriggerKey, trigger: &TriggerSpec) -> Result<Option<DateTime<Utc>>> {
        self.ensure_live()?;
        let first = self.first_fire(trigger)?;
        if !self.store()?.replace_trigger(old, trigger, first)? {
            return Ok(None);
        }
        self.shared.wake.notify_one();
        debug!(engine = %self.name(), trigger = %trigger.key, %first, "trigger replaced");
        Ok(Some(first))
    }

    /// Remove a job and its triggers. Fires already running are left alone.
    pub fn delete_job(&self, key: &JobKey) -> Result<bool> {
        self.ensure_live()?;
        self.store()?.remove_job(key)
    }

    pub fn pause_job(&self, key: &JobKey) -> Result<()> {
        self.ensure_live()?;
        let n = self.store()?.pause_job(key)?;
        debug!(engine = %self.name(), job = %key, triggers = n, "job paused");
        Ok(())
    }

    pub fn resume_job(&self, key: &JobKey) -> Result<()> {
        self.ensure_live()?;
        let n = self.store()?.resume_job(key)?;
        self.shared.wake.notify_one();
        debug!(engine = %self.name(), job = %key, triggers = n, "job resumed");
        Ok(())
    }

    /// Pause every trigger in `group`, including ones added later.
    pub fn pause_trigger_group(&self, group: &str) -> Result<usize> {
        self.ensure_live()?;
        self.store()?.pause_group(group)
    }

    pub fn resume_trigger_group(&self, group: &str) -> Result<usize> {
        self.ensure_live()?;
        let n = self.store()?.resume_group(group)?;
        self.shared.wake.notify_one();
        Ok(n)
    }

    pub fn paused_trigger_groups(&self) -> Result<Vec<String>> {
        self.ensure_live()?;
        self.store()?.paused_groups()
    }

    /// Fire `key` once as soon as a worker is free, with `data` overlaid on the job data.
    pub fn trigger_job(&self, key: &JobKey, data: JobData) -> Result<TriggerKey> {
        self.ensure_live()?;
        let now = truncate_to_millis(Utc::now());
        let trigger = manual_trigger(key, data, now);
        self.store()?.store_trigger(&trigger, now)?;
        self.shared.wake.notify_one();
        debug!(engine = %self.name(), job = %key, trigger = %trigger.key, "manual fire queued");
        Ok(trigger.key)
    }

    /// Signal every running fire of `key` to stop. Returns whether any was found.
    pub fn interrupt(&self, key: &JobKey) -> Result<bool> {
        self.ensure_live()?;
        let mut signalled = 0usize;
        for entry in self.shared.executing.iter() {
            if entry.job.job_key == *key {
                entry.cancel.cancel();
                signalled += 1;
            }
        }
        if signalled > 0 {
            info!(engine = %self.name(), job = %key, fires = signalled, "interrupt requested");
        }
        Ok(signalled > 0)
    }

    pub fn currently_executing(&self) -> Result<Vec<ExecutingJob>> {
        self.ensure_live()?;
        Ok(self
            .shared
            .executing
            .iter()
            .map(|entry| entry.job.clone())
            .collect())
    }

    pub fn check_exists(&self, key: &JobKey) -> Result<bool> {
        self.ensure_live()?;
        self.store()?.job_exists(key)
    }

    pub fn job_detail(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        self.ensure_live()?;
        self.store()?.job_detail(key)
    }

    /// Trigger keys of `key` in creation order.
    pub fn triggers_of_job(&self, key: &JobKey) -> Result<Vec<TriggerKey>> {
        self.ensure_live()?;
        self.store()?.triggers_of_job(key)
    }

    pub fn trigger(&self, key: &TriggerKey) -> Result<Option<StoredTrigger>> {
        self.ensure_live()?;
        self.store()?.trigger(key)
    }

    pub fn trigger_state(&self, key: &TriggerKey) -> Result<TriggerState> {
        self.ensure_live()?;
        self.store()?.trigger_state(key)
    }

    // --- private helpers ---------------------------------------------------

    fn ensure_live(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(SchedulerError::EngineShutdown {
                engine: self.name().to_string(),
            });
        }
        Ok(())
    }

    fn first_fire(&self, trigger: &TriggerSpec) -> Result<DateTime<Utc>> {
        first_fire_time(&trigger.schedule, Utc::now())?.ok_or_else(|| SchedulerError::WillNeverFire {
            trigger: trigger.key.to_string(),
        })
    }

    fn store(&self) -> Result<MutexGuard<'_, TriggerStore>> {
        self.shared.store()
    }

    fn lock_runtime(&self) -> Result<MutexGuard<'_, Option<Runtime>>> {
        self.runtime
            .lock()
            .map_err(|_| SchedulerError::Internal("engine runtime lock poisoned".into()))
    }

    fn cancel_all(&self) {
        for entry in self.shared.executing.iter() {
            entry.cancel.cancel();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let runtime = match self.runtime.get_mut() {
            Ok(runtime) => runtime.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(runtime) = runtime {
            self.state.send_replace(EngineState::Shutdown);
            self.cancel_all();
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.settings.name)
            .field("state", &self.state())
            .field("executing", &self.shared.executing.len())
            .finish_non_exhaustive()
    }
}

/// Poll for due triggers while started; park while in standby; exit on shutdown.
async fn poll_loop(shared: Arc<Shared>, mut state: watch::Receiver<EngineState>) {
    debug!(engine = %shared.name, "poll loop running");
    loop {
        let current = *state.borrow_and_update();
        match current {
            EngineState::Shutdown => break,
            EngineState::Standby => {
                if state.changed().await.is_err() {
                    break;
                }
                continue;
            }
            EngineState::Started => {}
        }

        if let Err(e) = shared.poll_once() {
            error!(engine = %shared.name, "poll error: {e}");
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.poll_interval) => {}
            _ = shared.wake.notified() => {}
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(engine = %shared.name, "poll loop stopped");
}

impl Shared {
    fn store(&self) -> Result<MutexGuard<'_, TriggerStore>> {
        self.store
            .lock()
            .map_err(|_| SchedulerError::Internal(format!("store lock of {} poisoned", self.name)))
    }

    /// Claim as many due triggers as there are free workers and dispatch them.
    fn poll_once(self: &Arc<Self>) -> Result<()> {
        let free = self.permits.available_permits();
        if free == 0 {
            return Ok(());
        }

        let now = Utc::now();
        let due = self.store()?.due_triggers(now, free)?;

        for trigger in due {
            let key = trigger.spec.key.clone();
            let Some(scheduled) = trigger.next_fire else {
                continue;
            };
            let plan = match plan_fire(
                &trigger.spec.schedule,
                trigger.spec.misfire_policy,
                scheduled,
                now,
                self.misfire_threshold,
            ) {
                Ok(plan) => plan,
                Err(e) => {
                    error!(engine = %self.name, trigger = %key, "cannot plan fire, parking trigger in error state: {e}");
                    self.store()?.mark_error(trigger.seq)?;
                    continue;
                }
            };

            if plan.misfired {
                warn!(
                    engine = %self.name,
                    trigger = %key,
                    %scheduled,
                    policy = %trigger.spec.misfire_policy,
                    "trigger misfired"
                );
                if let Some(listener) = &self.listeners.trigger {
                    listener.trigger_misfired(&key);
                }
            }

            if !plan.fire {
                let record = self.store()?.record_fire(trigger.seq, None, plan.next_fire)?;
                if record == FireRecord::Exhausted {
                    self.notify_complete(&key);
                }
                continue;
            }

            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };

            let (ctx, completes) = {
                let mut store = self.store()?;
                let Some(detail) = store.job_detail(&trigger.spec.job_key)? else {
                    warn!(engine = %self.name, trigger = %key, "trigger without job, removing");
                    store.complete_trigger(trigger.seq)?;
                    continue;
                };
                let completes = match store.record_fire(trigger.seq, Some(now), plan.next_fire)? {
                    FireRecord::Advanced => None,
                    FireRecord::Exhausted => Some(trigger.seq),
                    FireRecord::Gone => {
                        debug!(engine = %self.name, trigger = %key, "trigger replaced before it fired");
                        continue;
                    }
                };

                let mut data = detail.data;
                data.extend(trigger.spec.data.clone());
                let ctx = JobContext {
                    engine_name: self.name.clone(),
                    job_key: detail.key,
                    trigger_key: key.clone(),
                    scheduled_fire_time: scheduled,
                    fire_time: now,
                    data,
                    misfired: plan.misfired,
                    cancel: CancellationToken::new(),
                };
                (ctx, completes)
            };
            self.dispatch(ctx, completes, permit);
        }
        Ok(())
    }

    /// Run one fire on the worker runtime, holding `permit` until it returns.
    /// `completes` is the row of an exhausted trigger to remove afterwards.
    fn dispatch(self: &Arc<Self>, ctx: JobContext, completes: Option<i64>, permit: OwnedSemaphorePermit) {
        let fire_id = Uuid::new_v4().to_string();
        self.executing.insert(
            fire_id.clone(),
            Running {
                job: ExecutingJob {
                    fire_id: fire_id.clone(),
                    job_key: ctx.job_key.clone(),
                    trigger_key: ctx.trigger_key.clone(),
                    fire_time: ctx.fire_time,
                },
                cancel: ctx.cancel.clone(),
            },
        );

        if let Some(listener) = &self.listeners.trigger {
            listener.trigger_fired(&ctx);
        }
        if let Some(listener) = &self.listeners.job {
            listener.job_to_be_executed(&ctx);
        }

        let shared = Arc::clone(self);
        self.tracker.spawn(async move {
            let _permit = permit;
            let job = Arc::clone(&shared.job);
            let run_ctx = ctx.clone();
            // A panicking job must still release its slot and bookkeeping.
            let result = match tokio::spawn(async move { job.execute(run_ctx).await }).await {
                Ok(result) => result,
                Err(e) => Err(JobError::Failed(format!("job panicked: {e}"))),
            };

            match &result {
                Ok(()) => debug!(engine = %shared.name, job = %ctx.job_key, trigger = %ctx.trigger_key, "job finished"),
                Err(JobError::Interrupted) => info!(engine = %shared.name, job = %ctx.job_key, "job interrupted"),
                Err(e) => warn!(engine = %shared.name, job = %ctx.job_key, "job failed: {e}"),
            }
            if let Some(listener) = &shared.listeners.job {
                listener.job_was_executed(&ctx, &result);
            }

            shared.executing.remove(&fire_id);
            if let Some(seq) = completes {
                match shared.store().and_then(|mut s| s.complete_trigger(seq)) {
                    Ok(true) => shared.notify_complete(&ctx.trigger_key),
                    Ok(false) => debug!(engine = %shared.name, trigger = %ctx.trigger_key, "trigger replaced while its last fire ran"),
                    Err(e) => error!(engine = %shared.name, trigger = %ctx.trigger_key, "cannot complete trigger: {e}"),
                }
            }
            shared.wake.notify_one();
        });
    }

    fn notify_complete(&self, key: &TriggerKey) {
        debug!(engine = %self.name, trigger = %key, "trigger complete");
        if let Some(listener) = &self.listeners.trigger {
            listener.trigger_complete(key);
        }
    }
}
