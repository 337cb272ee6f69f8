use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use cadence_core::{CadenceConfig, JobRequest};
use cadence_scheduler::{
    store::IN_MEMORY, EngineRegistry, JobListener, JobService, Listeners, Provisioner,
};

mod jobs;

/// Cadence scheduler host.
#[derive(Parser)]
#[command(name = "cadence-boot")]
#[command(about = "Runs one scheduling engine per configured job class")]
#[command(version)]
struct Cli {
    /// Configuration file (default: $CADENCE_CONFIG, then ~/.cadence/cadence.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not schedule the demo report job
    #[arg(long)]
    no_demo: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_boot=info,cadence_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // explicit flag > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = cli
        .config
        .map(|p| p.display().to_string())
        .or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let config = CadenceConfig::load(config_path.as_deref())?;

    if config.store.path != IN_MEMORY {
        ensure_parent_dir(&config.store.path);
        info!(path = %config.store.path, "using SQLite job store");
    }

    let registry = EngineRegistry::new();
    let audit: Arc<dyn JobListener> = Arc::new(jobs::AuditListener);
    let provisioner = Provisioner::new(&config).with_listeners(Listeners {
        job: Some(audit),
        trigger: None,
    });
    let report = provisioner.register_all(&registry, &jobs::job_classes());
    for (job_class, e) in &report.failed {
        warn!(%job_class, code = e.code(), "job class not available: {e}");
    }
    registry.start_all()?;

    if !cli.no_demo {
        schedule_demo(&JobService::new(&registry));
    }

    info!(engines = registry.len(), "cadence running, Ctrl-C to stop");
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())?;

    info!("shutdown requested");
    registry.shutdown()?;
    Ok(())
}

/// Schedule a report every ten seconds if the report engine is enabled.
fn schedule_demo(service: &JobService<'_>) {
    let mut request = JobRequest::new("demoReport", jobs::REPORT_JOB)
        .with_group("demo")
        .with_cron("0/10 * * * * ?")
        .with_description("demo report every ten seconds");
    match service.add(&mut request) {
        Ok(true) => info!(
            engine = request.engine_name.as_deref().unwrap_or("-"),
            job = %request.job_key(),
            "demo job scheduled"
        ),
        Ok(false) => info!(job = %request.job_key(), "demo job already present"),
        Err(e) => warn!(code = e.code(), "demo job not scheduled: {e}"),
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
