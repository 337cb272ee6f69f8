use figment::{
    providers::{Env, Format, Toml},
    value::Value,
    Figment,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::error::{CadenceError, Result};

/// Root of every per-job-class section: `scheduler.<kebab-job-name>.<field>`.
pub const SCHEDULER_NAMESPACE: &str = "scheduler";
/// Section holding settings shared by every engine.
pub const STORE_SECTION: &str = "job-store";
/// Environment overrides: `CADENCE_SCHEDULER__REPORT_JOB__THREAD_COUNT=8`.
pub const ENV_PREFIX: &str = "CADENCE_";

pub const DEFAULT_THREAD_COUNT: usize = 3;
pub const DEFAULT_STORE_PATH: &str = ":memory:";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_MISFIRE_THRESHOLD_MS: u64 = 60_000;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Settings shared by every engine (`[job-store]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    /// SQLite database file, or `:memory:` for a private in-memory store per engine.
    #[serde(default = "default_store_path")]
    pub path: String,
    /// How often an engine polls for due triggers.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// A fire later than this is a misfire and goes through the trigger's misfire policy.
    #[serde(default = "default_misfire_threshold_ms")]
    pub misfire_threshold_ms: u64,
    /// Upper bound on waiting for in-flight fires at shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            poll_interval_ms: default_poll_interval_ms(),
            misfire_threshold_ms: default_misfire_threshold_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_store_path() -> String {
    DEFAULT_STORE_PATH.to_string()
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_misfire_threshold_ms() -> u64 {
    DEFAULT_MISFIRE_THRESHOLD_MS
}
fn default_shutdown_timeout_secs() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_SECS
}

/// Loaded configuration: the layered property source plus the parsed store section.
#[derive(Debug, Clone)]
pub struct CadenceConfig {
    figment: Figment,
    pub store: StoreConfig,
}

impl CadenceConfig {
    /// Load config from a TOML file with CADENCE_* env var overrides.
    ///
    /// A missing file is not an error; every setting has a default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let figment = Figment::new().merge(Toml::file(&path)).merge(env_provider());
        Self::from_figment(figment)
    }

    /// Wrap an already-built property source.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let store = match figment.find_value(STORE_SECTION) {
            Ok(_) => figment
                .extract_inner::<StoreConfig>(STORE_SECTION)
                .map_err(|e| CadenceError::Config(e.to_string()))?,
            Err(_) => StoreConfig::default(),
        };
        if store.poll_interval_ms == 0 {
            return Err(CadenceError::InvalidSetting {
                key: format!("{STORE_SECTION}.poll-interval-ms"),
                reason: "must be at least 1".into(),
            });
        }
        Ok(Self { figment, store })
    }

    pub fn figment(&self) -> &Figment {
        &self.figment
    }

    pub fn resolver(&self) -> ConfigResolver {
        ConfigResolver::new(self.figment.clone())
    }
}

fn env_provider() -> Env {
    // `__` separates path segments, `_` stands in for the `-` env names cannot carry.
    Env::prefixed(ENV_PREFIX).map(|key| key.as_str().replace("__", ".").replace('_', "-").into())
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cadence/cadence.toml", home)
}

/// Resolved settings for one job class's engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Kebab-case key the settings were read under.
    pub config_key: String,
    pub enabled: bool,
    pub instance_name: String,
    pub thread_count: usize,
    pub thread_name_prefix: String,
    /// Prefix of every table in the engine's persistence namespace.
    pub table_prefix: String,
    pub clustered: bool,
    pub auto_start: bool,
    pub description: Option<String>,
}

/// Reads per-job-class engine settings out of a layered property source.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    figment: Figment,
    namespace: String,
}

impl ConfigResolver {
    pub fn new(figment: Figment) -> Self {
        Self::with_namespace(figment, SCHEDULER_NAMESPACE)
    }

    pub fn with_namespace(figment: Figment, namespace: &str) -> Self {
        Self {
            figment,
            namespace: namespace.to_string(),
        }
    }

    /// Canonical settings key for a job class: declared name if any, else the
    /// simple class name, converted to kebab-case.
    pub fn config_key(job_class: &str, declared_name: Option<&str>) -> String {
        let short = declared_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| simple_name(job_class));
        camel_to_kebab(short)
    }

    /// Overlay `scheduler.<key>.*` onto the built-in defaults.
    ///
    /// Missing or blank values take the default; values of the wrong type are
    /// rejected.
    pub fn resolve(&self, job_class: &str, declared_name: Option<&str>) -> Result<EngineConfig> {
        let config_key = Self::config_key(job_class, declared_name);
        let prefix = format!("{}.{}", self.namespace, config_key);

        let enabled = self.read::<bool>(&prefix, "enabled")?.unwrap_or(false);
        let instance_name = self
            .read_string(&prefix, "instance-name")?
            .unwrap_or_else(|| format!("{}Scheduler", simple_name(job_class)));

        let thread_count = match self.read::<i64>(&prefix, "thread-count")? {
            None => DEFAULT_THREAD_COUNT,
            Some(n) if n >= 1 => n as usize,
            Some(n) => {
                return Err(CadenceError::InvalidSetting {
                    key: format!("{prefix}.thread-count"),
                    reason: format!("must be at least 1, got {n}"),
                })
            }
        };

        let thread_name_prefix = self
            .read_string(&prefix, "thread-name-prefix")?
            .unwrap_or_else(|| format!("{instance_name}_"));

        let table_prefix = match self.read_string(&prefix, "table-prefix")? {
            Some(p) => {
                validate_table_prefix(&p).map_err(|reason| CadenceError::InvalidSetting {
                    key: format!("{prefix}.table-prefix"),
                    reason,
                })?;
                p
            }
            None => default_table_prefix(&instance_name),
        };

        let clustered = self.read::<bool>(&prefix, "clustered")?.unwrap_or(false);
        let auto_start = self.read::<bool>(&prefix, "auto-startup")?.unwrap_or(false);
        let description = self.read_string(&prefix, "description")?;

        debug!(job_class, key = %config_key, enabled, "resolved engine config");

        Ok(EngineConfig {
            config_key,
            enabled,
            instance_name,
            thread_count,
            thread_name_prefix,
            table_prefix,
            clustered,
            auto_start,
            description,
        })
    }

    /// Present, non-blank value at `<prefix>.<field>`.
    fn lookup(&self, key: &str) -> Option<Value> {
        let value = self.figment.find_value(key).ok()?;
        match &value {
            Value::String(_, s) if s.trim().is_empty() => None,
            _ => Some(value),
        }
    }

    fn read<T: DeserializeOwned>(&self, prefix: &str, field: &str) -> Result<Option<T>> {
        let key = format!("{prefix}.{field}");
        let Some(value) = self.lookup(&key) else {
            return Ok(None);
        };
        value
            .deserialize::<T>()
            .map(Some)
            .map_err(|e| CadenceError::InvalidSetting {
                key,
                reason: e.to_string(),
            })
    }

    fn read_string(&self, prefix: &str, field: &str) -> Result<Option<String>> {
        let key = format!("{prefix}.{field}");
        let Some(value) = self.lookup(&key) else {
            return Ok(None);
        };
        match value.as_str() {
            Some(s) => Ok(Some(s.trim().to_string())),
            None => Err(CadenceError::InvalidSetting {
                key,
                reason: "expected a string".into(),
            }),
        }
    }
}

/// Last path segment of a job-class identifier (`app.jobs.ReportJob` or
/// `app::jobs::ReportJob` → `ReportJob`).
pub fn simple_name(job_class: &str) -> &str {
    let trimmed = job_class.trim();
    match trimmed.rsplit(|c: char| c == '.' || c == ':').next() {
        Some(last) if !last.is_empty() => last,
        _ => trimmed,
    }
}

/// `simpleJobA` → `simple-job-a`. Already-kebab input only gets lowercased.
pub fn camel_to_kebab(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && !out.ends_with('-') {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `ReportJobScheduler` → `SCHED_REPORTJOB_`.
pub fn default_table_prefix(instance_name: &str) -> String {
    let stem: String = instance_name
        .to_uppercase()
        .replace("SCHEDULER", "")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("SCHED_{stem}_")
}

/// Table prefixes are spliced into SQL identifiers.
fn validate_table_prefix(prefix: &str) -> std::result::Result<(), String> {
    let mut chars = prefix.chars();
    match chars.next() {
        None => return Err("must not be empty".into()),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err(format!("must start with a letter or '_', got {prefix:?}"))
        }
        _ => {}
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(format!("contains {bad:?}; only ASCII letters, digits and '_' are allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn resolver(toml: &str) -> ConfigResolver {
        ConfigResolver::new(Figment::from(Toml::string(toml)))
    }

    #[test]
    fn kebab_conversion() {
        assert_eq!(camel_to_kebab("TestSimpleJobA"), "test-simple-job-a");
        assert_eq!(camel_to_kebab("simpleJobA"), "simple-job-a");
        assert_eq!(camel_to_kebab("report"), "report");
        assert_eq!(camel_to_kebab("Report-Job"), "report-job");
    }

    #[test]
    fn kebab_conversion_is_idempotent() {
        for name in ["TestSimpleJobA", "simpleJobB", "ETLJob2", "already-kebab"] {
            let once = camel_to_kebab(name);
            assert_eq!(camel_to_kebab(&once), once);
            assert!(!once.starts_with('-'));
            assert!(once
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }
    }

    #[test]
    fn simple_name_handles_both_separators() {
        assert_eq!(simple_name("app.jobs.ReportJob"), "ReportJob");
        assert_eq!(simple_name("app::jobs::ReportJob"), "ReportJob");
        assert_eq!(simple_name("ReportJob"), "ReportJob");
    }

    #[test]
    fn declared_name_wins_over_class_name() {
        assert_eq!(
            ConfigResolver::config_key("app.jobs.TestSimpleJobA", Some("simpleJobA")),
            "simple-job-a"
        );
        assert_eq!(
            ConfigResolver::config_key("app.jobs.TestSimpleJobA", Some("  ")),
            "test-simple-job-a"
        );
    }

    #[test]
    fn defaults_apply_when_section_is_absent() {
        let cfg = resolver("").resolve("app.jobs.ReportJob", None).unwrap();
        assert!(!cfg.enabled);
        assert_eq!(cfg.config_key, "report-job");
        assert_eq!(cfg.instance_name, "ReportJobScheduler");
        assert_eq!(cfg.thread_count, DEFAULT_THREAD_COUNT);
        assert_eq!(cfg.thread_name_prefix, "ReportJobScheduler_");
        assert_eq!(cfg.table_prefix, "SCHED_REPORTJOB_");
        assert!(!cfg.clustered);
        assert!(!cfg.auto_start);
        assert!(cfg.description.is_none());
    }

    #[test]
    fn section_values_overlay_defaults() {
        let cfg = resolver(
            r#"
            [scheduler.report-job]
            enabled = true
            instance-name = "reports"
            thread-count = 5
            clustered = true
            auto-startup = true
            description = "nightly reports"
            "#,
        )
        .resolve("app.jobs.ReportJob", None)
        .unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.instance_name, "reports");
        assert_eq!(cfg.thread_count, 5);
        assert_eq!(cfg.thread_name_prefix, "reports_");
        assert_eq!(cfg.table_prefix, "SCHED_REPORTS_");
        assert!(cfg.clustered);
        assert!(cfg.auto_start);
        assert_eq!(cfg.description.as_deref(), Some("nightly reports"));
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = resolver(
            r#"
            [scheduler.report-job]
            enabled = true
            instance-name = ""
            table-prefix = "  "
            "#,
        )
        .resolve("app.jobs.ReportJob", None)
        .unwrap();
        assert_eq!(cfg.instance_name, "ReportJobScheduler");
        assert_eq!(cfg.table_prefix, "SCHED_REPORTJOB_");
    }

    #[test]
    fn non_boolean_enabled_is_rejected() {
        let err = resolver(
            r#"
            [scheduler.report-job]
            enabled = "sometimes"
            "#,
        )
        .resolve("app.jobs.ReportJob", None)
        .unwrap_err();
        match err {
            CadenceError::InvalidSetting { key, .. } => {
                assert_eq!(key, "scheduler.report-job.enabled")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_thread_count_is_rejected() {
        let err = resolver(
            r#"
            [scheduler.report-job]
            thread-count = 0
            "#,
        )
        .resolve("app.jobs.ReportJob", None)
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_SETTING");
    }

    #[test]
    fn table_prefix_must_be_an_identifier() {
        let err = resolver(
            r#"
            [scheduler.report-job]
            table-prefix = "reports; DROP"
            "#,
        )
        .resolve("app.jobs.ReportJob", None)
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_SETTING");
    }

    #[test]
    fn store_section_defaults_and_overrides() {
        let cfg = CadenceConfig::from_figment(Figment::from(Toml::string(""))).unwrap();
        assert_eq!(cfg.store, StoreConfig::default());

        let cfg = CadenceConfig::from_figment(Figment::from(Toml::string(
            r#"
            [job-store]
            path = "/tmp/cadence.db"
            poll-interval-ms = 50
            "#,
        )))
        .unwrap();
        assert_eq!(cfg.store.path, "/tmp/cadence.db");
        assert_eq!(cfg.store.poll_interval_ms, 50);
        assert_eq!(cfg.store.misfire_threshold_ms, DEFAULT_MISFIRE_THRESHOLD_MS);
    }

    #[test]
    fn env_overrides_file_values() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "cadence.toml",
                r#"
                [scheduler.report-job]
                enabled = true
                thread-count = 2
                "#,
            )?;
            jail.set_env("CADENCE_SCHEDULER__REPORT_JOB__THREAD_COUNT", "8");

            let cfg = CadenceConfig::load(Some("cadence.toml")).expect("config loads");
            let engine = cfg
                .resolver()
                .resolve("app.jobs.ReportJob", None)
                .expect("settings resolve");
            assert!(engine.enabled);
            assert_eq!(engine.thread_count, 8);
            Ok(())
        });
    }
}
