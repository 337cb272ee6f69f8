//! Turns a [`JobRequest`] into the job body and firing policy an engine stores.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use cadence_core::{JobData, JobKey, JobRequest, TriggerKey};

use crate::error::{Result, SchedulerError};
use crate::schedule::{parse_cron, truncate_to_millis};
use crate::types::{
    JobDetail, MisfirePolicy, Schedule, TriggerSpec, FAIL_COUNT_KEY, REPEAT_INDEFINITELY,
    RETRY_KEY, STOP_FLAG_KEY,
};

/// Name prefix of the one-shot triggers created by fire-now.
pub const MANUAL_TRIGGER_PREFIX: &str = "MT_";

/// Build the trigger for `request`, starting fixed-interval schedules now when
/// the request has no start time.
pub fn build_trigger(request: &JobRequest) -> Result<TriggerSpec> {
    build_trigger_at(request, Utc::now())
}

/// [`build_trigger`] with an explicit notion of "now".
///
/// A non-empty cron expression always selects the cron policy and must parse;
/// the interval fields are then ignored.
pub fn build_trigger_at(request: &JobRequest, now: DateTime<Utc>) -> Result<TriggerSpec> {
    match request.cron() {
        Some(expression) => cron_trigger(request, expression),
        None => fixed_interval_trigger(request, now),
    }
}

fn cron_trigger(request: &JobRequest, expression: &str) -> Result<TriggerSpec> {
    parse_cron(expression)?;

    let mut data = JobData::new();
    data.insert(FAIL_COUNT_KEY.into(), Value::from(0));
    data.insert(STOP_FLAG_KEY.into(), Value::from("N"));
    data.insert(
        RETRY_KEY.into(),
        request.retry.map(Value::from).unwrap_or(Value::Null),
    );

    Ok(TriggerSpec {
        key: request.trigger_key(),
        job_key: request.job_key(),
        schedule: Schedule::Cron {
            expression: expression.to_string(),
        },
        misfire_policy: MisfirePolicy::FireNow,
        data,
    })
}

fn fixed_interval_trigger(request: &JobRequest, now: DateTime<Utc>) -> Result<TriggerSpec> {
    let every_secs = request.repeat_interval_secs.unwrap_or(0);
    let repeat_count = request.repeat_count.unwrap_or(0);

    if repeat_count < REPEAT_INDEFINITELY {
        return Err(SchedulerError::InvalidArgument(format!(
            "repeat count must be {REPEAT_INDEFINITELY} or more, got {repeat_count}"
        )));
    }
    if repeat_count != 0 && every_secs == 0 {
        return Err(SchedulerError::InvalidArgument(format!(
            "job {} repeats but has a zero repeat interval",
            request.job_key()
        )));
    }
    let repeat_interval_ms = i64::try_from(every_secs)
        .ok()
        .and_then(|secs| secs.checked_mul(1000))
        .ok_or_else(|| {
            SchedulerError::InvalidArgument(format!("repeat interval {every_secs}s is too large"))
        })?;

    Ok(TriggerSpec {
        key: request.trigger_key(),
        job_key: request.job_key(),
        schedule: Schedule::FixedInterval {
            start_at: truncate_to_millis(request.start_at.unwrap_or(now)),
            repeat_interval_ms,
            repeat_count,
        },
        misfire_policy: MisfirePolicy::IgnoreMisfires,
        data: JobData::new(),
    })
}

/// Job body for `request`: non-durable, recoverable, carrying the request's data.
pub fn build_job_detail(request: &JobRequest) -> JobDetail {
    JobDetail {
        key: request.job_key(),
        description: request.description.clone(),
        data: request.job_data.clone().unwrap_or_default(),
        requests_recovery: true,
        durable: false,
    }
}

/// One-shot trigger that runs `job` once, as soon as possible, with `data` merged in.
pub fn manual_trigger(job: &JobKey, data: JobData, now: DateTime<Utc>) -> TriggerSpec {
    let now = truncate_to_millis(now);
    TriggerSpec {
        key: TriggerKey::new(
            format!("{MANUAL_TRIGGER_PREFIX}{}", Uuid::new_v4().simple()),
            job.group.clone(),
        ),
        job_key: job.clone(),
        schedule: Schedule::FixedInterval {
            start_at: now,
            repeat_interval_ms: 0,
            repeat_count: 0,
        },
        misfire_policy: MisfirePolicy::FireNow,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const CLASS: &str = "app.jobs.ReportJob";

    #[test]
    fn cron_request_builds_cron_trigger_with_counters() {
        let req = JobRequest::new("j1", CLASS)
            .with_group("g1")
            .with_cron("0/5 * * * * ?")
            .with_retry(3);
        let trigger = build_trigger(&req).unwrap();

        assert_eq!(trigger.key, TriggerKey::new("j1Trigger", "g1"));
        assert_eq!(trigger.job_key, JobKey::new("j1", "g1"));
        assert_eq!(
            trigger.schedule,
            Schedule::Cron {
                expression: "0/5 * * * * ?".into()
            }
        );
        assert_eq!(trigger.misfire_policy, MisfirePolicy::FireNow);
        assert_eq!(trigger.data[FAIL_COUNT_KEY], Value::from(0));
        assert_eq!(trigger.data[STOP_FLAG_KEY], Value::from("N"));
        assert_eq!(trigger.data[RETRY_KEY], Value::from(3));
    }

    #[test]
    fn cron_misfire_policy_does_not_depend_on_retry() {
        for retry in [None, Some(0), Some(7)] {
            let mut req = JobRequest::new("j1", CLASS).with_cron("0 0 * * * ?");
            req.retry = retry;
            assert_eq!(build_trigger(&req).unwrap().misfire_policy, MisfirePolicy::FireNow);
        }
    }

    #[test]
    fn invalid_cron_never_falls_back_to_interval() {
        let req = JobRequest::new("j1", CLASS)
            .with_cron("every tuesday")
            .with_interval(10, 3);
        match build_trigger(&req).unwrap_err() {
            SchedulerError::InvalidCron { expression, .. } => assert_eq!(expression, "every tuesday"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cron_wins_over_interval_fields() {
        let req = JobRequest::new("j1", CLASS)
            .with_cron("0 0 * * * ?")
            .with_interval(10, 3);
        let trigger = build_trigger(&req).unwrap();
        assert!(matches!(trigger.schedule, Schedule::Cron { .. }));
    }

    #[test]
    fn interval_request_builds_fixed_interval_trigger() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let req = JobRequest::new("j1", CLASS).with_interval(15, 4);
        let trigger = build_trigger_at(&req, now).unwrap();

        assert_eq!(
            trigger.schedule,
            Schedule::FixedInterval {
                start_at: now,
                repeat_interval_ms: 15_000,
                repeat_count: 4,
            }
        );
        assert_eq!(trigger.misfire_policy, MisfirePolicy::IgnoreMisfires);
        assert!(trigger.data.is_empty());
    }

    #[test]
    fn interval_trigger_honours_start_time() {
        let start = Utc::now() + Duration::hours(2);
        let req = JobRequest::new("j1", CLASS)
            .with_interval(60, REPEAT_INDEFINITELY)
            .with_start_at(start);
        match build_trigger(&req).unwrap().schedule {
            Schedule::FixedInterval { start_at, .. } => {
                assert_eq!(start_at.timestamp_millis(), start.timestamp_millis());
                assert_eq!(start_at.timestamp_subsec_nanos() % 1_000_000, 0);
            }
            other => panic!("unexpected schedule: {other:?}"),
        }
    }

    #[test]
    fn default_start_is_on_the_millisecond_grid() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::nanoseconds(7_654_321);
        let req = JobRequest::new("j1", CLASS).with_interval(10, REPEAT_INDEFINITELY);
        let start = match build_trigger_at(&req, now).unwrap().schedule {
            Schedule::FixedInterval { start_at, .. } => start_at,
            other => panic!("unexpected schedule: {other:?}"),
        };
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::milliseconds(7));

        let manual = manual_trigger(&JobKey::new("j1", "g1"), JobData::new(), now);
        assert!(matches!(manual.schedule, Schedule::FixedInterval { start_at, .. } if start_at == start));
    }

    #[test]
    fn blank_cron_uses_interval_path() {
        let req = JobRequest::new("j1", CLASS).with_cron("").with_interval(5, 1);
        let trigger = build_trigger(&req).unwrap();
        assert!(matches!(trigger.schedule, Schedule::FixedInterval { .. }));
    }

    #[test]
    fn bare_request_fires_once_now() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let trigger = build_trigger_at(&JobRequest::new("j1", CLASS), now).unwrap();
        assert_eq!(
            trigger.schedule,
            Schedule::FixedInterval {
                start_at: now,
                repeat_interval_ms: 0,
                repeat_count: 0,
            }
        );
    }

    #[test]
    fn repeating_without_interval_is_rejected() {
        let mut req = JobRequest::new("j1", CLASS);
        req.repeat_count = Some(3);
        assert!(build_trigger(&req).unwrap_err().is_invalid_argument());

        let req = JobRequest::new("j1", CLASS).with_interval(5, -2);
        assert!(build_trigger(&req).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn job_detail_carries_request_data() {
        let mut data = JobData::new();
        data.insert("tenant".into(), Value::from("acme"));
        let req = JobRequest::new("j1", CLASS)
            .with_data(data.clone())
            .with_description("nightly");
        let detail = build_job_detail(&req);
        assert_eq!(detail.key, JobKey::new("j1", "DEFAULT"));
        assert_eq!(detail.data, data);
        assert_eq!(detail.description.as_deref(), Some("nightly"));
        assert!(detail.requests_recovery);
        assert!(!detail.durable);
    }

    #[test]
    fn manual_triggers_get_unique_names() {
        let job = JobKey::new("j1", "g1");
        let a = manual_trigger(&job, JobData::new(), Utc::now());
        let b = manual_trigger(&job, JobData::new(), Utc::now());
        assert_ne!(a.key, b.key);
        assert!(a.key.name.starts_with(MANUAL_TRIGGER_PREFIX));
        assert_eq!(a.key.group, "g1");
    }
}
