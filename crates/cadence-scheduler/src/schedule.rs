use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;

use crate::error::{Result, SchedulerError};
use crate::types::{MisfirePolicy, Schedule, REPEAT_INDEFINITELY};

/// Parse a cron expression (seconds first, 6 or 7 fields, `?` accepted).
pub fn parse_cron(expression: &str) -> Result<CronSchedule> {
    CronSchedule::from_str(expression).map_err(|e| SchedulerError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Fire time of a trigger stored at `now`.
///
/// `None` means the schedule has no fire time at all.
pub fn first_fire_time(schedule: &Schedule, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match schedule {
        Schedule::Cron { expression } => Ok(parse_cron(expression)?.after(&now).next()),
        Schedule::FixedInterval { start_at, .. } => Ok(Some(*start_at)),
    }
}

/// Next fire time strictly after `after`, or `None` once the schedule is exhausted.
pub fn fire_time_after(schedule: &Schedule, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match schedule {
        Schedule::Cron { expression } => Ok(parse_cron(expression)?.after(&after).next()),
        Schedule::FixedInterval {
            start_at,
            repeat_interval_ms,
            repeat_count,
        } => Ok(after
            .checked_add_signed(Duration::milliseconds(1))
            .and_then(|t| grid_at_or_after(*start_at, *repeat_interval_ms, *repeat_count, t))),
    }
}

/// Drop sub-millisecond precision; stored fire times are epoch millis.
pub fn truncate_to_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

/// First point of `start + k * interval` (k in `0..=repeat_count`) at or after `t`.
///
/// `None` when the repeats are used up or the point lies past the representable range.
fn grid_at_or_after(
    start: DateTime<Utc>,
    interval_ms: i64,
    repeat_count: i32,
    t: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if t <= start {
        return Some(start);
    }
    if interval_ms <= 0 {
        return None;
    }
    let elapsed = t - start;
    let mut elapsed_ms = elapsed.num_milliseconds();
    if elapsed > Duration::milliseconds(elapsed_ms) {
        elapsed_ms += 1;
    }
    let k = elapsed_ms / interval_ms + i64::from(elapsed_ms % interval_ms != 0);
    if repeat_count != REPEAT_INDEFINITELY && k > i64::from(repeat_count) {
        return None;
    }
    let offset = k.checked_mul(interval_ms).and_then(Duration::try_milliseconds)?;
    start.checked_add_signed(offset)
}

/// Outcome of looking at a due trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirePlan {
    /// Run the job for this tick.
    pub fire: bool,
    /// The fire was later than the misfire threshold.
    pub misfired: bool,
    /// Where the trigger goes next; `None` completes it.
    pub next_fire: Option<DateTime<Utc>>,
}

/// Decide what a due trigger does at `now`.
///
/// On time (within `threshold`) it fires and advances from its scheduled time.
/// Late triggers follow their misfire policy: `FireNow` fires once and
/// advances from `now`; `IgnoreMisfires` skips the missed fires and lands on
/// the first original fire time that is not in the past.
pub fn plan_fire(
    schedule: &Schedule,
    policy: MisfirePolicy,
    scheduled: DateTime<Utc>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Result<FirePlan> {
    if now - scheduled <= threshold {
        return Ok(FirePlan {
            fire: true,
            misfired: false,
            next_fire: fire_time_after(schedule, scheduled)?,
        });
    }

    match policy {
        MisfirePolicy::FireNow => Ok(FirePlan {
            fire: true,
            misfired: true,
            next_fire: fire_time_after(schedule, now)?,
        }),
        MisfirePolicy::IgnoreMisfires => {
            let next_fire = match schedule {
                Schedule::Cron { expression } => parse_cron(expression)?.after(&now).next(),
                Schedule::FixedInterval {
                    start_at,
                    repeat_interval_ms,
                    repeat_count,
                } => grid_at_or_after(*start_at, *repeat_interval_ms, *repeat_count, now),
            };
            Ok(FirePlan {
                fire: false,
                misfired: true,
                next_fire,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn every_10s(repeat_count: i32) -> Schedule {
        Schedule::FixedInterval {
            start_at: t0(),
            repeat_interval_ms: 10_000,
            repeat_count,
        }
    }

    #[test]
    fn quartz_style_expressions_parse() {
        assert!(parse_cron("0/5 * * * * ?").is_ok());
        assert!(parse_cron("0 0 9 ? * MON-FRI").is_ok());
        assert!(parse_cron("0 30 4 1 * ? 2030").is_ok());
    }

    #[test]
    fn malformed_expressions_are_invalid_arguments() {
        for expr in ["not a cron", "* * * * *", "61 * * * * ?"] {
            let err = parse_cron(expr).unwrap_err();
            assert!(err.is_invalid_argument(), "{expr} should be rejected");
        }
    }

    #[test]
    fn fixed_interval_first_fire_is_start() {
        assert_eq!(first_fire_time(&every_10s(3), t0() - Duration::hours(1)).unwrap(), Some(t0()));
    }

    #[test]
    fn fixed_interval_walks_the_grid_and_stops() {
        let s = every_10s(2);
        let second = fire_time_after(&s, t0()).unwrap().unwrap();
        assert_eq!(second, t0() + Duration::seconds(10));
        let third = fire_time_after(&s, second).unwrap().unwrap();
        assert_eq!(third, t0() + Duration::seconds(20));
        assert_eq!(fire_time_after(&s, third).unwrap(), None);
    }

    #[test]
    fn single_fire_has_no_successor() {
        assert_eq!(fire_time_after(&every_10s(0), t0()).unwrap(), None);
    }

    #[test]
    fn indefinite_repeat_never_runs_out() {
        let s = every_10s(REPEAT_INDEFINITELY);
        let far = t0() + Duration::days(365);
        assert!(fire_time_after(&s, far).unwrap().is_some());
    }

    #[test]
    fn sub_millisecond_start_still_advances() {
        let start = t0() + Duration::nanoseconds(123_456);
        let s = Schedule::FixedInterval {
            start_at: start,
            repeat_interval_ms: 10_000,
            repeat_count: REPEAT_INDEFINITELY,
        };
        // The stored fire time has lost the sub-millisecond part.
        let stored = truncate_to_millis(start);
        let next = fire_time_after(&s, stored).unwrap().unwrap();
        assert_eq!(next, start + Duration::seconds(10));
    }

    #[test]
    fn truncation_keeps_whole_milliseconds() {
        let t = t0() + Duration::milliseconds(42) + Duration::nanoseconds(999_999);
        assert_eq!(truncate_to_millis(t), t0() + Duration::milliseconds(42));
        assert_eq!(truncate_to_millis(t0()), t0());
    }

    #[test]
    fn interval_past_the_calendar_ends_the_schedule() {
        let s = Schedule::FixedInterval {
            start_at: t0(),
            repeat_interval_ms: 10_000_000_000_000 * 1000,
            repeat_count: REPEAT_INDEFINITELY,
        };
        assert_eq!(first_fire_time(&s, t0()).unwrap(), Some(t0()));
        assert_eq!(fire_time_after(&s, t0()).unwrap(), None);

        let plan = plan_fire(&s, MisfirePolicy::IgnoreMisfires, t0(), t0(), Duration::seconds(5)).unwrap();
        assert!(plan.fire);
        assert_eq!(plan.next_fire, None);
    }

    #[test]
    fn cron_fires_every_five_seconds() {
        let s = Schedule::Cron {
            expression: "0/5 * * * * ?".into(),
        };
        let first = first_fire_time(&s, t0()).unwrap().unwrap();
        assert_eq!(first, t0() + Duration::seconds(5));
        let next = fire_time_after(&s, first).unwrap().unwrap();
        assert_eq!(next, t0() + Duration::seconds(10));
    }

    #[test]
    fn on_time_fire_advances_from_schedule() {
        let plan = plan_fire(
            &every_10s(REPEAT_INDEFINITELY),
            MisfirePolicy::IgnoreMisfires,
            t0(),
            t0() + Duration::milliseconds(300),
            Duration::seconds(5),
        )
        .unwrap();
        assert!(plan.fire);
        assert!(!plan.misfired);
        assert_eq!(plan.next_fire, Some(t0() + Duration::seconds(10)));
    }

    #[test]
    fn ignore_policy_drops_missed_fires_and_keeps_grid() {
        let now = t0() + Duration::seconds(35);
        let plan = plan_fire(
            &every_10s(REPEAT_INDEFINITELY),
            MisfirePolicy::IgnoreMisfires,
            t0(),
            now,
            Duration::seconds(5),
        )
        .unwrap();
        assert!(!plan.fire);
        assert!(plan.misfired);
        assert_eq!(plan.next_fire, Some(t0() + Duration::seconds(40)));
    }

    #[test]
    fn ignore_policy_completes_exhausted_schedule() {
        let plan = plan_fire(
            &every_10s(2),
            MisfirePolicy::IgnoreMisfires,
            t0(),
            t0() + Duration::seconds(100),
            Duration::seconds(5),
        )
        .unwrap();
        assert!(!plan.fire);
        assert_eq!(plan.next_fire, None);
    }

    #[test]
    fn fire_now_policy_runs_once_and_reschedules_from_now() {
        let s = Schedule::Cron {
            expression: "0 0 * * * ?".into(),
        };
        let now = t0() + Duration::hours(5) + Duration::minutes(20);
        let plan = plan_fire(&s, MisfirePolicy::FireNow, t0(), now, Duration::seconds(60)).unwrap();
        assert!(plan.fire);
        assert!(plan.misfired);
        assert_eq!(plan.next_fire, Some(t0() + Duration::hours(6)));
    }
}
