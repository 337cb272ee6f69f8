use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::{debug, error};

use cadence_core::{JobData, JobKey, TriggerKey};

use crate::{
    db::{init_db, Tables},
    error::{Result, SchedulerError},
    types::{JobDetail, MisfirePolicy, StoredTrigger, TriggerSpec, TriggerState},
};

/// Path value selecting a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Jobs and triggers of one engine, persisted under its table prefix.
pub struct TriggerStore {
    conn: Connection,
    tables: Tables,
}

/// Columns read for every trigger query, in `decode_trigger` order.
const TRIGGER_COLUMNS: &str = "trigger_name, trigger_group, job_name, job_group, schedule, \
     misfire, trigger_data, state, next_fire_ms, prev_fire_ms, times_fired, seq";

impl TriggerStore {
    /// Open (or create) the namespace `prefix` in the database at `path`.
    pub fn open(path: &str, prefix: &str) -> Result<Self> {
        let conn = if path == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            let conn = Connection::open(path)?;
            // Engines of several job classes may share one file.
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
            conn
        };
        let tables = init_db(&conn, prefix)?;
        Ok(Self { conn, tables })
    }

    /// Insert a new job together with its first trigger.
    ///
    /// Fails with `ObjectAlreadyExists` (and writes nothing) when either key is taken.
    pub fn store_job_and_trigger(
        &mut self,
        job: &JobDetail,
        trigger: &TriggerSpec,
        first_fire: DateTime<Utc>,
    ) -> Result<TriggerState> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;
        if job_exists_in(&tx, &tables, &job.key)? {
            return Err(SchedulerError::ObjectAlreadyExists {
                key: job.key.to_string(),
            });
        }
        if trigger_exists_in(&tx, &tables, &trigger.key)? {
            return Err(SchedulerError::ObjectAlreadyExists {
                key: trigger.key.to_string(),
            });
        }
        tx.execute(
            &format!(
                "INSERT INTO {} (job_name, job_group, description, job_data,
                                 requests_recovery, durable, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                tables.jobs
            ),
            params![
                job.key.name,
                job.key.group,
                job.description,
                serde_json::to_string(&job.data)?,
                job.requests_recovery,
                job.durable,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let state = insert_trigger(&tx, &tables, trigger, first_fire)?;
        tx.commit()?;
        Ok(state)
    }

    /// Attach an extra trigger to an existing job.
    pub fn store_trigger(&mut self, trigger: &TriggerSpec, first_fire: DateTime<Utc>) -> Result<TriggerState> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;
        if !job_exists_in(&tx, &tables, &trigger.job_key)? {
            return Err(SchedulerError::JobNotFound {
                key: trigger.job_key.to_string(),
            });
        }
        if trigger_exists_in(&tx, &tables, &trigger.key)? {
            return Err(SchedulerError::ObjectAlreadyExists {
                key: trigger.key.to_string(),
            });
        }
        let state = insert_trigger(&tx, &tables, trigger, first_fire)?;
        tx.commit()?;
        Ok(state)
    }

    /// Swap the trigger stored at `old` for `new`. Returns `false` when `old` does not exist.
    pub fn replace_trigger(
        &mut self,
        old: &TriggerKey,
        new: &TriggerSpec,
        first_fire: DateTime<Utc>,
    ) -> Result<bool> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;
        let owner: Option<(String, String)> = tx
            .query_row(
                &format!(
                    "SELECT job_name, job_group FROM {}
                     WHERE trigger_name = ?1 AND trigger_group = ?2",
                    tables.triggers
                ),
                params![old.name, old.group],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((job_name, job_group)) = owner else {
            return Ok(false);
        };
        if new.job_key != JobKey::new(job_name, job_group) {
            return Err(SchedulerError::InvalidArgument(format!(
                "new trigger {} belongs to job {}, not to the job of {}",
                new.key, new.job_key, old
            )));
        }
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE trigger_name = ?1 AND trigger_group = ?2",
                tables.triggers
            ),
            params![old.name, old.group],
        )?;
        insert_trigger(&tx, &tables, new, first_fire)?;
        tx.commit()?;
        Ok(true)
    }

    /// Delete a job and all of its triggers. Returns `false` if the job did not exist.
    pub fn remove_job(&mut self, key: &JobKey) -> Result<bool> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE job_name = ?1 AND job_group = ?2",
                tables.triggers
            ),
            params![key.name, key.group],
        )?;
        let n = tx.execute(
            &format!(
                "DELETE FROM {} WHERE job_name = ?1 AND job_group = ?2",
                tables.jobs
            ),
            params![key.name, key.group],
        )?;
        tx.commit()?;
        Ok(n > 0)
    }

    pub fn job_exists(&self, key: &JobKey) -> Result<bool> {
        job_exists_in(&self.conn, &self.tables, key)
    }

    pub fn job_detail(&self, key: &JobKey) -> Result<Option<JobDetail>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT description, job_data, requests_recovery, durable FROM {}
                     WHERE job_name = ?1 AND job_group = ?2",
                    self.tables.jobs
                ),
                params![key.name, key.group],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((description, data_json, requests_recovery, durable)) = row else {
            return Ok(None);
        };
        Ok(Some(JobDetail {
            key: key.clone(),
            description,
            data: serde_json::from_str::<JobData>(&data_json)?,
            requests_recovery,
            durable,
        }))
    }

    /// Trigger keys of a job in creation order.
    pub fn triggers_of_job(&self, key: &JobKey) -> Result<Vec<TriggerKey>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT trigger_name, trigger_group FROM {}
             WHERE job_name = ?1 AND job_group = ?2 ORDER BY seq",
            self.tables.triggers
        ))?;
        let keys = stmt
            .query_map(params![key.name, key.group], |row| {
                Ok(TriggerKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    pub fn trigger(&self, key: &TriggerKey) -> Result<Option<StoredTrigger>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TRIGGER_COLUMNS} FROM {}
                     WHERE trigger_name = ?1 AND trigger_group = ?2",
                    self.tables.triggers
                ),
                params![key.name, key.group],
                raw_trigger,
            )
            .optional()?
            .map(decode_trigger)
            .transpose()
    }

    /// `TriggerState::None` when no such trigger exists.
    pub fn trigger_state(&self, key: &TriggerKey) -> Result<TriggerState> {
        let state: Option<String> = self
            .conn
            .query_row(
                &format!(
                    "SELECT state FROM {} WHERE trigger_name = ?1 AND trigger_group = ?2",
                    self.tables.triggers
                ),
                params![key.name, key.group],
                |row| row.get(0),
            )
            .optional()?;
        match state {
            None => Ok(TriggerState::None),
            Some(s) => s.parse().map_err(SchedulerError::Internal),
        }
    }

    /// Pause every trigger of a job. Returns the number of triggers paused.
    pub fn pause_job(&mut self, key: &JobKey) -> Result<usize> {
        Ok(self.conn.execute(
            &format!(
                "UPDATE {} SET state = 'paused'
                 WHERE job_name = ?1 AND job_group = ?2 AND state IN ('normal', 'blocked')",
                self.tables.triggers
            ),
            params![key.name, key.group],
        )?)
    }

    /// Resume every paused trigger of a job. Returns the number of triggers resumed.
    pub fn resume_job(&mut self, key: &JobKey) -> Result<usize> {
        Ok(self.conn.execute(
            &format!(
                "UPDATE {} SET state = 'normal'
                 WHERE job_name = ?1 AND job_group = ?2 AND state = 'paused'",
                self.tables.triggers
            ),
            params![key.name, key.group],
        )?)
    }

    /// Pause a trigger group; triggers stored into it later start paused too.
    pub fn pause_group(&mut self, group: &str) -> Result<usize> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (trigger_group) VALUES (?1)",
                tables.paused_groups
            ),
            params![group],
        )?;
        let n = tx.execute(
            &format!(
                "UPDATE {} SET state = 'paused'
                 WHERE trigger_group = ?1 AND state IN ('normal', 'blocked')",
                tables.triggers
            ),
            params![group],
        )?;
        tx.commit()?;
        Ok(n)
    }

    pub fn resume_group(&mut self, group: &str) -> Result<usize> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM {} WHERE trigger_group = ?1", tables.paused_groups),
            params![group],
        )?;
        let n = tx.execute(
            &format!(
                "UPDATE {} SET state = 'normal' WHERE trigger_group = ?1 AND state = 'paused'",
                tables.triggers
            ),
            params![group],
        )?;
        tx.commit()?;
        Ok(n)
    }

    pub fn paused_groups(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT trigger_group FROM {} ORDER BY trigger_group",
            self.tables.paused_groups
        ))?;
        let groups = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(groups)
    }

    /// Up to `limit` normal triggers whose next fire time is at or before `now`,
    /// earliest first. Rows that cannot be decoded are moved to the error state.
    pub fn due_triggers(&mut self, now: DateTime<Utc>, limit: usize) -> Result<Vec<StoredTrigger>> {
        let raw: Vec<RawTrigger> = {
            let mut stmt = self.conn.prepare_cached(&format!(
                "SELECT {TRIGGER_COLUMNS} FROM {}
                 WHERE state = 'normal' AND next_fire_ms IS NOT NULL AND next_fire_ms <= ?1
                 ORDER BY next_fire_ms, seq LIMIT ?2",
                self.tables.triggers
            ))?;
            let rows = stmt
                .query_map(params![now.timestamp_millis(), limit as i64], raw_trigger)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let mut due = Vec::with_capacity(raw.len());
        for row in raw {
            let key = TriggerKey::new(row.trigger_name.clone(), row.trigger_group.clone());
            let seq = row.seq;
            match decode_trigger(row) {
                Ok(trigger) => due.push(trigger),
                Err(e) => {
                    error!(trigger = %key, "undecodable trigger row: {e}");
                    self.mark_error(seq)?;
                }
            }
        }
        Ok(due)
    }

    /// Record the outcome of a poll for the trigger row `seq`.
    ///
    /// `fired_at` is set when the job runs for this tick. Without a `next_fire`
    /// the trigger is exhausted: a trigger that did not fire is removed at once,
    /// one that fired is parked as `complete` until [`Self::complete_trigger`]
    /// runs after its job returns. A row replaced or deleted since it was read
    /// is left alone and reported as [`FireRecord::Gone`].
    pub fn record_fire(
        &mut self,
        seq: i64,
        fired_at: Option<DateTime<Utc>>,
        next_fire: Option<DateTime<Utc>>,
    ) -> Result<FireRecord> {
        let updated = match (fired_at, next_fire) {
            (None, None) => {
                return Ok(if self.complete_trigger(seq)? {
                    FireRecord::Exhausted
                } else {
                    FireRecord::Gone
                });
            }
            (None, Some(next)) => self.conn.execute(
                &format!(
                    "UPDATE {} SET next_fire_ms = ?1 WHERE seq = ?2",
                    self.tables.triggers
                ),
                params![next.timestamp_millis(), seq],
            )?,
            (Some(at), next) => {
                let state = if next.is_some() {
                    TriggerState::Normal
                } else {
                    TriggerState::Complete
                };
                // Keep a pause that landed while the trigger was being picked up.
                self.conn.execute(
                    &format!(
                        "UPDATE {} SET next_fire_ms = ?1, prev_fire_ms = ?2,
                                       times_fired = times_fired + 1,
                                       state = CASE WHEN state = 'paused' AND ?3 = 'normal'
                                                    THEN 'paused' ELSE ?3 END
                         WHERE seq = ?4",
                        self.tables.triggers
                    ),
                    params![
                        next.map(|t| t.timestamp_millis()),
                        at.timestamp_millis(),
                        state.to_string(),
                        seq
                    ],
                )?
            }
        };
        Ok(match (updated, next_fire) {
            (0, _) => FireRecord::Gone,
            (_, Some(_)) => FireRecord::Advanced,
            (_, None) => FireRecord::Exhausted,
        })
    }

    /// Remove the finished trigger row `seq`, and its job too when that was
    /// the job's last trigger and the job is not durable. Returns `false` when
    /// the row no longer exists.
    pub fn complete_trigger(&mut self, seq: i64) -> Result<bool> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;
        let removed = complete_in(&tx, &tables, seq)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Move the trigger row `seq` to the error state so polling skips it.
    pub fn mark_error(&mut self, seq: i64) -> Result<()> {
        self.set_state(seq, TriggerState::Error)
    }

    /// Deal with fires cut short by an unclean stop, which are left parked as
    /// `complete`. Triggers of jobs that request recovery are due again at
    /// `now` and run as soon as they are noticed; the rest are completed.
    pub fn recover_interrupted(&mut self, now: DateTime<Utc>) -> Result<Recovery> {
        let tables = self.tables.clone();
        let tx = self.conn.transaction()?;
        let rearmed = tx.execute(
            &format!(
                "UPDATE {triggers} SET next_fire_ms = ?1, misfire = ?2,
                        state = CASE WHEN EXISTS (SELECT 1 FROM {paused} p
                                                  WHERE p.trigger_group = {triggers}.trigger_group)
                                     THEN 'paused' ELSE 'normal' END
                 WHERE state = 'complete' AND EXISTS (
                     SELECT 1 FROM {jobs} j
                     WHERE j.job_name = {triggers}.job_name AND j.job_group = {triggers}.job_group
                       AND j.requests_recovery = 1)",
                triggers = tables.triggers,
                paused = tables.paused_groups,
                jobs = tables.jobs,
            ),
            params![now.timestamp_millis(), MisfirePolicy::FireNow.to_string()],
        )?;
        let stale: Vec<i64> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT seq FROM {} WHERE state = 'complete' ORDER BY seq",
                tables.triggers
            ))?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        for seq in &stale {
            complete_in(&tx, &tables, *seq)?;
        }
        tx.commit()?;
        Ok(Recovery {
            rearmed,
            dropped: stale.len(),
        })
    }

    fn set_state(&mut self, seq: i64, state: TriggerState) -> Result<()> {
        self.conn.execute(
            &format!("UPDATE {} SET state = ?1 WHERE seq = ?2", self.tables.triggers),
            params![state.to_string(), seq],
        )?;
        Ok(())
    }
}

/// What [`TriggerStore::record_fire`] did to a trigger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireRecord {
    /// The trigger has a next fire time.
    Advanced,
    /// No fire times remain.
    Exhausted,
    /// The row was replaced or deleted since it was read.
    Gone,
}

/// Triggers touched by [`TriggerStore::recover_interrupted`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    pub rearmed: usize,
    pub dropped: usize,
}

fn complete_in(tx: &Transaction<'_>, tables: &Tables, seq: i64) -> Result<bool> {
    let owner: Option<(String, String)> = tx
        .query_row(
            &format!("SELECT job_name, job_group FROM {} WHERE seq = ?1", tables.triggers),
            params![seq],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((job_name, job_group)) = owner else {
        return Ok(false);
    };
    tx.execute(
        &format!("DELETE FROM {} WHERE seq = ?1", tables.triggers),
        params![seq],
    )?;
    let orphaned = tx.execute(
        &format!(
            "DELETE FROM {jobs} WHERE job_name = ?1 AND job_group = ?2 AND durable = 0
             AND NOT EXISTS (SELECT 1 FROM {triggers} WHERE job_name = ?1 AND job_group = ?2)",
            jobs = tables.jobs,
            triggers = tables.triggers,
        ),
        params![job_name, job_group],
    )?;
    if orphaned > 0 {
        debug!(job = %JobKey::new(job_name, job_group), "non-durable job removed with its last trigger");
    }
    Ok(true)
}

fn job_exists_in(conn: &Connection, tables: &Tables, key: &JobKey) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!(
                "SELECT 1 FROM {} WHERE job_name = ?1 AND job_group = ?2",
                tables.jobs
            ),
            params![key.name, key.group],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn trigger_exists_in(conn: &Connection, tables: &Tables, key: &TriggerKey) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!(
                "SELECT 1 FROM {} WHERE trigger_name = ?1 AND trigger_group = ?2",
                tables.triggers
            ),
            params![key.name, key.group],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Insert `trigger`, paused if its group is paused.
fn insert_trigger(
    tx: &Transaction<'_>,
    tables: &Tables,
    trigger: &TriggerSpec,
    first_fire: DateTime<Utc>,
) -> Result<TriggerState> {
    let group_paused: Option<i64> = tx
        .query_row(
            &format!("SELECT 1 FROM {} WHERE trigger_group = ?1", tables.paused_groups),
            params![trigger.key.group],
            |row| row.get(0),
        )
        .optional()?;
    let state = if group_paused.is_some() {
        TriggerState::Paused
    } else {
        TriggerState::Normal
    };
    tx.execute(
        &format!(
            "INSERT INTO {}
             (trigger_name, trigger_group, job_name, job_group, schedule, misfire,
              trigger_data, state, next_fire_ms, prev_fire_ms, times_fired, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, 0, ?10)",
            tables.triggers
        ),
        params![
            trigger.key.name,
            trigger.key.group,
            trigger.job_key.name,
            trigger.job_key.group,
            serde_json::to_string(&trigger.schedule)?,
            trigger.misfire_policy.to_string(),
            serde_json::to_string(&trigger.data)?,
            state.to_string(),
            first_fire.timestamp_millis(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(state)
}

struct RawTrigger {
    trigger_name: String,
    trigger_group: String,
    job_name: String,
    job_group: String,
    schedule: String,
    misfire: String,
    trigger_data: String,
    state: String,
    next_fire_ms: Option<i64>,
    prev_fire_ms: Option<i64>,
    times_fired: u32,
    seq: i64,
}

fn raw_trigger(row: &Row<'_>) -> rusqlite::Result<RawTrigger> {
    Ok(RawTrigger {
        trigger_name: row.get(0)?,
        trigger_group: row.get(1)?,
        job_name: row.get(2)?,
        job_group: row.get(3)?,
        schedule: row.get(4)?,
        misfire: row.get(5)?,
        trigger_data: row.get(6)?,
        state: row.get(7)?,
        next_fire_ms: row.get(8)?,
        prev_fire_ms: row.get(9)?,
        times_fired: row.get(10)?,
        seq: row.get(11)?,
    })
}

fn decode_trigger(raw: RawTrigger) -> Result<StoredTrigger> {
    Ok(StoredTrigger {
        seq: raw.seq,
        spec: TriggerSpec {
            key: TriggerKey::new(raw.trigger_name, raw.trigger_group),
            job_key: JobKey::new(raw.job_name, raw.job_group),
            schedule: serde_json::from_str(&raw.schedule)?,
            misfire_policy: raw.misfire.parse().map_err(SchedulerError::Internal)?,
            data: serde_json::from_str(&raw.trigger_data)?,
        },
        state: raw.state.parse().map_err(SchedulerError::Internal)?,
        next_fire: raw.next_fire_ms.and_then(DateTime::from_timestamp_millis),
        prev_fire: raw.prev_fire_ms.and_then(DateTime::from_timestamp_millis),
        times_fired: raw.times_fired,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::{build_job_detail, build_trigger};
    use cadence_core::JobRequest;
    use chrono::Duration;

    fn store() -> TriggerStore {
        TriggerStore::open(IN_MEMORY, "SCHED_TEST_").unwrap()
    }

    fn submit(store: &mut TriggerStore, req: &JobRequest, at: DateTime<Utc>) -> Result<TriggerState> {
        store.store_job_and_trigger(&build_job_detail(req), &build_trigger(req)?, at)
    }

    #[test]
    fn duplicate_job_is_rejected_without_writes() {
        let mut s = store();
        let now = Utc::now();
        let req = JobRequest::new("j1", "X").with_group("g1").with_interval(10, 2);
        assert_eq!(submit(&mut s, &req, now).unwrap(), TriggerState::Normal);

        let again = JobRequest::new("j1", "X").with_group("g1").with_cron("0 0 * * * ?");
        let err = submit(&mut s, &again, now).unwrap_err();
        assert_eq!(err.code(), "OBJECT_ALREADY_EXISTS");

        let stored = s.trigger(&req.trigger_key()).unwrap().unwrap();
        assert!(matches!(stored.spec.schedule, crate::types::Schedule::FixedInterval { .. }));
        assert_eq!(s.triggers_of_job(&req.job_key()).unwrap().len(), 1);
    }

    #[test]
    fn due_triggers_are_ordered_and_limited() {
        let mut s = store();
        let now = Utc::now();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let req = JobRequest::new(*name, "X");
            submit(&mut s, &req, now - Duration::seconds(10 - i as i64)).unwrap();
        }
        let due = s.due_triggers(now, 2).unwrap();
        let names: Vec<_> = due.iter().map(|t| t.spec.job_key.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn paused_triggers_are_not_due() {
        let mut s = store();
        let now = Utc::now();
        let req = JobRequest::new("j1", "X");
        submit(&mut s, &req, now).unwrap();
        assert_eq!(s.pause_job(&req.job_key()).unwrap(), 1);
        assert!(s.due_triggers(now, 10).unwrap().is_empty());
        assert_eq!(s.trigger_state(&req.trigger_key()).unwrap(), TriggerState::Paused);
        assert_eq!(s.resume_job(&req.job_key()).unwrap(), 1);
        assert_eq!(s.due_triggers(now, 10).unwrap().len(), 1);
    }

    #[test]
    fn paused_group_captures_new_triggers() {
        let mut s = store();
        s.pause_group("g1").unwrap();
        let req = JobRequest::new("j1", "X").with_group("g1");
        assert_eq!(submit(&mut s, &req, Utc::now()).unwrap(), TriggerState::Paused);
        assert_eq!(s.paused_groups().unwrap(), ["g1"]);
        s.resume_group("g1").unwrap();
        assert_eq!(s.trigger_state(&req.trigger_key()).unwrap(), TriggerState::Normal);
        assert!(s.paused_groups().unwrap().is_empty());
    }

    #[test]
    fn completing_last_trigger_removes_job() {
        let mut s = store();
        let req = JobRequest::new("j1", "X");
        submit(&mut s, &req, Utc::now()).unwrap();
        let seq = s.trigger(&req.trigger_key()).unwrap().unwrap().seq;
        assert_eq!(s.record_fire(seq, Some(Utc::now()), None).unwrap(), FireRecord::Exhausted);
        assert_eq!(s.trigger_state(&req.trigger_key()).unwrap(), TriggerState::Complete);
        assert!(s.due_triggers(Utc::now(), 10).unwrap().is_empty());

        assert!(s.complete_trigger(seq).unwrap());
        assert!(!s.job_exists(&req.job_key()).unwrap());
        assert_eq!(s.trigger_state(&req.trigger_key()).unwrap(), TriggerState::None);
    }

    #[test]
    fn fire_advances_trigger() {
        let mut s = store();
        let now = Utc::now();
        let req = JobRequest::new("j1", "X").with_interval(10, -1);
        submit(&mut s, &req, now).unwrap();
        let next = now + Duration::seconds(10);
        let seq = s.trigger(&req.trigger_key()).unwrap().unwrap().seq;
        assert_eq!(s.record_fire(seq, Some(now), Some(next)).unwrap(), FireRecord::Advanced);
        let t = s.trigger(&req.trigger_key()).unwrap().unwrap();
        assert_eq!(t.times_fired, 1);
        assert_eq!(t.next_fire.map(|d| d.timestamp_millis()), Some(next.timestamp_millis()));
    }

    #[test]
    fn bookkeeping_for_a_replaced_trigger_is_ignored() {
        let mut s = store();
        let now = Utc::now();
        let req = JobRequest::new("j1", "X");
        submit(&mut s, &req, now).unwrap();
        let old = s.trigger(&req.trigger_key()).unwrap().unwrap().seq;
        assert_eq!(s.record_fire(old, Some(now), None).unwrap(), FireRecord::Exhausted);

        // Rescheduled while the one-shot fire is still running.
        let cron = JobRequest::new("j1", "X").with_cron("0 0 * * * ?");
        let later = now + Duration::hours(1);
        assert!(s.replace_trigger(&req.trigger_key(), &build_trigger(&cron).unwrap(), later).unwrap());
        let new = s.trigger(&req.trigger_key()).unwrap().unwrap();
        assert_ne!(new.seq, old);

        assert_eq!(s.record_fire(old, Some(now), Some(now)).unwrap(), FireRecord::Gone);
        assert!(!s.complete_trigger(old).unwrap());
        let kept = s.trigger(&req.trigger_key()).unwrap().unwrap();
        assert_eq!(kept.state, TriggerState::Normal);
        assert_eq!(kept.next_fire.map(|t| t.timestamp_millis()), Some(later.timestamp_millis()));
        assert!(s.job_exists(&req.job_key()).unwrap());
    }

    #[test]
    fn errored_trigger_is_no_longer_due() {
        let mut s = store();
        let now = Utc::now();
        let req = JobRequest::new("j1", "X");
        submit(&mut s, &req, now).unwrap();
        let seq = s.trigger(&req.trigger_key()).unwrap().unwrap().seq;
        s.mark_error(seq).unwrap();
        assert_eq!(s.trigger_state(&req.trigger_key()).unwrap(), TriggerState::Error);
        assert!(s.due_triggers(now, 10).unwrap().is_empty());
    }

    #[test]
    fn interrupted_fires_are_recovered_or_dropped() {
        let mut s = store();
        let then = Utc::now() - Duration::minutes(5);
        let kept = JobRequest::new("kept", "X");
        submit(&mut s, &kept, then).unwrap();
        let mut lost = build_job_detail(&JobRequest::new("lost", "X"));
        lost.requests_recovery = false;
        let lost_trigger = build_trigger(&JobRequest::new("lost", "X")).unwrap();
        s.store_job_and_trigger(&lost, &lost_trigger, then).unwrap();
        // Both fires started, then the process died before they returned.
        for key in [kept.trigger_key(), lost_trigger.key.clone()] {
            let seq = s.trigger(&key).unwrap().unwrap().seq;
            s.record_fire(seq, Some(then), None).unwrap();
        }

        let now = Utc::now();
        let recovery = s.recover_interrupted(now).unwrap();
        assert_eq!(recovery, Recovery { rearmed: 1, dropped: 1 });

        let rearmed = s.trigger(&kept.trigger_key()).unwrap().unwrap();
        assert_eq!(rearmed.state, TriggerState::Normal);
        assert_eq!(rearmed.spec.misfire_policy, MisfirePolicy::FireNow);
        assert_eq!(s.due_triggers(now, 10).unwrap().len(), 1);
        assert!(!s.job_exists(&lost.key).unwrap());

        assert_eq!(s.recover_interrupted(now).unwrap(), Recovery::default());
    }

    #[test]
    fn replace_missing_trigger_reports_false() {
        let mut s = store();
        let req = JobRequest::new("j1", "X");
        let trigger = build_trigger(&req).unwrap();
        assert!(!s.replace_trigger(&req.trigger_key(), &trigger, Utc::now()).unwrap());
    }

    #[test]
    fn extra_trigger_requires_existing_job() {
        let mut s = store();
        let job = JobKey::new("ghost", "g1");
        let trigger = crate::trigger::manual_trigger(&job, JobData::new(), Utc::now());
        let err = s.store_trigger(&trigger, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "JOB_NOT_FOUND");
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cadence.db");
        let path = path.to_str().unwrap();
        let req = JobRequest::new("j1", "X").with_cron("0 0 * * * ?");
        {
            let mut s = TriggerStore::open(path, "SCHED_TEST_").unwrap();
            submit(&mut s, &req, Utc::now()).unwrap();
        }
        let s = TriggerStore::open(path, "SCHED_TEST_").unwrap();
        assert!(s.job_exists(&req.job_key()).unwrap());
        let other = TriggerStore::open(path, "SCHED_OTHER_").unwrap();
        assert!(!other.job_exists(&req.job_key()).unwrap());
    }
}
