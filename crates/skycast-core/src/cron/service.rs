use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cron::types::{DailySchedule, FireDecision};

/// Work triggered by the scheduler.
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self);
}

struct ScheduledJob {
    schedule: DailySchedule,
    job: Arc<dyn Job>,
}

/// In-process scheduler for daily jobs, keyed by id.
///
/// Each job gets its own timer task that sleeps until the next occurrence,
/// spawns the job and re-arms. Nothing is persisted; a restart recomputes
/// the next occurrence from the current time.
#[derive(Default)]
pub struct CronService {
    jobs: HashMap<String, ScheduledJob>,
    timers: HashMap<String, JoinHandle<()>>,
    started: bool,
}

impl CronService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job` under `id`, replacing any job with the same id.
    pub fn schedule_daily(&mut self, id: &str, schedule: DailySchedule, job: Arc<dyn Job>) {
        let replaced = self
            .jobs
            .insert(id.to_string(), ScheduledJob { schedule, job })
            .is_some();
        if replaced {
            info!("Replaced cron job '{id}'");
        } else {
            info!("Added cron job '{id}'");
        }
        if self.started {
            self.arm_timer(id);
        }
    }

    pub fn remove_job(&mut self, id: &str) -> bool {
        if let Some(handle) = self.timers.remove(id) {
            handle.abort();
        }
        let removed = self.jobs.remove(id).is_some();
        if removed {
            info!("Removed cron job {id}");
        }
        removed
    }

    pub fn job_ids(&self) -> Vec<&str> {
        self.jobs.keys().map(String::as_str).collect()
    }

    /// Next occurrence of job `id` after now.
    pub fn next_run(&self, id: &str) -> Option<DateTime<Utc>> {
        self.jobs
            .get(id)
            .and_then(|j| j.schedule.next_fire_after(Utc::now()).ok())
    }

    pub fn start(&mut self) {
        self.started = true;
        let ids: Vec<String> = self.jobs.keys().cloned().collect();
        for id in &ids {
            self.arm_timer(id);
        }
        info!("Cron service started with {} jobs", self.jobs.len());
    }

    pub fn stop(&mut self) {
        self.started = false;
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
        info!("Cron service stopped");
    }

    pub fn is_running(&self) -> bool {
        self.started && self.timers.values().any(|h| !h.is_finished())
    }

    fn arm_timer(&mut self, id: &str) {
        if let Some(handle) = self.timers.remove(id) {
            handle.abort();
        }
        let Some(entry) = self.jobs.get(id) else {
            return;
        };

        let id_owned = id.to_string();
        let schedule = entry.schedule.clone();
        let job = entry.job.clone();

        let handle = tokio::spawn(async move {
            let mut cursor = Utc::now();
            loop {
                let next = match schedule.next_fire_after(cursor) {
                    Ok(next) => next,
                    Err(e) => {
                        error!("Cron job '{id_owned}' cannot be scheduled: {e}");
                        break;
                    }
                };
                info!("Cron job '{id_owned}' next run at {next}");

                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                cursor = on_wake(&id_owned, &schedule, &job, next, Utc::now()).1;
            }
        });
        self.timers.insert(id.to_string(), handle);
    }
}

/// Handle one timer wake-up for the occurrence at `next`, observed at `now`.
///
/// Spawns the job when the wake-up is within the misfire grace window and
/// returns its handle, plus the cursor from which the following occurrence
/// is searched. The cursor is never earlier than `next`, so an occurrence
/// fires at most once, and a skipped one is dropped rather than queued.
fn on_wake(
    id: &str,
    schedule: &DailySchedule,
    job: &Arc<dyn Job>,
    next: DateTime<Utc>,
    now: DateTime<Utc>,
) -> (Option<JoinHandle<()>>, DateTime<Utc>) {
    let spawned = match schedule.fire_decision(next, now) {
        FireDecision::Fire => {
            info!("Executing cron job '{id}'");
            let job = job.clone();
            Some(tokio::spawn(async move { job.run().await }))
        }
        FireDecision::Skip { late_by } => {
            warn!(
                "Cron job '{id}' missed its {next} run by {}s; skipping",
                late_by.as_secs()
            );
            None
        }
    };
    (spawned, next.max(now))
}

impl Drop for CronService {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}
