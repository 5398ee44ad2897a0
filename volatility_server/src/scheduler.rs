use anyhow::{Result, bail};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use data_ingestion::config::now_in;
use log::{error, info};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::{UpdateJob, UpdateStatus};

/// Wall-clock time of day, in a fixed offset, at which the daily update fires.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    at: NaiveTime,
    offset: FixedOffset,
}

impl Schedule {
    pub fn new(hour: u32, minute: u32, offset: FixedOffset) -> Result<Self> {
        let Some(at) = NaiveTime::from_hms_opt(hour, minute, 0) else {
            bail!("invalid schedule time {:02}:{:02}", hour, minute);
        };
        Ok(Self { at, offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        now_in(self.offset)
    }

    /// First firing strictly after `now`.
    pub fn next_run(&self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let local = now.with_timezone(&self.offset);
        let today = local.date_naive();

        let candidate = self.at_on(today);
        if candidate > local {
            return candidate;
        }
        let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
        self.at_on(tomorrow)
    }

    fn at_on(&self, date: NaiveDate) -> DateTime<FixedOffset> {
        let local = date.and_time(self.at);
        // fixed offsets have no gaps or folds
        self.offset
            .from_local_datetime(&local)
            .single()
            .unwrap_or_else(|| self.offset.from_utc_datetime(&(local - self.offset)))
    }
}

/// Run `job` once per day at `schedule`, forever. Failures are logged and the
/// loop keeps going; `status` is only replaced on success.
pub async fn run_daily(
    job: Arc<UpdateJob>,
    status: Arc<RwLock<Option<UpdateStatus>>>,
    schedule: Schedule,
) {
    loop {
        let now = schedule.now();
        let next = schedule.next_run(now);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!("Next daily update at {} (in {}s)", next, wait.as_secs());
        tokio::time::sleep(wait).await;

        run_once(&job, &status, schedule.now()).await;
    }
}

/// One update on the blocking pool; records the status when it succeeds.
pub async fn run_once(
    job: &Arc<UpdateJob>,
    status: &Arc<RwLock<Option<UpdateStatus>>>,
    now: DateTime<FixedOffset>,
) -> bool {
    let task_job = Arc::clone(job);
    match tokio::task::spawn_blocking(move || task_job.run(now)).await {
        Ok(Ok(update)) => {
            *status.write() = Some(update);
            info!("Job completed: daily_update_job");
            true
        }
        Ok(Err(e)) => {
            error!("Job failed: daily_update_job: {}", e);
            false
        }
        Err(e) => {
            error!("Job failed: daily_update_job panicked: {}", e);
            false
        }
    }
}
