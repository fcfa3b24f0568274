use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use super::error::BotError;
use super::status::{BotStatus, StatusUpdate};

pub type ScheduledAction =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// When the recurring poll fires.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    DailyAt { hour: u32, minute: u32, timezone: Tz },
    Every(Duration),
}

impl TriggerSpec {
    pub fn daily(hour: u32, minute: u32, timezone: &str) -> Result<Self, BotError> {
        if hour > 23 || minute > 59 {
            return Err(BotError::Config(format!(
                "invalid daily time {:02}:{:02}",
                hour, minute
            )));
        }
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| BotError::Config(format!("unknown timezone '{}'", timezone)))?;
        Ok(TriggerSpec::DailyAt {
            hour,
            minute,
            timezone,
        })
    }

    pub fn every(interval: Duration) -> Result<Self, BotError> {
        if interval.is_zero() {
            return Err(BotError::Config("schedule interval must be positive".to_string()));
        }
        Ok(TriggerSpec::Every(interval))
    }

    /// Next fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TriggerSpec::DailyAt {
                hour,
                minute,
                timezone,
            } => next_daily_occurrence(now, *hour, *minute, *timezone),
            TriggerSpec::Every(interval) => {
                now + ChronoDuration::from_std(*interval).unwrap_or(ChronoDuration::days(1))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TriggerSpec::DailyAt {
                hour,
                minute,
                timezone,
            } => format!("daily at {:02}:{:02} ({})", hour, minute, timezone.name()),
            TriggerSpec::Every(interval) => format!("every {}s", interval.as_secs()),
        }
    }
}

/// Next `hour:minute` wall-clock time in `timezone` after `now`. Today's slot
/// if it is still ahead, otherwise tomorrow's. Days where the slot falls into
/// a DST gap are skipped.
pub fn next_daily_occurrence(
    now: DateTime<Utc>,
    hour: u32,
    minute: u32,
    timezone: Tz,
) -> DateTime<Utc> {
    let mut date: NaiveDate = now.with_timezone(&timezone).date_naive();
    for _ in 0..4 {
        if let Some(slot) = date
            .and_hms_opt(hour, minute, 0)
            .and_then(|naive| timezone.from_local_datetime(&naive).earliest())
        {
            let slot = slot.with_timezone(&Utc);
            if slot > now {
                return slot;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    now + ChronoDuration::days(1)
}

/// Fires the poll action on its trigger. Holds at most one active entry:
/// scheduling again replaces the previous job.
pub struct PollScheduler {
    scheduler: JobScheduler,
    status: Arc<BotStatus>,
    active: Mutex<Option<Uuid>>,
}

impl PollScheduler {
    pub fn new(scheduler: JobScheduler, status: Arc<BotStatus>) -> Self {
        Self {
            scheduler,
            status,
            active: Mutex::new(None),
        }
    }

    pub async fn schedule_daily(
        &self,
        hour: u32,
        minute: u32,
        timezone: &str,
        action: ScheduledAction,
    ) -> Result<DateTime<Utc>, BotError> {
        self.schedule(TriggerSpec::daily(hour, minute, timezone)?, action)
            .await
    }

    /// Register `action` under `trigger`, replacing any earlier entry.
    /// Returns the first upcoming fire time. Occurrences missed while the
    /// process was down are not replayed.
    pub async fn schedule(
        &self,
        trigger: TriggerSpec,
        action: ScheduledAction,
    ) -> Result<DateTime<Utc>, BotError> {
        let job = build_job(&trigger, action, self.status.clone())?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take()
            && let Err(e) = self.scheduler.remove(&previous).await
        {
            warn!("Failed to remove previous poll schedule {}: {}", previous, e);
        }
        let job_id = self.scheduler.add(job).await?;
        *active = Some(job_id);
        drop(active);

        let next = trigger.next_after(Utc::now());
        info!(
            "Poll scheduled {} (next: {})",
            trigger.describe(),
            next.to_rfc3339()
        );
        self.status.apply(StatusUpdate::ScheduleRegistered {
            trigger,
            next_poll_at: next,
        });
        Ok(next)
    }

    pub async fn active_job(&self) -> Option<Uuid> {
        *self.active.lock().await
    }
}

fn build_job(
    trigger: &TriggerSpec,
    action: ScheduledAction,
    status: Arc<BotStatus>,
) -> Result<Job, BotError> {
    let run = move |_uuid: Uuid, _l: JobScheduler| {
        let action = action.clone();
        let status = status.clone();
        Box::pin(async move {
            info!("Scheduled poll triggered");
            action().await;
            status.apply(StatusUpdate::ScheduleTick { at: Utc::now() });
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    };

    let job = match trigger {
        TriggerSpec::DailyAt {
            hour,
            minute,
            timezone,
        } => {
            let cron = format!("0 {} {} * * *", minute, hour);
            Job::new_async_tz(cron.as_str(), *timezone, run)?
        }
        TriggerSpec::Every(interval) => Job::new_repeated_async(*interval, run)?,
    };
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Asia::Kolkata;

    fn kolkata(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn past_slot_rolls_over_to_tomorrow() {
        let now = kolkata(2025, 3, 14, 10, 5);
        let next = next_daily_occurrence(now, 10, 0, Kolkata);
        assert_eq!(next, kolkata(2025, 3, 15, 10, 0));
    }

    #[test]
    fn upcoming_slot_is_today() {
        let now = kolkata(2025, 3, 14, 9, 59);
        let next = next_daily_occurrence(now, 10, 0, Kolkata);
        assert_eq!(next, kolkata(2025, 3, 14, 10, 0));
    }

    #[test]
    fn exact_slot_time_counts_as_past() {
        let now = kolkata(2025, 3, 14, 10, 0);
        assert_eq!(
            next_daily_occurrence(now, 10, 0, Kolkata),
            kolkata(2025, 3, 15, 10, 0)
        );
    }

    #[test]
    fn uses_target_timezone_not_utc_date() {
        // 20:00 UTC on the 14th is already 01:30 on the 15th in Kolkata.
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 20, 0, 0).unwrap();
        let next = next_daily_occurrence(now, 10, 0, Kolkata);
        assert_eq!(next, kolkata(2025, 3, 15, 10, 0));
    }

    #[test]
    fn dst_gap_day_is_skipped() {
        let ny: Tz = "America/New_York".parse().unwrap();
        // 02:30 does not exist on 2025-03-09 in New York.
        let now = ny
            .with_ymd_and_hms(2025, 3, 9, 0, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let next = next_daily_occurrence(now, 2, 30, ny);
        let expected = ny
            .with_ymd_and_hms(2025, 3, 10, 2, 30, 0)
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(next, expected);
    }

    #[test]
    fn daily_rejects_bad_input() {
        assert!(TriggerSpec::daily(24, 0, "Asia/Kolkata").is_err());
        assert!(TriggerSpec::daily(10, 60, "Asia/Kolkata").is_err());
        assert!(TriggerSpec::daily(10, 0, "Mars/Olympus").is_err());
        assert!(TriggerSpec::every(Duration::ZERO).is_err());
    }

    #[test]
    fn interval_next_is_relative_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let trigger = TriggerSpec::every(Duration::from_secs(60)).unwrap();
        assert_eq!(trigger.next_after(now), now + ChronoDuration::seconds(60));
        assert_eq!(trigger.describe(), "every 60s");
    }

    #[test]
    fn describe_daily_names_timezone() {
        let trigger = TriggerSpec::daily(10, 0, "Asia/Kolkata").unwrap();
        assert_eq!(trigger.describe(), "daily at 10:00 (Asia/Kolkata)");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rescheduling_replaces_previous_entry() {
        let status = Arc::new(BotStatus::new(crate::core::broadcaster::DEFAULT_LOG_CAPACITY));
        let scheduler = PollScheduler::new(JobScheduler::new().await.unwrap(), status.clone());
        let noop: ScheduledAction = Arc::new(|| Box::pin(async {}));

        scheduler
            .schedule_daily(10, 0, "Asia/Kolkata", noop.clone())
            .await
            .unwrap();
        let first = scheduler.active_job().await.unwrap();
        let next = scheduler
            .schedule_daily(11, 30, "Asia/Kolkata", noop)
            .await
            .unwrap();
        let second = scheduler.active_job().await.unwrap();

        assert_ne!(first, second);
        assert_eq!(status.snapshot().next_poll_at, Some(next));
        assert_eq!(
            status.snapshot().schedule.as_deref(),
            Some("daily at 11:30 (Asia/Kolkata)")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn interval_job_fires_on_a_running_scheduler() {
        let status = Arc::new(BotStatus::new(crate::core::broadcaster::DEFAULT_LOG_CAPACITY));
        let mut sched = JobScheduler::new().await.unwrap();
        sched.start().await.unwrap();
        let scheduler = PollScheduler::new(sched.clone(), status);

        let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fired.clone();
        let action: ScheduledAction = Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
        });
        scheduler
            .schedule(TriggerSpec::every(Duration::from_secs(1)).unwrap(), action)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let count = fired.load(std::sync::atomic::Ordering::SeqCst);
        sched.shutdown().await.unwrap();
        assert!((1..=3).contains(&count), "fired {} times", count);
    }
}
