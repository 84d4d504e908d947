use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn};
use tracing_futures::Instrument;

use crate::bot::BotCore;
use crate::utils::{AppError, Notifier};
use crate::utils::task::run_supervised;

/// Accepts classic five-field expressions as well as the seconds-first form.
pub fn parse_schedule(expr: &str) -> Result<Schedule, AppError> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|err| AppError::Scheduler(err.to_string()))
}

/// First fire strictly after `after`.
pub fn next_fire(schedule: &Schedule, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    schedule.after(after).next()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Post,
    Tally,
}

impl JobKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Post => "post announcements",
            Self::Tally => "tally responses",
        }
    }

    async fn run(self, bot: &BotCore) -> String {
        match self {
            Self::Post => bot.post_all().await.to_string(),
            Self::Tally => bot.tally().await.to_string(),
        }
    }
}

pub struct ScheduledJob {
    pub kind: JobKind,
    pub schedule: Schedule,
}

pub struct Scheduler {
    bot: Arc<BotCore>,
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new(bot: Arc<BotCore>) -> Result<Self> {
        let schedule = &bot.config().schedule;
        let jobs = vec![
            ScheduledJob {
                kind: JobKind::Post,
                schedule: parse_schedule(&schedule.post_cron)?,
            },
            ScheduledJob {
                kind: JobKind::Tally,
                schedule: parse_schedule(&schedule.tally_cron)?,
            },
        ];
        Ok(Self { bot, jobs })
    }

    pub fn start(self) -> Vec<JoinHandle<()>> {
        info!(
            "scheduler starting {} jobs in {}",
            self.jobs.len(),
            self.bot.timezone()
        );
        self.jobs
            .into_iter()
            .map(|job| {
                let bot = self.bot.clone();
                let span = info_span!("job", name = job.kind.name());
                tokio::spawn(run_job(bot, job).instrument(span))
            })
            .collect()
    }
}

async fn run_job(bot: Arc<BotCore>, job: ScheduledJob) {
    let notifier = bot.notifier();
    let kind = job.kind;
    let clock_bot = bot.clone();
    run_schedule(
        &job.schedule,
        kind.name(),
        &notifier,
        move || clock_bot.now(),
        move || {
            let bot = bot.clone();
            async move {
                let summary = kind.run(&bot).await;
                info!("{} finished: {}", kind.name(), summary);
                Ok(())
            }
        },
    )
    .await;
}

/// Fires `routine` at every schedule match after `now()`. Each run is
/// supervised, so a failing or panicking run never ends the loop.
async fn run_schedule<C, R, F>(
    schedule: &Schedule,
    name: &'static str,
    notifier: &Notifier,
    now: C,
    mut routine: R,
) where
    C: Fn() -> DateTime<Tz>,
    R: FnMut() -> F,
    F: Future<Output = Result<()>> + Send + 'static,
{
    let mut last = now();

    loop {
        let Some(next) = next_fire(schedule, &last) else {
            warn!("schedule has no upcoming fire time, job stops");
            return;
        };
        let wait = (next.with_timezone(&Utc) - now().with_timezone(&Utc))
            .to_std()
            .unwrap_or(Duration::ZERO);
        info!("next run at {}", next);
        tokio::time::sleep(wait).await;

        info!("running scheduled {}", name);
        run_supervised(name, notifier, routine()).await;

        // Anything that became due while the routine ran is dropped, not replayed.
        last = now().max(next);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike};
    use chrono_tz::Europe::Berlin;
    use parking_lot::Mutex;

    use super::*;
    use crate::chat::mock::MockChat;

    #[test]
    fn five_field_expressions_are_accepted() {
        assert!(parse_schedule("0 20 * * *").is_ok());
        assert!(parse_schedule("0 0 20 * * *").is_ok());
        assert!(parse_schedule("20 o'clock").is_err());
    }

    #[test]
    fn next_fire_is_same_evening_before_trigger() {
        let schedule = parse_schedule("0 20 * * *").unwrap();
        let now = Berlin.with_ymd_and_hms(2024, 6, 4, 19, 30, 0).unwrap();

        let next = next_fire(&schedule, &now).unwrap();

        assert_eq!(next, Berlin.with_ymd_and_hms(2024, 6, 4, 20, 0, 0).unwrap());
    }

    #[test]
    fn trigger_minute_fires_once_per_day() {
        let schedule = parse_schedule("0 20 * * *").unwrap();
        let fired = Berlin.with_ymd_and_hms(2024, 6, 4, 20, 0, 0).unwrap();

        let next = next_fire(&schedule, &fired).unwrap();

        assert_eq!(next, Berlin.with_ymd_and_hms(2024, 6, 5, 20, 0, 0).unwrap());
    }

    #[test]
    fn local_wall_clock_is_kept_across_dst_change() {
        let schedule = parse_schedule("0 19 * * *").unwrap();
        let before_switch = Berlin.with_ymd_and_hms(2024, 3, 30, 19, 0, 0).unwrap();

        let next = next_fire(&schedule, &before_switch).unwrap();

        assert_eq!(next.hour(), 19);
        assert_eq!(next.with_timezone(&Utc).hour(), 17);
    }

    /// Wall clock that follows tokio's paused time, starting at `start`.
    fn paused_clock(start: DateTime<Tz>) -> impl Fn() -> DateTime<Tz> {
        let origin = tokio::time::Instant::now();
        move || start + chrono::Duration::from_std(origin.elapsed()).unwrap()
    }

    fn quiet_notifier() -> Notifier {
        Notifier::new(Arc::new(MockChat::new()), None, None)
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_run_keeps_trigger_registered() {
        let schedule = parse_schedule("* * * * *").unwrap();
        let start = Berlin.with_ymd_and_hms(2024, 6, 4, 19, 59, 30).unwrap();
        let clock = paused_clock(start);
        let fired: Arc<Mutex<Vec<DateTime<Tz>>>> = Arc::default();

        let log = fired.clone();
        let task_clock = paused_clock(start);
        let job = tokio::spawn(async move {
            let notifier = quiet_notifier();
            run_schedule(&schedule, "minutely", &notifier, clock, move || {
                let stamp = task_clock();
                let first = {
                    let mut log = log.lock();
                    log.push(stamp);
                    log.len() == 1
                };
                async move {
                    if first {
                        panic!("first run blows up");
                    }
                    Ok(())
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        job.abort();

        let minutes: Vec<(u32, u32)> = fired
            .lock()
            .iter()
            .map(|at| (at.hour(), at.minute()))
            .collect();
        assert_eq!(minutes, vec![(20, 0), (20, 1), (20, 2), (20, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_routine_skips_missed_minutes() {
        let schedule = parse_schedule("* * * * *").unwrap();
        let start = Berlin.with_ymd_and_hms(2024, 6, 4, 19, 59, 30).unwrap();
        let clock = paused_clock(start);
        let fired: Arc<Mutex<Vec<DateTime<Tz>>>> = Arc::default();

        let log = fired.clone();
        let task_clock = paused_clock(start);
        let job = tokio::spawn(async move {
            let notifier = quiet_notifier();
            run_schedule(&schedule, "slow", &notifier, clock, move || {
                log.lock().push(task_clock());
                async move {
                    tokio::time::sleep(Duration::from_secs(150)).await;
                    Ok(())
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        job.abort();

        let minutes: Vec<(u32, u32)> = fired
            .lock()
            .iter()
            .map(|at| (at.hour(), at.minute()))
            .collect();
        assert_eq!(minutes, vec![(20, 0), (20, 3)]);
    }

    #[test]
    fn job_names_are_distinct() {
        assert_ne!(JobKind::Post.name(), JobKind::Tally.name());
    }
}
