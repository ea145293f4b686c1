//! Daily local-time triggers
//!
//! Each job fires once a day at a fixed hour in the configured timezone.
//! A run is bounded by a wall-clock timeout; a failed or timed-out run is
//! started again from scratch up to `retry_count` more times. There is no
//! resume marker: reruns depend on the per-day upsert being idempotent.

use crate::AdvisoryError;
use crate::config::ScheduleConfig;
use crate::services::Services;
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

/// Next occurrence of `hour:00` local time strictly after `now`.
pub fn next_run_after(now: DateTime<Tz>, hour: u32) -> Result<DateTime<Tz>, AdvisoryError> {
    let at = NaiveTime::from_hms_opt(hour, 0, 0)
        .ok_or_else(|| AdvisoryError::config(format!("invalid schedule hour {hour}")))?;
    let tz = now.timezone();

    let mut day = now.date_naive();
    // Three candidate days are enough even when a local hour is skipped.
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&day.and_time(at)).earliest() {
            if candidate > now {
                return Ok(candidate);
            }
        }
        day = day
            .checked_add_days(Days::new(1))
            .ok_or_else(|| AdvisoryError::general("calendar overflow"))?;
    }
    Err(AdvisoryError::general(format!(
        "no valid local time for {hour}:00 near {now}"
    )))
}

/// Run `job` with a timeout, retrying the whole run on failure.
/// Returns whether one of the attempts succeeded.
pub async fn run_with_retries<F, Fut>(
    name: &str,
    run_timeout: Duration,
    retry_count: u32,
    job: F,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), AdvisoryError>>,
{
    for attempt in 0..=retry_count {
        match timeout(run_timeout, job()).await {
            Ok(Ok(())) => {
                info!(job = name, attempt = attempt + 1, "Scheduled run succeeded");
                return true;
            }
            Ok(Err(err)) => {
                warn!(job = name, attempt = attempt + 1, error = %err, "Scheduled run failed");
            }
            Err(_) => {
                warn!(
                    job = name,
                    attempt = attempt + 1,
                    timeout_s = run_timeout.as_secs(),
                    "Scheduled run timed out"
                );
            }
        }
    }
    error!(job = name, attempts = retry_count + 1, "Scheduled run gave up");
    false
}

async fn daily<F, Fut>(name: &'static str, tz: Tz, hour: u32, config: ScheduleConfig, job: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<(), AdvisoryError>>,
{
    loop {
        let now = Utc::now().with_timezone(&tz);
        let next = match next_run_after(now, hour) {
            Ok(next) => next,
            Err(err) => {
                error!(job = name, error = %err, "Cannot compute next run, stopping job");
                return;
            }
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!(job = name, next = %next, "Next scheduled run");
        sleep(wait).await;

        run_with_retries(
            name,
            Duration::from_secs(config.run_timeout_seconds),
            config.retry_count,
            &job,
        )
        .await;
    }
}

/// Start the generation and notification jobs.
pub fn spawn_daily_jobs(services: Arc<Services>) -> Result<Vec<JoinHandle<()>>, AdvisoryError> {
    let schedule = services.config.schedule.clone();
    let tz = schedule.tz()?;

    let generation = {
        let services = services.clone();
        let schedule = schedule.clone();
        tokio::spawn(daily("generate", tz, schedule.generate_hour, schedule, move || {
            let services = services.clone();
            async move {
                let regions = services.catalog.all().to_vec();
                services.orchestrator.run(&regions).await.map(|_| ())
            }
        }))
    };

    let notification = {
        let services = services.clone();
        tokio::spawn(daily("notify", tz, schedule.notify_hour, schedule, move || {
            let services = services.clone();
            async move { services.dispatcher.dispatch_all().await.map(|_| ()) }
        }))
    };

    Ok(vec![generation, notification])
}
