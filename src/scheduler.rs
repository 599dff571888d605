use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A zero-argument callback a scheduler invokes on each tick
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub trait Scheduler {
    /// Register `job` to run on the cron `expression`
    fn schedule(&mut self, expression: &str, job: Job) -> Result<()>;

    /// Begin running registered jobs. Jobs registered later start immediately.
    fn start(&mut self);
}

/// Day names indexed by standard cron day-of-week numbers (0 and 7 are Sunday)
const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Parse a cron expression.
///
/// Five-field expressions follow standard crontab numbering: a `0` seconds
/// field is prepended and day-of-week numbers (0-7, Sunday is 0 or 7) are
/// rewritten as day names. Six and seven field expressions are passed through
/// unchanged, with the `cron` crate's own numbering (1-7, Sunday is 1).
pub fn parse_schedule(expression: &str) -> Result<cron::Schedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.as_slice() {
        [minute, hour, day, month, weekday] => format!(
            "0 {} {} {} {} {}",
            minute,
            hour,
            day,
            month,
            crontab_weekdays(weekday)
        ),
        _ => expression.trim().to_string(),
    };
    cron::Schedule::from_str(&normalized)
        .with_context(|| format!("Invalid cron expression '{}'", expression))
}

/// Rewrite a crontab day-of-week field with day names. Step values are left
/// alone; anything that is not a known day number is left for the parser.
fn crontab_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (base, step) = match item.split_once('/') {
                Some((base, step)) => (base, Some(step)),
                None => (item, None),
            };
            let base = match base.split_once('-') {
                // A range ending on Sunday as 7 cannot wrap to SUN
                Some((start, "7")) if start != "7" && step.is_none() => {
                    format!("{}-SAT,SUN", weekday_name(start))
                }
                Some((start, "7")) if start != "7" => format!("{}-SAT", weekday_name(start)),
                Some((start, end)) => format!("{}-{}", weekday_name(start), weekday_name(end)),
                None => weekday_name(base).to_string(),
            };
            match step {
                Some(step) => format!("{base}/{step}"),
                None => base,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn weekday_name(value: &str) -> &str {
    value
        .parse::<usize>()
        .ok()
        .and_then(|day| WEEKDAYS.get(day).copied())
        .unwrap_or(value)
}

/// Runs each job on its own tokio task, sleeping until the next UTC tick
pub struct CronScheduler {
    pending: Vec<(String, cron::Schedule, Job)>,
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
    started: bool,
}

impl CronScheduler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            pending: Vec::new(),
            handles: Vec::new(),
            shutdown,
            started: false,
        }
    }

    fn spawn(&mut self, expression: String, schedule: cron::Schedule, job: Job) {
        let shutdown = self.shutdown.clone();
        self.handles.push(tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    info!("Schedule '{}' has no further runs", expression);
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                debug!("Next run of '{}' at {}", expression, next);

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                job().await;
            }
        }));
    }

    /// Stop all jobs and wait for any run in progress to finish
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl Scheduler for CronScheduler {
    fn schedule(&mut self, expression: &str, job: Job) -> Result<()> {
        let schedule = parse_schedule(expression)?;
        if self.started {
            self.spawn(expression.to_string(), schedule, job);
        } else {
            self.pending.push((expression.to_string(), schedule, job));
        }
        Ok(())
    }

    fn start(&mut self) {
        self.started = true;
        for (expression, schedule, job) in std::mem::take(&mut self.pending) {
            self.spawn(expression, schedule, job);
        }
    }
}
