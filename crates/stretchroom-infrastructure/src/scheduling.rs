//! In-process job scheduling.
//!
//! Jobs run on a fixed interval or a cron expression (seconds optional).
//! Each job gets its own task. A tick that arrives while the previous run is
//! still going is skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use croner::Cron;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::host::HostedService;
use crate::metrics::record_job_run;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("a job with identity '{0}' is already scheduled")]
    DuplicateIdentity(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("job '{0}' needs a non-zero interval")]
    InvalidInterval(String),

    #[error("the scheduler is already running")]
    AlreadyStarted,
}

/// Passed to every run of a job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub identity: String,
    pub fire_time: DateTime<Utc>,
    /// 1-based run counter.
    pub run: u64,
    /// Cancelled when the scheduler shuts down without waiting for jobs.
    pub cancellation: CancellationToken,
}

/// A unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, context: &JobContext) -> anyhow::Result<()>;
}

#[derive(Clone)]
enum Trigger {
    Interval(Duration),
    Cron(Arc<Cron>),
}

impl Trigger {
    /// Time to sleep until the next fire, or `None` when the schedule is exhausted.
    fn next_delay(&self) -> Option<Duration> {
        match self {
            Trigger::Interval(interval) => Some(*interval),
            Trigger::Cron(cron) => {
                let now = Utc::now();
                let next = cron.find_next_occurrence(&now, false).ok()?;
                (next - now).to_std().ok()
            }
        }
    }
}

#[derive(Clone)]
struct ScheduledJob {
    identity: String,
    job: Arc<dyn Job>,
    trigger: Trigger,
    delay: Duration,
}

struct Running {
    stop: CancellationToken,
    abort: CancellationToken,
    loops: Vec<JoinHandle<Option<JoinHandle<()>>>>,
}

/// Owns the scheduled jobs and their tasks.
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    wait_for_jobs_to_complete: bool,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("jobs", &self.identities())
            .field("wait_for_jobs_to_complete", &self.wait_for_jobs_to_complete)
            .finish()
    }
}

impl Scheduler {
    /// `wait_for_jobs_to_complete` is used when stopped as a hosted service.
    pub fn new(wait_for_jobs_to_complete: bool) -> Self {
        Self {
            jobs: Vec::new(),
            wait_for_jobs_to_complete,
            running: Mutex::new(None),
        }
    }

    pub fn identities(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.identity.as_str()).collect()
    }

    fn push(&mut self, job: ScheduledJob) -> Result<&mut Self, SchedulerError> {
        if self.jobs.iter().any(|j| j.identity == job.identity) {
            return Err(SchedulerError::DuplicateIdentity(job.identity));
        }
        self.jobs.push(job);
        Ok(self)
    }

    /// Run `job` every `interval`, first after `delay`.
    pub fn schedule_interval(
        &mut self,
        identity: impl Into<String>,
        job: impl Job + 'static,
        interval: Duration,
        delay: Duration,
    ) -> Result<&mut Self, SchedulerError> {
        let identity = identity.into();
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(identity));
        }
        self.push(ScheduledJob {
            identity,
            job: Arc::new(job),
            trigger: Trigger::Interval(interval),
            delay,
        })
    }

    /// Run `job` on a cron schedule, ignoring fires before `delay` has passed.
    pub fn schedule_cron(
        &mut self,
        identity: impl Into<String>,
        job: impl Job + 'static,
        expression: &str,
        delay: Duration,
    ) -> Result<&mut Self, SchedulerError> {
        let cron = Cron::new(expression)
            .with_seconds_optional()
            .parse()
            .map_err(|e| SchedulerError::InvalidCron {
                expression: expression.to_string(),
                reason: e.to_string(),
            })?;
        self.push(ScheduledJob {
            identity: identity.into(),
            job: Arc::new(job),
            trigger: Trigger::Cron(Arc::new(cron)),
            delay,
        })
    }

    /// Spawn one task per job.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        let stop = CancellationToken::new();
        let abort = CancellationToken::new();
        let loops = self
            .jobs
            .iter()
            .cloned()
            .map(|job| tokio::spawn(run_loop(job, stop.clone(), abort.clone())))
            .collect();

        tracing::info!(jobs = self.jobs.len(), "scheduler started");
        *running = Some(Running { stop, abort, loops });
        Ok(())
    }

    /// Stop scheduling. In-flight runs are awaited or cancelled.
    pub async fn shutdown(&self, wait_for_jobs_to_complete: bool) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        running.stop.cancel();
        if !wait_for_jobs_to_complete {
            running.abort.cancel();
        }

        for handle in running.loops {
            let in_flight = match handle.await {
                Ok(in_flight) => in_flight,
                Err(e) => {
                    tracing::warn!(error = %e, "job loop ended abnormally");
                    None
                }
            };
            let Some(in_flight) = in_flight else { continue };
            if wait_for_jobs_to_complete {
                if let Err(e) = in_flight.await {
                    tracing::warn!(error = %e, "job run ended abnormally");
                }
            } else {
                in_flight.abort();
            }
        }
        tracing::info!(wait_for_jobs_to_complete, "scheduler stopped");
    }
}

async fn run_loop(
    scheduled: ScheduledJob,
    stop: CancellationToken,
    abort: CancellationToken,
) -> Option<JoinHandle<()>> {
    let identity = scheduled.identity.clone();
    let mut in_flight: Option<JoinHandle<()>> = None;
    let mut run = 0u64;

    tokio::select! {
        _ = stop.cancelled() => return None,
        _ = tokio::time::sleep(scheduled.delay) => {}
    }

    let mut ticker = match scheduled.trigger {
        Trigger::Interval(interval) => {
            let mut ticker = tokio::time::interval_at(Instant::now(), interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(ticker)
        }
        Trigger::Cron(_) => None,
    };

    loop {
        let wait = async {
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                    true
                }
                None => match scheduled.trigger.next_delay() {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        true
                    }
                    None => false,
                },
            }
        };

        let fired = tokio::select! {
            _ = stop.cancelled() => break,
            fired = wait => fired,
        };
        if !fired {
            tracing::info!(job = %identity, "schedule exhausted");
            break;
        }

        if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!(job = %identity, "previous run still in progress, skipping");
            record_job_run(&identity, "skipped");
            continue;
        }

        run += 1;
        let context = JobContext {
            identity: identity.clone(),
            fire_time: Utc::now(),
            run,
            cancellation: abort.child_token(),
        };
        let job = scheduled.job.clone();
        in_flight = Some(tokio::spawn(async move {
            match job.execute(&context).await {
                Ok(()) => record_job_run(&context.identity, "ok"),
                Err(e) => {
                    tracing::error!(job = %context.identity, run = context.run, error = %e, "job failed");
                    record_job_run(&context.identity, "error");
                }
            }
        }));
    }

    in_flight.filter(|h| !h.is_finished())
}

#[async_trait]
impl HostedService for Scheduler {
    fn name(&self) -> &str {
        "scheduler"
    }

    async fn start(&self) -> anyhow::Result<()> {
        Scheduler::start(self).await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown(self.wait_for_jobs_to_complete).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Counting {
        runs: Arc<AtomicUsize>,
        hold: Duration,
    }

    #[async_trait]
    impl Job for Counting {
        async fn execute(&self, _context: &JobContext) -> anyhow::Result<()> {
            tokio::time::sleep(self.hold).await;
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let mut scheduler = Scheduler::new(true);
        scheduler
            .schedule_interval("job", Counting::default(), Duration::from_secs(1), Duration::ZERO)
            .unwrap();
        let err = scheduler
            .schedule_cron("job", Counting::default(), "* * * * *", Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateIdentity(id) if id == "job"));
    }

    #[test]
    fn test_bad_cron_and_zero_interval_rejected() {
        let mut scheduler = Scheduler::new(true);
        assert!(matches!(
            scheduler.schedule_cron("cron", Counting::default(), "not a cron", Duration::ZERO),
            Err(SchedulerError::InvalidCron { .. })
        ));
        assert!(matches!(
            scheduler.schedule_interval("zero", Counting::default(), Duration::ZERO, Duration::ZERO),
            Err(SchedulerError::InvalidInterval(_))
        ));
        assert!(scheduler
            .schedule_cron("seconds", Counting::default(), "*/5 * * * * *", Duration::ZERO)
            .is_ok());
        assert_eq!(scheduler.identities(), vec!["seconds"]);
    }

    #[tokio::test]
    async fn test_interval_job_runs_repeatedly() {
        let job = Counting::default();
        let runs = job.runs.clone();
        let mut scheduler = Scheduler::new(true);
        scheduler
            .schedule_interval("fast", job, Duration::from_millis(20), Duration::ZERO)
            .unwrap();

        scheduler.start().await.unwrap();
        assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyStarted)));
        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.shutdown(true).await;

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected several runs, got {seen}");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_overlapping_runs_are_skipped() {
        let job = Counting {
            runs: Arc::default(),
            hold: Duration::from_millis(100),
        };
        let runs = job.runs.clone();
        let mut scheduler = Scheduler::new(true);
        scheduler
            .schedule_interval("slow", job, Duration::from_millis(10), Duration::ZERO)
            .unwrap();

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.shutdown(true).await;

        // ~15 ticks, but at most two runs fit in the window.
        assert!(runs.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_shutdown_without_wait_aborts_run() {
        let job = Counting {
            runs: Arc::default(),
            hold: Duration::from_secs(10),
        };
        let runs = job.runs.clone();
        let mut scheduler = Scheduler::new(false);
        scheduler
            .schedule_interval("stuck", job, Duration::from_secs(60), Duration::ZERO)
            .unwrap();

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        tokio::time::timeout(Duration::from_secs(1), HostedService::stop(&scheduler))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delay_postpones_first_run() {
        let job = Counting::default();
        let runs = job.runs.clone();
        let mut scheduler = Scheduler::new(true);
        scheduler
            .schedule_interval("later", job, Duration::from_millis(10), Duration::from_secs(5))
            .unwrap();

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown(true).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
