//! Scheduled jobs.

use std::time::Duration;

use async_trait::async_trait;
use stretchroom_infrastructure::scheduling::SchedulerError;
use stretchroom_infrastructure::{Job, JobContext, Scheduler};

pub const LOG_SOME_JOB: &str = "log-some-job";

/// Logs a heartbeat line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSomeJob;

#[async_trait]
impl Job for LogSomeJob {
    async fn execute(&self, context: &JobContext) -> anyhow::Result<()> {
        tracing::info!(job = %context.identity, run = context.run, "LogSomeJob");
        Ok(())
    }
}

/// Scheduler running [`LogSomeJob`] every second.
pub fn scheduler() -> Result<Scheduler, SchedulerError> {
    let mut scheduler = Scheduler::new(true);
    scheduler.schedule_interval(LOG_SOME_JOB, LogSomeJob, Duration::from_secs(1), Duration::ZERO)?;
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_has_log_job() {
        let scheduler = scheduler().unwrap();
        assert_eq!(scheduler.identities(), vec![LOG_SOME_JOB]);
    }

    #[tokio::test]
    async fn test_scheduler_starts_and_stops() {
        let scheduler = scheduler().unwrap();
        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown(true).await;
    }
}
