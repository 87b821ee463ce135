//! Periodic record sweep using tokio-cron-scheduler.

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use cherut_core::RateLimitService;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Enable scheduler.
    pub enabled: bool,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: std::env::var("SCHEDULER_ENABLED")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }
}

/// Runs `prune_expired` over every configured action on a cron schedule.
pub struct PruneScheduler {
    inner: JobScheduler,
    running: bool,
}

impl PruneScheduler {
    /// Register the sweep and start ticking, unless disabled.
    ///
    /// `schedule` is a six-field cron expression, seconds first.
    pub async fn start(
        config: SchedulerConfig,
        schedule: &str,
        service: RateLimitService,
    ) -> Result<Self, JobSchedulerError> {
        let inner = JobScheduler::new().await?;

        if !config.enabled {
            tracing::info!("Scheduler disabled, records are swept on startup only");
            return Ok(Self {
                inner,
                running: false,
            });
        }

        let job = Job::new_async(schedule, move |job_id, _lock| {
            let service = service.clone();
            Box::pin(async move {
                let report = service.prune_expired().await;
                tracing::debug!(job_id = %job_id, removed = report.removed, "Scheduled sweep finished");
            })
        })?;

        let id = inner.add(job).await?;
        inner.start().await?;
        tracing::info!(schedule = %schedule, job_id = %id, "Record sweep scheduled");

        Ok(Self {
            inner,
            running: true,
        })
    }

    /// Stop the scheduler.
    pub async fn shutdown(&mut self) -> Result<(), JobSchedulerError> {
        if !self.running {
            return Ok(());
        }

        self.inner.shutdown().await?;
        self.running = false;
        tracing::info!("Scheduler stopped");
        Ok(())
    }
}
