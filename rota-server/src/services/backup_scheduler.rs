use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::models::backup::BackupOptions;
use crate::state::AppState;

/// Calendar-driven backup work. Cron fields: sec min hour day-of-month month day-of-week, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledTask {
    DailyFull,
    HourlyIncremental,
    WeeklyCleanup,
    MonthlyVerification,
}

impl ScheduledTask {
    pub const ALL: [ScheduledTask; 4] = [
        ScheduledTask::DailyFull,
        ScheduledTask::HourlyIncremental,
        ScheduledTask::WeeklyCleanup,
        ScheduledTask::MonthlyVerification,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScheduledTask::DailyFull => "daily-full-backup",
            ScheduledTask::HourlyIncremental => "hourly-incremental-backup",
            ScheduledTask::WeeklyCleanup => "weekly-backup-cleanup",
            ScheduledTask::MonthlyVerification => "monthly-verification-backup",
        }
    }

    pub fn cron(self) -> &'static str {
        match self {
            ScheduledTask::DailyFull => "0 0 2 * * *",
            ScheduledTask::HourlyIncremental => "0 0 9-18 * * Mon-Fri",
            ScheduledTask::WeeklyCleanup => "0 0 3 * * Sun",
            ScheduledTask::MonthlyVerification => "0 0 4 1 * *",
        }
    }
}

/// Runs one scheduled task to completion. Failures are logged, never retried.
pub async fn run_task(state: &AppState, task: ScheduledTask) {
    let name = task.name();
    if !state.config.automated_backups {
        tracing::debug!(task = name, "Automated backups disabled, skipping");
        return;
    }
    tracing::info!(task = name, "Starting scheduled task");

    match task {
        ScheduledTask::DailyFull => {
            let result = state
                .snapshots
                .create_full_backup(&BackupOptions::with_batch_size(1000))
                .await;
            log_backup(name, &result);
        }
        ScheduledTask::HourlyIncremental => {
            let since = state.clock.now() - chrono::Duration::hours(1);
            let result = state
                .snapshots
                .create_incremental_backup(since, &BackupOptions::with_batch_size(500))
                .await;
            log_backup(name, &result);
        }
        ScheduledTask::WeeklyCleanup => {
            let deleted = state
                .catalog
                .delete_older_than(state.config.retention_days)
                .await;
            tracing::info!(task = name, deleted, "Weekly backup cleanup completed");
        }
        ScheduledTask::MonthlyVerification => {
            let result = state
                .snapshots
                .create_full_backup(&BackupOptions::with_batch_size(2000))
                .await;
            log_backup(name, &result);
            if result.success {
                let stats = state.catalog.stats().await;
                tracing::info!(
                    task = name,
                    files = stats.full + stats.incremental,
                    full = stats.full,
                    incremental = stats.incremental,
                    total_mb = stats.total_bytes / (1024 * 1024),
                    "Backup statistics"
                );
            }
        }
    }
}

/// Job body: runs `task` unless shutdown has begun.
pub async fn run_unless_cancelled(
    state: &AppState,
    cancel: &CancellationToken,
    task: ScheduledTask,
) {
    if cancel.is_cancelled() {
        tracing::info!(task = task.name(), "Shutting down, skipping scheduled task");
        return;
    }
    run_task(state, task).await;
}

fn log_backup(task: &str, result: &crate::models::backup::BackupResult) {
    if result.success {
        tracing::info!(
            task,
            backup_id = %result.backup_id,
            records = result.record_count.unwrap_or_default(),
            bytes = result.file_size.unwrap_or_default(),
            "Scheduled backup completed"
        );
    } else {
        tracing::error!(
            task,
            backup_id = %result.backup_id,
            error = result.error.as_deref().unwrap_or("unknown"),
            "Scheduled backup failed"
        );
    }
}

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl BackupScheduler {
    pub async fn new(state: Arc<AppState>, cancel: CancellationToken) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            state,
            cancel,
        })
    }

    pub async fn schedule_task(&self, task: ScheduledTask) -> anyhow::Result<()> {
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let job = Job::new_async(task.cron(), move |_uuid, _lock| {
            let state = state.clone();
            let cancel = cancel.clone();
            Box::pin(async move {
                run_unless_cancelled(&state, &cancel, task).await;
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(task = task.name(), cron = task.cron(), "Job scheduled");
        Ok(())
    }

    pub async fn init_schedules(&self) -> anyhow::Result<()> {
        let mut count = 0;
        for task in ScheduledTask::ALL {
            if let Err(e) = self.schedule_task(task).await {
                tracing::error!(
                    task = task.name(),
                    cron = task.cron(),
                    error = %e,
                    "Failed to schedule task"
                );
            } else {
                count += 1;
            }
        }

        tracing::info!(
            count,
            enabled = self.state.config.automated_backups,
            "Backup schedules initialized"
        );
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}
