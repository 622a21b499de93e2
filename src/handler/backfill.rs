use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::Error,
    helpers::{BackfillMode, TimeWindow},
};

use super::pipeline::RunReport;

/// Lifecycle of one backfill day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    Attempting(u32),
    Succeeded,
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub failed_days: Vec<u32>,
    /// Succeeded days where some token's history could not be fully paged.
    pub truncated_days: Vec<u32>,
    pub cancelled: bool,
}

/// Replays history one day at a time. A day is retried up to `attempts`
/// times with `cooldown` in between; a day that never succeeds is counted
/// and skipped, it never blocks the days after it.
#[derive(Debug, Clone)]
pub struct Backfill {
    days: u32,
    mode: BackfillMode,
    attempts: u32,
    cooldown: Duration,
    cancel: CancellationToken,
}

impl Backfill {
    pub fn new(
        days: u32,
        mode: BackfillMode,
        attempts: u32,
        cooldown: Duration,
        cancel: CancellationToken,
    ) -> Backfill {
        Backfill {
            days,
            mode,
            attempts: attempts.max(1),
            cooldown,
            cancel,
        }
    }

    pub fn day_count(&self) -> u32 {
        match self.mode {
            BackfillMode::Test => self.days.min(1),
            BackfillMode::Full => self.days,
        }
    }

    pub async fn run<F, Fut>(
        &self,
        now: DateTime<Utc>,
        mut run_day: F,
    ) -> BackfillReport
    where
        F: FnMut(u32, TimeWindow) -> Fut,
        Fut: Future<Output = Result<RunReport, Error>>,
    {
        let mut report = BackfillReport::default();
        let total = self.day_count();

        info!(days = total, mode = %self.mode, "backfill started");

        for day in 1..=total {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let window = TimeWindow::day(now, day);
            report.attempted += 1;

            match self
                .run_single_day(day, window, &mut run_day, &mut report)
                .await
            {
                DayState::Succeeded => report.succeeded += 1,
                DayState::Failed => {
                    report.failed += 1;
                    report.failed_days.push(day);
                },
                DayState::Attempting(_) => {
                    report.attempted -= 1;
                    report.cancelled = true;
                    break;
                },
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            "backfill finished"
        );

        report
    }

    /// Drives one day to a terminal state. Returns the non-terminal state it
    /// was in when cancellation interrupted it.
    async fn run_single_day<F, Fut>(
        &self,
        day: u32,
        window: TimeWindow,
        run_day: &mut F,
        report: &mut BackfillReport,
    ) -> DayState
    where
        F: FnMut(u32, TimeWindow) -> Fut,
        Fut: Future<Output = Result<RunReport, Error>>,
    {
        for attempt in 1..=self.attempts {
            let state = DayState::Attempting(attempt);
            info!(
                day,
                attempt,
                start = %window.start,
                end = %window.end,
                "backfilling day"
            );

            match run_day(day, window).await {
                Ok(run) if run.is_success() => {
                    info!(day, attempt, "day succeeded: {}", run);
                    if !run.truncated.is_empty() {
                        warn!(day, units = ?run.truncated, "day only partly covered");
                        report.truncated_days.push(day);
                    }
                    return DayState::Succeeded;
                },
                Ok(run) if run.cancelled => return state,
                Ok(run) => {
                    warn!(
                        day,
                        attempt,
                        failed_units = run.failed.len(),
                        "day attempt incomplete"
                    );
                },
                Err(e) if e.is_cancelled() => return state,
                Err(e) => {
                    warn!(day, attempt, "day attempt failed: {}", e);
                },
            }

            if attempt < self.attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => return state,
                    _ = tokio::time::sleep(self.cooldown) => {},
                }
            }
        }

        error!(day, attempts = self.attempts, "day failed, moving on");
        DayState::Failed
    }
}
