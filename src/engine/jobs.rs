use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use tracing::{error, info};

use crate::engine::{bidding, detector, health, preferences};
use crate::error::AppError;
use crate::state::AppState;

/// Counts returned by every batch entry point. A second run with no state
/// change in between reports zero created/transitioned/notified.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct JobReport {
    pub job: String,
    pub examined: usize,
    pub created: usize,
    pub unfilled: usize,
    pub transitioned: usize,
    pub resolved: usize,
    pub closed: usize,
    pub notified: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl JobReport {
    pub fn new(job: JobKind) -> Self {
        Self {
            job: job.as_str().to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    LockPreferences,
    CloseBidWindows,
    AutoDropUnconfirmed,
    SendConfirmationReminders,
    NoShowDetection,
    HealthDaily,
    HealthWeekly,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::LockPreferences => "lock-preferences",
            JobKind::CloseBidWindows => "close-bid-windows",
            JobKind::AutoDropUnconfirmed => "auto-drop-unconfirmed",
            JobKind::SendConfirmationReminders => "send-confirmation-reminders",
            JobKind::NoShowDetection => "no-show-detection",
            JobKind::HealthDaily => "health-daily",
            JobKind::HealthWeekly => "health-weekly",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "lock-preferences" => Ok(JobKind::LockPreferences),
            "close-bid-windows" => Ok(JobKind::CloseBidWindows),
            "auto-drop-unconfirmed" => Ok(JobKind::AutoDropUnconfirmed),
            "send-confirmation-reminders" => Ok(JobKind::SendConfirmationReminders),
            "no-show-detection" => Ok(JobKind::NoShowDetection),
            "health-daily" => Ok(JobKind::HealthDaily),
            "health-weekly" => Ok(JobKind::HealthWeekly),
            other => Err(AppError::NotFound(format!("unknown job: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JobParams {
    /// Target week for `lock-preferences`; defaults to the Monday two weeks out.
    pub week_start: Option<NaiveDate>,
}

pub fn run_job(state: &AppState, job: JobKind, params: JobParams) -> Result<JobReport, AppError> {
    let start = Instant::now();

    let result = match job {
        JobKind::LockPreferences => {
            let week = params.week_start.unwrap_or_else(|| {
                let today = state.clock.today();
                state.clock.week_start(today) + Duration::days(14)
            });
            preferences::lock_week(state, week)
        }
        JobKind::CloseBidWindows => Ok(bidding::close_expired_windows(state)),
        JobKind::AutoDropUnconfirmed => Ok(detector::auto_drop_unconfirmed(state)),
        JobKind::SendConfirmationReminders => Ok(detector::send_confirmation_reminders(state)),
        JobKind::NoShowDetection => Ok(detector::detect_no_shows(state)),
        JobKind::HealthDaily => Ok(health::run_daily(state)),
        JobKind::HealthWeekly => Ok(health::run_weekly(state)),
    };

    let elapsed = start.elapsed().as_secs_f64();
    state
        .metrics
        .job_duration_seconds
        .with_label_values(&[job.as_str()])
        .observe(elapsed);

    match &result {
        Ok(report) => {
            let outcome = if report.errors == 0 { "success" } else { "partial" };
            state
                .metrics
                .jobs_total
                .with_label_values(&[job.as_str(), outcome])
                .inc();
            info!(
                job = %job,
                examined = report.examined,
                created = report.created,
                transitioned = report.transitioned,
                resolved = report.resolved,
                notified = report.notified,
                errors = report.errors,
                "job finished"
            );
        }
        Err(err) => {
            state
                .metrics
                .jobs_total
                .with_label_values(&[job.as_str(), "error"])
                .inc();
            error!(job = %job, error = %err, "job failed");
        }
    }

    result
}
