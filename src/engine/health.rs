//! Driver health: daily score, hard stops and weekly streaks.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DispatchPolicy;
use crate::engine::jobs::{JobKind, JobReport};
use crate::engine::notify::notify;
use crate::engine::reliability::recompute_driver;
use crate::error::AppError;
use crate::models::assignment::AssignmentStatus;
use crate::models::history::{HealthSnapshot, ReliabilityEvent, ReliabilityEventKind};
use crate::models::notification::NotificationKind;
use crate::state::AppState;

const ATTENDANCE_WEIGHT: f64 = 0.5;
const COMPLETION_WEIGHT: f64 = 0.3;
const RELIABILITY_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthComponents {
    pub attendance: f64,
    pub completion: f64,
    pub reliability: f64,
}

impl HealthComponents {
    pub fn score(&self) -> u8 {
        let raw = ATTENDANCE_WEIGHT * self.attendance
            + COMPLETION_WEIGHT * self.completion
            + RELIABILITY_WEIGHT * self.reliability;
        (raw.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// Components over a window of ledger rows and completion ratios. An empty
/// window counts as perfect.
pub fn health_components(events: &[ReliabilityEvent], completion_ratios: &[f64]) -> HealthComponents {
    let count = |kind: ReliabilityEventKind| events.iter().filter(|event| event.kind == kind).count();

    let completed = count(ReliabilityEventKind::Completed);
    let late = count(ReliabilityEventKind::LateCancellation);
    let no_shows = count(ReliabilityEventKind::NoShow);
    let auto_dropped = count(ReliabilityEventKind::AutoDropped);
    let early = count(ReliabilityEventKind::EarlyCancellation);

    let attended = completed + late + no_shows;
    let attendance = if attended == 0 {
        1.0
    } else {
        completed as f64 / attended as f64
    };

    let completion = if completion_ratios.is_empty() {
        1.0
    } else {
        completion_ratios.iter().sum::<f64>() / completion_ratios.len() as f64
    };

    let assigned = attended + auto_dropped + early;
    let reliability = if assigned == 0 {
        1.0
    } else {
        1.0 - (late + no_shows + auto_dropped) as f64 / assigned as f64
    };

    HealthComponents {
        attendance,
        completion,
        reliability,
    }
}

/// True when the window holds a no-show or enough late cancellations.
pub fn breaches_hard_stop(events: &[ReliabilityEvent], policy: &DispatchPolicy) -> bool {
    let no_shows = events
        .iter()
        .filter(|event| event.kind == ReliabilityEventKind::NoShow)
        .count();
    let late = events
        .iter()
        .filter(|event| event.kind == ReliabilityEventKind::LateCancellation)
        .count() as u32;

    no_shows > 0 || late >= policy.hard_stop_late_cancellations
}

/// Whether a finished week earns a streak step.
pub fn week_qualifies(
    events: &[ReliabilityEvent],
    held_statuses: &[AssignmentStatus],
    completion_ratios: &[f64],
    policy: &DispatchPolicy,
) -> bool {
    let blemished = events.iter().any(|event| {
        matches!(
            event.kind,
            ReliabilityEventKind::NoShow
                | ReliabilityEventKind::LateCancellation
                | ReliabilityEventKind::AutoDropped
        )
    });
    if blemished || held_statuses.is_empty() {
        return false;
    }
    if held_statuses
        .iter()
        .any(|status| *status != AssignmentStatus::Completed)
    {
        return false;
    }

    let completion = if completion_ratios.is_empty() {
        0.0
    } else {
        completion_ratios.iter().sum::<f64>() / completion_ratios.len() as f64
    };
    completion >= policy.weekly_completion_bar
}

fn window_start(state: &AppState) -> NaiveDate {
    state
        .clock
        .add_days(state.clock.today(), -(state.policy.health_window_days - 1))
}

/// Ledger rows recorded on a local date inside `[from, to]`, ignoring anything
/// before a reinstatement. Late cancellations are recorded ahead of the shift
/// date, so the shift date is not usable here.
fn events_between(
    state: &AppState,
    driver_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
    since: Option<DateTime<Utc>>,
) -> Vec<ReliabilityEvent> {
    state
        .driver_events(driver_id)
        .into_iter()
        .filter(|event| {
            let recorded = state.clock.local_date(event.recorded_at);
            recorded >= from && recorded <= to
        })
        .filter(|event| since.is_none_or(|reinstated| event.recorded_at > reinstated))
        .collect()
}

fn completion_ratios_between(
    state: &AppState,
    driver_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<f64> {
    let assignment_ids: Vec<(Uuid, NaiveDate)> = state
        .assignments
        .iter()
        .filter(|entry| entry.value().is_held_by(driver_id))
        .map(|entry| (entry.value().id, entry.value().date))
        .collect();

    assignment_ids
        .into_iter()
        .filter(|(_, date)| *date >= from && *date <= to)
        .filter_map(|(id, _)| {
            let shift = state.shifts.get(&id)?;
            shift.completed_at?;
            shift.completion_ratio()
        })
        .collect()
}

/// Applies a hard stop when recent history warrants one. Returns whether a
/// new hard stop was imposed.
pub fn enforce_hard_stop(state: &AppState, driver_id: Uuid) -> Result<bool, AppError> {
    let driver = state.driver(driver_id)?;
    if driver.health.hard_stop_at.is_some() {
        return Ok(false);
    }

    let events = events_between(
        state,
        driver_id,
        window_start(state),
        state.clock.today(),
        driver.health.reinstated_at,
    );
    if !breaches_hard_stop(&events, &state.policy) {
        return Ok(false);
    }

    let now = state.clock.now();
    {
        let mut driver = state
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
        if driver.health.hard_stop_at.is_some() {
            return Ok(false);
        }
        let health = &mut driver.health;
        health.hard_stop_at = Some(now);
        health.score = health.score.min(state.policy.hard_stop_score_ceiling);
        health.stars = 0;
        health.streak_weeks = 0;
        health.assignment_pool_eligible = false;
        health.requires_manager_intervention = true;
        driver.updated_at = now;
    }

    state.metrics.transition("hard_stop");
    notify(
        state,
        driver_id,
        NotificationKind::Warning,
        format!("warning:hard_stop:{driver_id}:{}", now.timestamp()),
        json!({
            "reason": "hard_stop",
            "window_days": state.policy.health_window_days,
        }),
    );
    warn!(driver_id = %driver_id, "hard stop imposed; driver removed from assignment pool");

    Ok(true)
}

/// Refreshes reliability, hard stops and today's health snapshot for every driver.
pub fn run_daily(state: &AppState) -> JobReport {
    let mut report = JobReport::new(JobKind::HealthDaily);
    let today = state.clock.today();
    let from = window_start(state);
    let now = state.clock.now();
    let week = state.clock.week_start(today);

    let driver_ids: Vec<Uuid> = state.drivers.iter().map(|entry| *entry.key()).collect();

    for driver_id in driver_ids {
        report.examined += 1;

        if let Err(err) = recompute_driver(state, driver_id) {
            report.errors += 1;
            warn!(driver_id = %driver_id, error = %err, "failed to recompute reliability");
            continue;
        }
        match enforce_hard_stop(state, driver_id) {
            Ok(true) => report.transitioned += 1,
            Ok(false) => {}
            Err(err) => {
                report.errors += 1;
                warn!(driver_id = %driver_id, error = %err, "failed to evaluate hard stop");
                continue;
            }
        }

        let Ok(driver) = state.driver(driver_id) else {
            report.errors += 1;
            continue;
        };
        if !driver.active {
            report.skipped += 1;
            continue;
        }

        let events = events_between(state, driver_id, from, today, None);
        let ratios = completion_ratios_between(state, driver_id, from, today);
        let components = health_components(&events, &ratios);
        let hard_stop = driver.health.hard_stop_at.is_some();
        let mut score = components.score();
        if hard_stop {
            score = score.min(state.policy.hard_stop_score_ceiling);
        }

        if let Some(mut row) = state.drivers.get_mut(&driver_id) {
            row.health.score = score;
        }

        let snapshot = HealthSnapshot {
            driver_id,
            date: today,
            score,
            attendance_component: components.attendance,
            completion_component: components.completion,
            reliability_component: components.reliability,
            hard_stop,
            computed_at: now,
        };
        match state.health_snapshots.entry((driver_id, today)) {
            Entry::Occupied(mut existing) => {
                existing.insert(snapshot);
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
                report.created += 1;
            }
        }

        if score < state.policy.corrective_score_threshold
            && notify(
                state,
                driver_id,
                NotificationKind::CorrectiveWarning,
                format!("corrective_warning:{driver_id}:{week}"),
                json!({
                    "score": score,
                    "threshold": state.policy.corrective_score_threshold,
                    "hard_stop": hard_stop,
                }),
            )
        {
            report.notified += 1;
        }
    }

    report
}

/// Scores the week that just ended. A driver is evaluated once per week.
pub fn run_weekly(state: &AppState) -> JobReport {
    let mut report = JobReport::new(JobKind::HealthWeekly);
    let this_week = state.clock.week_start(state.clock.today());
    let week = this_week - Duration::days(7);
    let sunday = week + Duration::days(6);
    let now = state.clock.now();

    let driver_ids: Vec<Uuid> = state
        .drivers
        .iter()
        .filter(|entry| entry.value().active)
        .map(|entry| *entry.key())
        .collect();

    for driver_id in driver_ids {
        report.examined += 1;

        let Ok(driver) = state.driver(driver_id) else {
            report.errors += 1;
            continue;
        };
        if driver.health.last_weekly_evaluation.is_some_and(|done| done >= week) {
            report.skipped += 1;
            continue;
        }

        let events = events_between(state, driver_id, week, sunday, None);
        let held: Vec<AssignmentStatus> = state
            .assignments
            .iter()
            .filter(|entry| {
                let assignment = entry.value();
                assignment.is_held_by(driver_id) && assignment.date >= week && assignment.date <= sunday
            })
            .map(|entry| entry.value().status)
            .collect();
        let ratios = completion_ratios_between(state, driver_id, week, sunday);

        let hard_stopped = driver.health.hard_stop_at.is_some();
        let qualifies = !hard_stopped && week_qualifies(&events, &held, &ratios, &state.policy);
        let max_stars = state.policy.max_stars;

        let (streak, stars, advanced, reset) = {
            let Some(mut row) = state.drivers.get_mut(&driver_id) else {
                report.errors += 1;
                continue;
            };
            if row.health.last_weekly_evaluation.is_some_and(|done| done >= week) {
                report.skipped += 1;
                continue;
            }
            row.health.last_weekly_evaluation = Some(week);
            row.updated_at = now;

            let health = &mut row.health;
            if qualifies {
                health.streak_weeks += 1;
                health.stars = (health.stars + 1).min(max_stars);
                (health.streak_weeks, health.stars, true, false)
            } else if health.streak_weeks > 0 || health.stars > 0 {
                health.streak_weeks = 0;
                health.stars = 0;
                (0, 0, false, true)
            } else {
                (0, 0, false, false)
            }
        };

        if advanced {
            report.transitioned += 1;
            if notify(
                state,
                driver_id,
                NotificationKind::StreakAdvanced,
                format!("streak_advanced:{driver_id}:{week}"),
                json!({ "week_start": week, "streak_weeks": streak, "stars": stars }),
            ) {
                report.notified += 1;
            }
            if stars >= max_stars
                && notify(
                    state,
                    driver_id,
                    NotificationKind::BonusEligible,
                    format!("bonus_eligible:{driver_id}:{week}"),
                    json!({ "week_start": week, "stars": stars }),
                )
            {
                report.notified += 1;
            }
            info!(driver_id = %driver_id, streak, stars, "weekly streak advanced");
        } else if reset {
            report.transitioned += 1;
            if notify(
                state,
                driver_id,
                NotificationKind::StreakReset,
                format!("streak_reset:{driver_id}:{week}"),
                json!({ "week_start": week }),
            ) {
                report.notified += 1;
            }
            info!(driver_id = %driver_id, "weekly streak reset");
        }
    }

    report
}
