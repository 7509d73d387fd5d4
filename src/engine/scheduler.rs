//! Weekly schedule generation from locked preferences.
//!
//! Each (date, route) slot without a live assignment goes to the best ranked
//! candidate: a reliability-eligible driver who asked for that weekday, has
//! room under the weekly cap and is not already working that date. Slots
//! nobody can take become unfilled assignments with a competitive bid window.

use std::cmp::Ordering;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::week_start;
use crate::engine::bidding::{OpenWindowOptions, WindowOpening, open_window};
use crate::engine::notify::audit;
use crate::error::{AppError, Conflict};
use crate::models::assignment::Assignment;
use crate::models::bid::BidTrigger;
use crate::models::driver::Driver;
use crate::models::notification::Actor;
use crate::models::route::Route;
use crate::state::AppState;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ScheduleReport {
    pub week_start: Option<NaiveDate>,
    pub examined: usize,
    pub created: usize,
    pub unfilled: usize,
    /// Slots that already held a live assignment.
    pub skipped: usize,
    pub windows_opened: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub familiarity: u32,
    pub completion_rate: f64,
    pub attendance_rate: f64,
}

impl Candidate {
    fn of(driver: &Driver, route_id: Uuid) -> Self {
        Self {
            driver_id: driver.id,
            familiarity: driver.route_familiarity(route_id),
            completion_rate: driver.metrics.completion_rate,
            attendance_rate: driver.metrics.attendance_rate,
        }
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.familiarity
        .cmp(&a.familiarity)
        .then_with(|| b.completion_rate.total_cmp(&a.completion_rate))
        .then_with(|| b.attendance_rate.total_cmp(&a.attendance_rate))
        .then_with(|| a.driver_id.cmp(&b.driver_id))
}

/// Best candidate first: familiarity, then completion rate, then attendance.
/// Driver id breaks exact ties so reruns pick the same driver.
pub fn rank_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(compare_candidates);
    candidates
}

fn week_dates(monday: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    (0..7).map(move |offset| monday + Duration::days(offset))
}

/// Claims the slot for `driver_id` if the driver still qualifies. Returns
/// `Ok(None)` when the driver no longer fits and the next candidate should
/// be tried.
fn try_assign(
    state: &AppState,
    route: &Route,
    date: NaiveDate,
    driver_id: Uuid,
) -> Result<Option<Assignment>, AppError> {
    let gate = state.driver_gate(driver_id);
    let _held = gate
        .lock()
        .map_err(|_| AppError::Internal("driver gate poisoned".to_string()))?;

    let driver = state.driver(driver_id)?;
    if !driver.is_eligible()
        || state.works_on(driver_id, date)
        || state.weekly_load(driver_id, date) >= usize::from(driver.weekly_cap)
    {
        return Ok(None);
    }

    let assignment = Assignment::scheduled(route.id, date, driver_id, state.clock.now());
    if !state.insert_assignment_if_vacant(assignment.clone()) {
        return Err(Conflict::InvalidStatus {
            expected: "vacant",
            actual: "scheduled",
        }
        .into());
    }

    Ok(Some(assignment))
}

pub fn generate_week_schedule(state: &AppState, week: NaiveDate) -> Result<ScheduleReport, AppError> {
    if week_start(week) != week {
        return Err(AppError::Validation(format!("week start {week} is not a Monday")));
    }
    let locked_at = state
        .week_locks
        .get(&week)
        .map(|entry| *entry.value())
        .ok_or(AppError::Conflict(Conflict::WeekNotLocked))?;

    let preferences = state.locked_preferences(week);
    let mut routes: Vec<Route> = state
        .routes
        .iter()
        .filter(|entry| entry.value().active)
        .map(|entry| entry.value().clone())
        .collect();
    routes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

    let mut report = ScheduleReport {
        week_start: Some(week),
        ..ScheduleReport::default()
    };

    for date in week_dates(week) {
        for route in &routes {
            report.examined += 1;
            if state.assignment_slots.contains_key(&(route.id, date)) {
                report.skipped += 1;
                continue;
            }

            let candidates: Vec<Candidate> = preferences
                .values()
                .filter(|prefs| prefs.prefers_day(date.weekday()))
                .filter_map(|prefs| state.driver(prefs.driver_id).ok())
                .filter(|driver| driver.is_eligible() && driver.created_at <= locked_at)
                .filter(|driver| {
                    !state.works_on(driver.id, date)
                        && state.weekly_load(driver.id, date) < usize::from(driver.weekly_cap)
                })
                .map(|driver| Candidate::of(&driver, route.id))
                .collect();

            let mut placed = None;
            let mut slot_taken = false;
            for candidate in rank_candidates(candidates) {
                match try_assign(state, route, date, candidate.driver_id) {
                    Ok(Some(assignment)) => {
                        placed = Some(assignment);
                        break;
                    }
                    Ok(None) => continue,
                    Err(AppError::Conflict(_)) => {
                        slot_taken = true;
                        break;
                    }
                    Err(err) => {
                        report.errors += 1;
                        warn!(route_id = %route.id, date = %date, error = %err, "schedule slot failed");
                        slot_taken = true;
                        break;
                    }
                }
            }

            if let Some(assignment) = placed {
                report.created += 1;
                state.metrics.transition("scheduled");
                audit(state, "assignment", assignment.id, "scheduled", Actor::System, None, Some(&assignment));
                debug!(
                    assignment_id = %assignment.id,
                    route_id = %route.id,
                    date = %date,
                    driver_id = ?assignment.user_id,
                    "slot assigned by algorithm"
                );
                continue;
            }
            if slot_taken {
                report.skipped += 1;
                continue;
            }

            let gap = Assignment::unfilled(route.id, date, state.clock.now());
            if !state.insert_assignment_if_vacant(gap.clone()) {
                report.skipped += 1;
                continue;
            }
            report.unfilled += 1;
            state.metrics.transition("unfilled");
            audit(state, "assignment", gap.id, "unfilled", Actor::System, None, Some(&gap));

            match open_window(state, gap.id, BidTrigger::ScheduleGap, OpenWindowOptions::default()) {
                Ok(WindowOpening::Opened(_)) => report.windows_opened += 1,
                Ok(WindowOpening::Existing(_)) => {}
                Err(err) => {
                    report.errors += 1;
                    warn!(assignment_id = %gap.id, error = %err, "failed to open window for schedule gap");
                }
            }
        }
    }

    info!(
        week_start = %week,
        created = report.created,
        unfilled = report.unfilled,
        skipped = report.skipped,
        "week schedule generated"
    );

    Ok(report)
}
