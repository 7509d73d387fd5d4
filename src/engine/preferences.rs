use std::collections::HashSet;

use chrono::{Duration, NaiveDate, Weekday};
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::clock::week_start;
use crate::engine::jobs::{JobKind, JobReport};
use crate::engine::notify::{audit, notify};
use crate::engine::scheduler::generate_week_schedule;
use crate::error::{AppError, Conflict};
use crate::models::notification::{Actor, NotificationKind};
use crate::models::preferences::{DriverPreferences, MAX_PREFERRED_ROUTES};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct PreferencesInput {
    pub week_start: NaiveDate,
    pub weekdays: Vec<Weekday>,
    #[serde(default)]
    pub preferred_routes: Vec<Uuid>,
}

fn ensure_monday(week: NaiveDate) -> Result<(), AppError> {
    if week_start(week) != week {
        return Err(AppError::Validation(format!("week start {week} is not a Monday")));
    }
    Ok(())
}

pub fn set_preferences(
    state: &AppState,
    driver_id: Uuid,
    input: PreferencesInput,
) -> Result<DriverPreferences, AppError> {
    ensure_monday(input.week_start)?;
    state.driver(driver_id)?;

    if input.preferred_routes.len() > MAX_PREFERRED_ROUTES {
        return Err(AppError::Validation(format!(
            "at most {MAX_PREFERRED_ROUTES} preferred routes, got {}",
            input.preferred_routes.len()
        )));
    }
    let mut seen = HashSet::new();
    for route_id in &input.preferred_routes {
        if !seen.insert(*route_id) {
            return Err(AppError::Validation(format!("route {route_id} listed twice")));
        }
        state.route(*route_id)?;
    }
    if state.week_locks.contains_key(&input.week_start) {
        return Err(Conflict::PreferencesLocked.into());
    }

    let mut weekdays = input.weekdays;
    weekdays.sort_by_key(|day| day.num_days_from_monday());
    weekdays.dedup();

    let now = state.clock.now();
    let (before, after) = match state.preferences.entry((driver_id, input.week_start)) {
        Entry::Occupied(mut existing) => {
            if existing.get().locked_at.is_some() {
                return Err(Conflict::PreferencesLocked.into());
            }
            let before = existing.get().clone();
            let prefs = existing.get_mut();
            prefs.weekdays = weekdays;
            prefs.preferred_routes = input.preferred_routes;
            prefs.updated_at = now;
            (Some(before), prefs.clone())
        }
        Entry::Vacant(slot) => {
            let prefs = DriverPreferences {
                driver_id,
                week_start: input.week_start,
                weekdays,
                preferred_routes: input.preferred_routes,
                updated_at: now,
                locked_at: None,
            };
            slot.insert(prefs.clone());
            (None, prefs)
        }
    };

    audit(state, "preferences", driver_id, "updated", Actor::Driver(driver_id), before.as_ref(), Some(&after));
    info!(driver_id = %driver_id, week_start = %after.week_start, "driver preferences saved");

    Ok(after)
}

/// Freezes preferences for `week`, generates its schedule and tells every
/// driver with work that week. Rerunning is safe.
pub fn lock_week(state: &AppState, week: NaiveDate) -> Result<JobReport, AppError> {
    ensure_monday(week)?;
    let mut report = JobReport::new(JobKind::LockPreferences);
    let now = state.clock.now();

    let locked_at = *state.week_locks.entry(week).or_insert(now).value();

    let driver_ids: Vec<Uuid> = state
        .drivers
        .iter()
        .filter(|entry| entry.value().active)
        .map(|entry| *entry.key())
        .collect();

    for driver_id in driver_ids {
        report.examined += 1;

        // standing preferences from an earlier week carry forward
        let carried = match state.preferences.get(&(driver_id, week)) {
            Some(_) => None,
            None => state.preferences_for(driver_id, week),
        };

        match state.preferences.entry((driver_id, week)) {
            Entry::Occupied(mut existing) => {
                if existing.get().locked_at.is_none() {
                    existing.get_mut().locked_at = Some(locked_at);
                    report.transitioned += 1;
                }
            }
            Entry::Vacant(slot) => match carried {
                Some(previous) => {
                    slot.insert(DriverPreferences {
                        week_start: week,
                        updated_at: now,
                        locked_at: Some(locked_at),
                        ..previous
                    });
                    report.transitioned += 1;
                }
                None => report.skipped += 1,
            },
        }
    }

    let schedule = generate_week_schedule(state, week)?;
    report.created += schedule.created;
    report.unfilled += schedule.unfilled;
    report.errors += schedule.errors;

    let sunday = week + Duration::days(6);
    let mut workload: Vec<(Uuid, usize)> = Vec::new();
    let held: Vec<Uuid> = state
        .assignments
        .iter()
        .filter(|entry| {
            let assignment = entry.value();
            assignment.date >= week && assignment.date <= sunday && assignment.status.holds_driver()
        })
        .filter_map(|entry| entry.value().user_id)
        .collect();
    for driver_id in held {
        match workload.iter_mut().find(|(id, _)| *id == driver_id) {
            Some((_, count)) => *count += 1,
            None => workload.push((driver_id, 1)),
        }
    }

    for (driver_id, shifts) in workload {
        if notify(
            state,
            driver_id,
            NotificationKind::ScheduleLocked,
            format!("schedule_locked:{week}:{driver_id}"),
            json!({ "week_start": week, "shifts": shifts }),
        ) {
            report.notified += 1;
        }
    }

    info!(
        week_start = %week,
        locked = report.transitioned,
        created = report.created,
        unfilled = report.unfilled,
        "preferences locked and week scheduled"
    );

    Ok(report)
}
