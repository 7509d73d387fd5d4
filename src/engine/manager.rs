//! Manager overrides. These bypass the automatic reliability policy: a
//! manual assignment ignores caps and flags, and unflag/reinstate win over
//! whatever the policy decided before them.

use chrono::{Duration, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::engine::bidding::{
    OpenWindowOptions, notify_bidders, open_window, reject_pending, withdraw_window,
};
use crate::engine::lifecycle::{confirmation_deadline, mutate_assignment};
use crate::engine::notify::{audit, notify};
use crate::engine::reliability::recompute_driver;
use crate::error::{AppError, Conflict};
use crate::models::assignment::{AssignedBy, Assignment, AssignmentStatus};
use crate::models::bid::{BidMode, BidTrigger, BidWindow, WindowStatus};
use crate::models::driver::Driver;
use crate::models::history::{ReliabilityEvent, ReliabilityEventKind};
use crate::models::notification::{Actor, NotificationKind};
use crate::models::route::Route;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct NewRoute {
    pub name: String,
    pub warehouse_id: Uuid,
    #[serde(default)]
    pub manager_id: Option<Uuid>,
    pub start_time: NaiveTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDriver {
    pub name: String,
    #[serde(default)]
    pub weekly_cap: Option<u8>,
}

pub fn create_route(state: &AppState, input: NewRoute) -> Result<Route, AppError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("route name is required".to_string()));
    }

    let route = Route {
        id: Uuid::new_v4(),
        name: name.to_string(),
        warehouse_id: input.warehouse_id,
        manager_id: input.manager_id,
        start_time: input.start_time,
        active: true,
        created_at: state.clock.now(),
    };
    state.routes.insert(route.id, route.clone());

    let actor = input.manager_id.map(Actor::Manager).unwrap_or(Actor::System);
    audit(state, "route", route.id, "created", actor, None, Some(&route));
    info!(route_id = %route.id, name = %route.name, "route registered");

    Ok(route)
}

pub fn create_driver(state: &AppState, input: NewDriver) -> Result<Driver, AppError> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("driver name is required".to_string()));
    }
    let cap = input.weekly_cap.unwrap_or(state.policy.default_weekly_cap);
    validate_cap(state, cap)?;

    let mut driver = Driver::new(name.to_string(), cap, state.clock.now());
    driver.cap_overridden = input.weekly_cap.is_some();
    state.drivers.insert(driver.id, driver.clone());

    audit(state, "driver", driver.id, "created", Actor::System, None, Some(&driver));
    info!(driver_id = %driver.id, weekly_cap = cap, "driver registered");

    Ok(driver)
}

fn validate_cap(state: &AppState, cap: u8) -> Result<(), AppError> {
    if cap == 0 || cap > state.policy.max_weekly_cap {
        return Err(AppError::Validation(format!(
            "weekly cap must be between 1 and {}, got {cap}",
            state.policy.max_weekly_cap
        )));
    }
    Ok(())
}

/// Puts a driver on an unfilled assignment directly. Any open window is
/// withdrawn first; if a bidder already claimed it the manager loses the race.
pub fn manual_assign(
    state: &AppState,
    assignment_id: Uuid,
    driver_id: Uuid,
    manager_id: Uuid,
) -> Result<Assignment, AppError> {
    let current = state.assignment(assignment_id)?;
    if current.status != AssignmentStatus::Unfilled {
        return Err(Conflict::InvalidStatus {
            expected: AssignmentStatus::Unfilled.as_str(),
            actual: current.status.as_str(),
        }
        .into());
    }

    let driver = state.driver(driver_id)?;
    if !driver.active {
        return Err(Conflict::DriverIneligible.into());
    }

    let gate = state.driver_gate(driver_id);
    let _held = gate
        .lock()
        .map_err(|_| AppError::Internal("driver gate poisoned".to_string()))?;

    if state.works_on(driver_id, current.date) {
        return Err(Conflict::DoubleBooked.into());
    }

    withdraw_window(state, assignment_id)?;

    let now = state.clock.now();
    let auto_confirm = now > confirmation_deadline(state, &current)?;
    let assigned = mutate_assignment(state, assignment_id, |row| {
        if row.status != AssignmentStatus::Unfilled || row.user_id.is_some() {
            return Err(AppError::AlreadyAssigned);
        }
        row.bind(driver_id, AssignedBy::Manager, now);
        if auto_confirm {
            // too late for the driver to confirm on their own
            row.confirmed_at = Some(now);
        }
        Ok(())
    })?;

    if auto_confirm {
        state.record_event(ReliabilityEvent {
            driver_id,
            assignment_id,
            route_id: assigned.route_id,
            date: assigned.date,
            kind: ReliabilityEventKind::Confirmed,
            recorded_at: now,
        });
        recompute_driver(state, driver_id)?;
        notify(
            state,
            driver_id,
            NotificationKind::AssignmentConfirmed,
            format!("assignment_confirmed:{assignment_id}:{driver_id}"),
            json!({
                "assignment_id": assignment_id,
                "date": assigned.date,
                "route_id": assigned.route_id,
                "assigned_by": "manager",
            }),
        );
    }

    state.metrics.transition("manual_assigned");
    audit(state, "assignment", assignment_id, "manual_assigned", Actor::Manager(manager_id), Some(&current), Some(&assigned));
    info!(
        assignment_id = %assignment_id,
        driver_id = %driver_id,
        manager_id = %manager_id,
        auto_confirm,
        "assignment filled by manager"
    );

    Ok(assigned)
}

/// Opens an emergency window for an unfilled assignment, or upgrades the
/// window already open for it.
pub fn emergency_reopen(
    state: &AppState,
    assignment_id: Uuid,
    manager_id: Uuid,
    pay_bonus_pct: Option<u8>,
) -> Result<BidWindow, AppError> {
    if pay_bonus_pct.is_some_and(|pct| pct > 100) {
        return Err(AppError::Validation("pay bonus must be at most 100%".to_string()));
    }

    let assignment = state.assignment(assignment_id)?;
    if assignment.status != AssignmentStatus::Unfilled {
        return Err(Conflict::InvalidStatus {
            expected: AssignmentStatus::Unfilled.as_str(),
            actual: assignment.status.as_str(),
        }
        .into());
    }

    let existing = state
        .open_windows
        .get(&assignment_id)
        .map(|entry| *entry.value());

    let Some(window_id) = existing else {
        let opening = open_window(
            state,
            assignment_id,
            BidTrigger::Manager,
            OpenWindowOptions {
                pay_bonus_pct,
                exclude_driver: None,
            },
        )?;
        let window = opening.window().clone();
        audit(state, "bid_window", window.id, "emergency_opened", Actor::Manager(manager_id), None, Some(&window));
        return Ok(window);
    };

    let now = state.clock.now();
    let shift_start = state.shift_start(&assignment)?;
    let bonus = pay_bonus_pct.unwrap_or(state.policy.emergency_bonus_pct);

    let (before, after) = {
        let mut row = state
            .bid_windows
            .get_mut(&window_id)
            .ok_or_else(|| AppError::NotFound(format!("bid window {window_id} not found")))?;
        if row.status != WindowStatus::Open {
            return Err(AppError::AlreadyAssigned);
        }
        let before = row.clone();
        row.mode = BidMode::Emergency;
        row.trigger = BidTrigger::Manager;
        row.pay_bonus_pct = Some(bonus);
        row.closes_at = shift_start.max(now + Duration::minutes(state.policy.emergency_window_minutes));
        (before, row.clone())
    };

    if before.mode == BidMode::Competitive {
        // queued bids do not carry over into first-accept mode
        reject_pending(state, &before);
    }

    state.metrics.transition("bid_window_emergency");
    let invited = notify_bidders(state, &after, &assignment, None, "emergency");
    audit(state, "bid_window", window_id, "emergency_upgraded", Actor::Manager(manager_id), Some(&before), Some(&after));
    info!(
        window_id = %window_id,
        assignment_id = %assignment_id,
        manager_id = %manager_id,
        bonus,
        invited,
        "bid window upgraded to emergency"
    );

    Ok(after)
}

fn update_driver<F>(
    state: &AppState,
    driver_id: Uuid,
    manager_id: Uuid,
    action: &'static str,
    apply: F,
) -> Result<Driver, AppError>
where
    F: FnOnce(&mut Driver) -> Result<(), AppError>,
{
    let now = state.clock.now();
    let (before, after) = {
        let mut row = state
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
        let before = row.clone();
        apply(row.value_mut())?;
        row.updated_at = now;
        (before, row.clone())
    };

    audit(state, "driver", driver_id, action, Actor::Manager(manager_id), Some(&before), Some(&after));
    info!(driver_id = %driver_id, manager_id = %manager_id, action, "manager updated driver");

    Ok(after)
}

pub fn unflag(state: &AppState, driver_id: Uuid, manager_id: Uuid) -> Result<Driver, AppError> {
    let now = state.clock.now();
    update_driver(state, driver_id, manager_id, "unflagged", |driver| {
        driver.flagged = false;
        driver.flag_warning_at = None;
        driver.flag_cap_reduced = false;
        driver.flag_cleared_at = Some(now);
        Ok(())
    })
}

pub fn reinstate(state: &AppState, driver_id: Uuid, manager_id: Uuid) -> Result<Driver, AppError> {
    let now = state.clock.now();
    update_driver(state, driver_id, manager_id, "reinstated", |driver| {
        let health = &mut driver.health;
        health.hard_stop_at = None;
        health.assignment_pool_eligible = true;
        health.requires_manager_intervention = false;
        health.reinstated_at = Some(now);
        Ok(())
    })
}

pub fn set_weekly_cap(
    state: &AppState,
    driver_id: Uuid,
    manager_id: Uuid,
    weekly_cap: u8,
) -> Result<Driver, AppError> {
    validate_cap(state, weekly_cap)?;
    update_driver(state, driver_id, manager_id, "weekly_cap_set", |driver| {
        driver.weekly_cap = weekly_cap;
        driver.cap_overridden = true;
        Ok(())
    })
}

pub fn deactivate_driver(state: &AppState, driver_id: Uuid, manager_id: Uuid) -> Result<Driver, AppError> {
    update_driver(state, driver_id, manager_id, "deactivated", |driver| {
        if !driver.active {
            return Err(AppError::Validation(format!("driver {} is already inactive", driver.id)));
        }
        driver.active = false;
        Ok(())
    })
}
