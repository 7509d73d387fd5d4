//! Assignment and shift lifecycle for driver actions.
//!
//! Every transition re-checks its precondition under the assignment row
//! guard ([`mutate_assignment`]), so two concurrent calls for the same
//! transition cannot both succeed.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::bidding::{OpenWindowOptions, WindowOpening, open_window};
use crate::engine::health::enforce_hard_stop;
use crate::engine::notify::{audit, notify};
use crate::engine::reliability::recompute_driver;
use crate::error::{AppError, Conflict, WindowViolation};
use crate::models::assignment::{Assignment, AssignmentStatus, Cancellation, CancellationKind};
use crate::models::bid::{BidTrigger, BidWindow};
use crate::models::history::{ReliabilityEvent, ReliabilityEventKind};
use crate::models::notification::{Actor, NotificationKind};
use crate::models::shift::Shift;
use crate::state::AppState;

/// Upper bound accepted for any parcel count.
pub const MAX_PARCELS: i64 = 5_000;

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionInput {
    pub parcels_returned: i64,
    #[serde(default)]
    pub exceptions: Option<i64>,
    #[serde(default)]
    pub exception_notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShiftEdit {
    #[serde(default)]
    pub parcels_start: Option<i64>,
    #[serde(default)]
    pub parcels_returned: Option<i64>,
    #[serde(default)]
    pub exceptions: Option<i64>,
    #[serde(default)]
    pub exception_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationOutcome {
    pub assignment: Assignment,
    pub kind: CancellationKind,
    pub window: Option<BidWindow>,
}

/// Applies `apply` to the assignment under its row guard. `apply` must
/// validate before mutating; an error leaves the row untouched.
pub fn mutate_assignment<F>(state: &AppState, id: Uuid, apply: F) -> Result<Assignment, AppError>
where
    F: FnOnce(&mut Assignment) -> Result<(), AppError>,
{
    let now = state.clock.now();
    let mut row = state
        .assignments
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("assignment {id} not found")))?;

    apply(row.value_mut())?;
    row.touch(now);
    Ok(row.clone())
}

pub fn confirmation_opens_at(state: &AppState, assignment: &Assignment) -> Result<DateTime<Utc>, AppError> {
    state.shift_offset(
        assignment,
        -Duration::days(state.policy.confirmation_window_days),
    )
}

pub fn confirmation_deadline(state: &AppState, assignment: &Assignment) -> Result<DateTime<Utc>, AppError> {
    state.shift_offset(
        assignment,
        -Duration::hours(state.policy.confirmation_deadline_hours),
    )
}

/// Daily arrival cut-off. A driver who picked the shift up late gets the
/// emergency window from the moment of assignment instead.
pub fn arrival_deadline(state: &AppState, assignment: &Assignment) -> DateTime<Utc> {
    let base = state
        .clock
        .civil_instant(assignment.date, state.policy.arrival_deadline);

    match assignment.assigned_at {
        Some(assigned_at) => {
            base.max(assigned_at + Duration::minutes(state.policy.emergency_window_minutes))
        }
        None => base,
    }
}

fn ensure_holder(assignment: &Assignment, driver_id: Uuid) -> Result<(), AppError> {
    if assignment.user_id != Some(driver_id) {
        return Err(AppError::Forbidden(format!(
            "assignment {} does not belong to driver {driver_id}",
            assignment.id
        )));
    }
    Ok(())
}

fn invalid_status(expected: AssignmentStatus, actual: AssignmentStatus) -> AppError {
    Conflict::InvalidStatus {
        expected: expected.as_str(),
        actual: actual.as_str(),
    }
    .into()
}

fn parcel_count(field: &str, value: i64) -> Result<u32, AppError> {
    if !(0..=MAX_PARCELS).contains(&value) {
        return Err(AppError::Validation(format!(
            "{field} must be between 0 and {MAX_PARCELS}, got {value}"
        )));
    }
    Ok(value as u32)
}

fn history_event(assignment: &Assignment, driver_id: Uuid, kind: ReliabilityEventKind, at: DateTime<Utc>) -> ReliabilityEvent {
    ReliabilityEvent {
        driver_id,
        assignment_id: assignment.id,
        route_id: assignment.route_id,
        date: assignment.date,
        kind,
        recorded_at: at,
    }
}

pub fn confirm(state: &AppState, assignment_id: Uuid, driver_id: Uuid) -> Result<Assignment, AppError> {
    let current = state.assignment(assignment_id)?;
    ensure_holder(&current, driver_id)?;
    if current.status != AssignmentStatus::Scheduled {
        return Err(invalid_status(AssignmentStatus::Scheduled, current.status));
    }
    if current.confirmed_at.is_some() {
        return Err(Conflict::AlreadyConfirmed.into());
    }

    let now = state.clock.now();
    let opens = confirmation_opens_at(state, &current)?;
    let closes = confirmation_deadline(state, &current)?;
    if now < opens || now > closes {
        return Err(WindowViolation::OutsideConfirmationWindow.into());
    }

    let confirmed = mutate_assignment(state, assignment_id, |row| {
        if row.status != AssignmentStatus::Scheduled || row.user_id != Some(driver_id) {
            return Err(invalid_status(AssignmentStatus::Scheduled, row.status));
        }
        if row.confirmed_at.is_some() {
            return Err(Conflict::AlreadyConfirmed.into());
        }
        row.confirmed_at = Some(now);
        Ok(())
    })?;

    state.record_event(history_event(&confirmed, driver_id, ReliabilityEventKind::Confirmed, now));
    recompute_driver(state, driver_id)?;

    notify(
        state,
        driver_id,
        NotificationKind::AssignmentConfirmed,
        format!("assignment_confirmed:{assignment_id}:{driver_id}"),
        json!({ "assignment_id": assignment_id, "date": confirmed.date, "route_id": confirmed.route_id }),
    );
    state.metrics.transition("confirmed");
    audit(state, "assignment", assignment_id, "confirmed", Actor::Driver(driver_id), Some(&current), Some(&confirmed));
    info!(assignment_id = %assignment_id, driver_id = %driver_id, "assignment confirmed");

    Ok(confirmed)
}

pub fn arrive(state: &AppState, assignment_id: Uuid, driver_id: Uuid) -> Result<Shift, AppError> {
    let current = state.assignment(assignment_id)?;
    ensure_holder(&current, driver_id)?;
    match current.status {
        AssignmentStatus::Scheduled => {}
        AssignmentStatus::Active => return Err(Conflict::AlreadyArrived.into()),
        other => return Err(invalid_status(AssignmentStatus::Scheduled, other)),
    }
    if current.confirmed_at.is_none() {
        return Err(Conflict::NotConfirmed.into());
    }

    let now = state.clock.now();
    if state.clock.local_date(now) != current.date {
        return Err(WindowViolation::NotShiftDay.into());
    }
    if now >= arrival_deadline(state, &current) {
        return Err(WindowViolation::ArrivalDeadlinePassed.into());
    }

    let arrived = mutate_assignment(state, assignment_id, |row| {
        match row.status {
            AssignmentStatus::Scheduled if row.user_id == Some(driver_id) => {}
            AssignmentStatus::Active => return Err(Conflict::AlreadyArrived.into()),
            other => return Err(invalid_status(AssignmentStatus::Scheduled, other)),
        }
        if row.confirmed_at.is_none() {
            return Err(Conflict::NotConfirmed.into());
        }
        row.status = AssignmentStatus::Active;
        Ok(())
    })?;

    let shift = Shift {
        assignment_id,
        driver_id,
        route_id: arrived.route_id,
        arrived_at: now,
        parcels_start: None,
        parcels_returned: None,
        parcels_delivered: None,
        exceptions: 0,
        exception_notes: None,
        started_at: None,
        completed_at: None,
        editable_until: None,
    };
    match state.shifts.entry(assignment_id) {
        Entry::Occupied(_) => return Err(Conflict::AlreadyArrived.into()),
        Entry::Vacant(slot) => {
            slot.insert(shift.clone());
        }
    }

    state.metrics.transition("arrived");
    audit(state, "shift", assignment_id, "arrived", Actor::Driver(driver_id), None, Some(&shift));
    info!(assignment_id = %assignment_id, driver_id = %driver_id, "driver arrived");

    Ok(shift)
}

pub fn record_start(
    state: &AppState,
    assignment_id: Uuid,
    driver_id: Uuid,
    parcels_start: i64,
) -> Result<Shift, AppError> {
    let parcels = parcel_count("parcels_start", parcels_start)?;
    let current = state.assignment(assignment_id)?;
    ensure_holder(&current, driver_id)?;
    if current.status != AssignmentStatus::Active {
        return Err(Conflict::NotArrived.into());
    }

    let now = state.clock.now();
    let shift = {
        let mut shift = state
            .shifts
            .get_mut(&assignment_id)
            .ok_or(AppError::Conflict(Conflict::NotArrived))?;
        if shift.parcels_start.is_some() {
            return Err(Conflict::AlreadyStarted.into());
        }
        shift.parcels_start = Some(parcels);
        shift.started_at = Some(now);
        shift.clone()
    };

    state.metrics.transition("started");
    info!(assignment_id = %assignment_id, driver_id = %driver_id, parcels_start = parcels, "shift started");

    Ok(shift)
}

pub fn complete(
    state: &AppState,
    assignment_id: Uuid,
    driver_id: Uuid,
    input: CompletionInput,
) -> Result<Shift, AppError> {
    let returned = parcel_count("parcels_returned", input.parcels_returned)?;
    let exceptions = parcel_count("exceptions", input.exceptions.unwrap_or(0))?;

    let current = state.assignment(assignment_id)?;
    ensure_holder(&current, driver_id)?;
    match current.status {
        AssignmentStatus::Active => {}
        AssignmentStatus::Completed => return Err(Conflict::AlreadyCompleted.into()),
        _ => return Err(Conflict::NotArrived.into()),
    }

    let snapshot = state
        .shifts
        .get(&assignment_id)
        .map(|entry| entry.value().clone())
        .ok_or(AppError::Conflict(Conflict::NotArrived))?;
    let Some(start) = snapshot.parcels_start else {
        return Err(Conflict::NotStarted.into());
    };
    if snapshot.completed_at.is_some() {
        return Err(Conflict::AlreadyCompleted.into());
    }
    if returned > start {
        return Err(AppError::ReturnsExceedStart { start, returned });
    }

    let now = state.clock.now();
    let completed = mutate_assignment(state, assignment_id, |row| {
        match row.status {
            AssignmentStatus::Active => {}
            AssignmentStatus::Completed => return Err(Conflict::AlreadyCompleted.into()),
            other => return Err(invalid_status(AssignmentStatus::Active, other)),
        }
        row.status = AssignmentStatus::Completed;
        Ok(())
    })?;

    let shift = {
        let mut shift = state
            .shifts
            .get_mut(&assignment_id)
            .ok_or(AppError::Conflict(Conflict::NotArrived))?;
        shift.parcels_returned = Some(returned);
        shift.parcels_delivered = Some(start - returned);
        shift.exceptions = exceptions;
        shift.exception_notes = input.exception_notes;
        shift.completed_at = Some(now);
        shift.editable_until = Some(now + Duration::minutes(state.policy.edit_window_minutes));
        shift.clone()
    };

    state.record_event(history_event(&completed, driver_id, ReliabilityEventKind::Completed, now));
    recompute_driver(state, driver_id)?;

    state.metrics.transition("completed");
    audit(state, "shift", assignment_id, "completed", Actor::Driver(driver_id), Some(&snapshot), Some(&shift));
    info!(
        assignment_id = %assignment_id,
        driver_id = %driver_id,
        delivered = start - returned,
        returned,
        "shift completed"
    );

    Ok(shift)
}

pub fn edit_shift(
    state: &AppState,
    assignment_id: Uuid,
    driver_id: Uuid,
    edit: ShiftEdit,
) -> Result<Shift, AppError> {
    let new_start = edit
        .parcels_start
        .map(|value| parcel_count("parcels_start", value))
        .transpose()?;
    let new_returned = edit
        .parcels_returned
        .map(|value| parcel_count("parcels_returned", value))
        .transpose()?;
    let new_exceptions = edit
        .exceptions
        .map(|value| parcel_count("exceptions", value))
        .transpose()?;

    let current = state.assignment(assignment_id)?;
    ensure_holder(&current, driver_id)?;

    let now = state.clock.now();
    let (before, after) = {
        let mut shift = state
            .shifts
            .get_mut(&assignment_id)
            .ok_or(AppError::Conflict(Conflict::NotCompleted))?;
        let Some(editable_until) = shift.editable_until else {
            return Err(Conflict::NotCompleted.into());
        };
        if now >= editable_until {
            return Err(WindowViolation::EditWindowExpired.into());
        }

        let start = new_start.or(shift.parcels_start).unwrap_or(0);
        let returned = new_returned.or(shift.parcels_returned).unwrap_or(0);
        if returned > start {
            return Err(AppError::ReturnsExceedStart { start, returned });
        }

        let before = shift.clone();
        shift.parcels_start = Some(start);
        shift.parcels_returned = Some(returned);
        shift.parcels_delivered = Some(start - returned);
        if let Some(exceptions) = new_exceptions {
            shift.exceptions = exceptions;
        }
        if edit.exception_notes.is_some() {
            shift.exception_notes = edit.exception_notes;
        }
        (before, shift.clone())
    };

    recompute_driver(state, driver_id)?;

    state.metrics.transition("shift_edited");
    audit(state, "shift", assignment_id, "edited", Actor::Driver(driver_id), Some(&before), Some(&after));
    info!(assignment_id = %assignment_id, driver_id = %driver_id, "completed shift edited");

    Ok(after)
}

/// Driver gives up a scheduled assignment before it starts. The assignment
/// becomes unfilled and a replacement window opens.
pub fn cancel(
    state: &AppState,
    assignment_id: Uuid,
    driver_id: Uuid,
    reason: Option<String>,
) -> Result<CancellationOutcome, AppError> {
    let current = state.assignment(assignment_id)?;
    ensure_holder(&current, driver_id)?;
    match current.status {
        AssignmentStatus::Scheduled => {}
        AssignmentStatus::Active | AssignmentStatus::Completed => {
            return Err(Conflict::CancellationAfterStart.into());
        }
        other => return Err(invalid_status(AssignmentStatus::Scheduled, other)),
    }

    let now = state.clock.now();
    let shift_start = state.shift_start(&current)?;
    if now >= shift_start {
        return Err(Conflict::CancellationAfterStart.into());
    }

    let late_boundary = state.shift_offset(
        &current,
        -Duration::hours(state.policy.late_cancellation_hours),
    )?;
    let kind = if now < late_boundary {
        CancellationKind::DriverEarly
    } else {
        CancellationKind::DriverLate
    };

    let cancelled = mutate_assignment(state, assignment_id, |row| {
        if row.status != AssignmentStatus::Scheduled || row.user_id != Some(driver_id) {
            return Err(invalid_status(AssignmentStatus::Scheduled, row.status));
        }
        row.cancellation = Some(Cancellation {
            kind,
            driver_id,
            at: now,
            reason: reason.clone(),
        });
        row.release();
        Ok(())
    })?;

    let event_kind = match kind {
        CancellationKind::DriverEarly => ReliabilityEventKind::EarlyCancellation,
        _ => ReliabilityEventKind::LateCancellation,
    };
    state.record_event(history_event(&current, driver_id, event_kind, now));
    recompute_driver(state, driver_id)?;
    if kind == CancellationKind::DriverLate {
        enforce_hard_stop(state, driver_id)?;
    }

    if let Some(manager_id) = state.route(current.route_id)?.manager_id {
        notify(
            state,
            manager_id,
            NotificationKind::ShiftCancelled,
            format!("shift_cancelled:{assignment_id}:{driver_id}:{}", now.timestamp()),
            json!({
                "assignment_id": assignment_id,
                "driver_id": driver_id,
                "date": current.date,
                "kind": kind,
                "reason": reason,
            }),
        );
    }

    state.metrics.transition(match kind {
        CancellationKind::DriverEarly => "cancelled_early",
        _ => "cancelled_late",
    });
    audit(state, "assignment", assignment_id, "cancelled", Actor::Driver(driver_id), Some(&current), Some(&cancelled));
    info!(assignment_id = %assignment_id, driver_id = %driver_id, kind = ?kind, "assignment cancelled by driver");

    let window = match open_window(
        state,
        assignment_id,
        BidTrigger::Cancellation,
        OpenWindowOptions {
            exclude_driver: Some(driver_id),
            ..OpenWindowOptions::default()
        },
    ) {
        Ok(WindowOpening::Opened(window) | WindowOpening::Existing(window)) => Some(window),
        Err(err) => {
            warn!(assignment_id = %assignment_id, error = %err, "failed to open replacement window");
            None
        }
    };

    Ok(CancellationOutcome {
        assignment: cancelled,
        kind,
        window,
    })
}
