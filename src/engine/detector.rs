//! Time-driven sweeps over scheduled assignments: confirmation reminders,
//! auto-drop of unconfirmed work and no-show detection.

use chrono::Duration;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::bidding::{OpenWindowOptions, WindowOpening, open_window};
use crate::engine::health::enforce_hard_stop;
use crate::engine::jobs::{JobKind, JobReport};
use crate::engine::lifecycle::{arrival_deadline, confirmation_deadline, confirmation_opens_at, mutate_assignment};
use crate::engine::notify::{audit, notify};
use crate::engine::reliability::recompute_driver;
use crate::error::{AppError, Conflict};
use crate::models::assignment::{Assignment, AssignmentStatus, Cancellation, CancellationKind};
use crate::models::bid::BidTrigger;
use crate::models::history::{ReliabilityEvent, ReliabilityEventKind};
use crate::models::notification::{Actor, NotificationKind};
use crate::state::AppState;

fn scheduled_assignments(state: &AppState) -> Vec<Assignment> {
    state
        .assignments
        .iter()
        .filter(|entry| {
            entry.value().status == AssignmentStatus::Scheduled && entry.value().user_id.is_some()
        })
        .map(|entry| entry.value().clone())
        .collect()
}

fn tally_window(report: &mut JobReport, opened: Result<WindowOpening, AppError>, assignment_id: Uuid) {
    match opened {
        Ok(WindowOpening::Opened(_)) => report.created += 1,
        Ok(WindowOpening::Existing(_)) => {}
        Err(err) => {
            report.errors += 1;
            warn!(assignment_id = %assignment_id, error = %err, "failed to open replacement window");
        }
    }
}

/// Releases scheduled assignments nobody confirmed before the deadline.
pub fn auto_drop_unconfirmed(state: &AppState) -> JobReport {
    let mut report = JobReport::new(JobKind::AutoDropUnconfirmed);
    let now = state.clock.now();

    for assignment in scheduled_assignments(state) {
        if assignment.confirmed_at.is_some() {
            continue;
        }
        report.examined += 1;

        let deadline = match confirmation_deadline(state, &assignment) {
            Ok(deadline) => deadline,
            Err(err) => {
                report.errors += 1;
                warn!(assignment_id = %assignment.id, error = %err, "cannot compute confirmation deadline");
                continue;
            }
        };
        if now <= deadline {
            continue;
        }
        let Some(driver_id) = assignment.user_id else {
            continue;
        };

        let dropped = mutate_assignment(state, assignment.id, |row| {
            if row.status != AssignmentStatus::Scheduled
                || row.user_id != Some(driver_id)
                || row.confirmed_at.is_some()
            {
                return Err(Conflict::InvalidStatus {
                    expected: AssignmentStatus::Scheduled.as_str(),
                    actual: row.status.as_str(),
                }
                .into());
            }
            row.release();
            Ok(())
        });
        let dropped = match dropped {
            Ok(dropped) => dropped,
            Err(AppError::Conflict(_)) => {
                report.skipped += 1;
                continue;
            }
            Err(err) => {
                report.errors += 1;
                warn!(assignment_id = %assignment.id, error = %err, "auto-drop failed");
                continue;
            }
        };
        report.transitioned += 1;

        state.record_event(ReliabilityEvent {
            driver_id,
            assignment_id: assignment.id,
            route_id: assignment.route_id,
            date: assignment.date,
            kind: ReliabilityEventKind::AutoDropped,
            recorded_at: now,
        });
        if let Err(err) = recompute_driver(state, driver_id) {
            report.errors += 1;
            warn!(driver_id = %driver_id, error = %err, "failed to recompute after auto-drop");
        }

        if notify(
            state,
            driver_id,
            NotificationKind::ShiftAutoDropped,
            format!("shift_auto_dropped:{}:{driver_id}", assignment.id),
            json!({
                "assignment_id": assignment.id,
                "route_id": assignment.route_id,
                "date": assignment.date,
                "deadline": deadline,
            }),
        ) {
            report.notified += 1;
        }

        state.metrics.transition("auto_dropped");
        audit(state, "assignment", assignment.id, "auto_dropped", Actor::System, Some(&assignment), Some(&dropped));
        info!(assignment_id = %assignment.id, driver_id = %driver_id, "unconfirmed assignment auto-dropped");

        let opened = open_window(
            state,
            assignment.id,
            BidTrigger::AutoDrop,
            OpenWindowOptions {
                exclude_driver: Some(driver_id),
                ..OpenWindowOptions::default()
            },
        );
        tally_window(&mut report, opened, assignment.id);
    }

    report
}

/// Nudges drivers whose confirmation deadline is near, and reminds confirmed
/// drivers the day before their shift.
pub fn send_confirmation_reminders(state: &AppState) -> JobReport {
    let mut report = JobReport::new(JobKind::SendConfirmationReminders);
    let now = state.clock.now();
    let tomorrow = state.clock.add_days(state.clock.today(), 1);
    let lead = Duration::hours(state.policy.confirmation_reminder_lead_hours);

    for assignment in scheduled_assignments(state) {
        let Some(driver_id) = assignment.user_id else {
            continue;
        };
        report.examined += 1;

        if assignment.confirmed_at.is_some() {
            if assignment.date != tomorrow {
                continue;
            }
            let start = match state.shift_start(&assignment) {
                Ok(start) => start,
                Err(err) => {
                    report.errors += 1;
                    warn!(assignment_id = %assignment.id, error = %err, "cannot compute shift start");
                    continue;
                }
            };
            if notify(
                state,
                driver_id,
                NotificationKind::ShiftReminder,
                format!("shift_reminder:{}:{}:{driver_id}", assignment.id, assignment.date),
                json!({
                    "assignment_id": assignment.id,
                    "route_id": assignment.route_id,
                    "date": assignment.date,
                    "starts_at": start,
                }),
            ) {
                report.notified += 1;
            } else {
                report.skipped += 1;
            }
            continue;
        }

        let (opens, deadline) = match (
            confirmation_opens_at(state, &assignment),
            confirmation_deadline(state, &assignment),
        ) {
            (Ok(opens), Ok(deadline)) => (opens, deadline),
            (Err(err), _) | (_, Err(err)) => {
                report.errors += 1;
                warn!(assignment_id = %assignment.id, error = %err, "cannot compute confirmation window");
                continue;
            }
        };
        let remind_from = opens.max(deadline - lead);
        if now < remind_from || now > deadline {
            continue;
        }

        if notify(
            state,
            driver_id,
            NotificationKind::ConfirmationReminder,
            format!(
                "confirmation_reminder:{}:{}:{driver_id}",
                assignment.id, assignment.date
            ),
            json!({
                "assignment_id": assignment.id,
                "route_id": assignment.route_id,
                "date": assignment.date,
                "deadline": deadline,
            }),
        ) {
            report.notified += 1;
        } else {
            report.skipped += 1;
        }
    }

    report
}

/// Confirmed drivers who never arrived by the deadline. Each hit is recorded,
/// the route manager is told, and same-day work goes to an emergency window.
pub fn detect_no_shows(state: &AppState) -> JobReport {
    let mut report = JobReport::new(JobKind::NoShowDetection);
    let now = state.clock.now();
    let today = state.clock.today();

    for assignment in scheduled_assignments(state) {
        if assignment.confirmed_at.is_none() || assignment.date > today {
            continue;
        }
        let Some(driver_id) = assignment.user_id else {
            continue;
        };
        report.examined += 1;

        if now < arrival_deadline(state, &assignment) || state.shifts.contains_key(&assignment.id) {
            continue;
        }

        let released = mutate_assignment(state, assignment.id, |row| {
            if row.status != AssignmentStatus::Scheduled || row.user_id != Some(driver_id) {
                return Err(Conflict::InvalidStatus {
                    expected: AssignmentStatus::Scheduled.as_str(),
                    actual: row.status.as_str(),
                }
                .into());
            }
            row.cancellation = Some(Cancellation {
                kind: CancellationKind::NoShow,
                driver_id,
                at: now,
                reason: None,
            });
            row.release();
            Ok(())
        });
        let released = match released {
            Ok(released) => released,
            Err(AppError::Conflict(_)) => {
                report.skipped += 1;
                continue;
            }
            Err(err) => {
                report.errors += 1;
                warn!(assignment_id = %assignment.id, error = %err, "no-show transition failed");
                continue;
            }
        };
        report.transitioned += 1;

        state.record_event(ReliabilityEvent {
            driver_id,
            assignment_id: assignment.id,
            route_id: assignment.route_id,
            date: assignment.date,
            kind: ReliabilityEventKind::NoShow,
            recorded_at: now,
        });
        if let Err(err) = recompute_driver(state, driver_id) {
            report.errors += 1;
            warn!(driver_id = %driver_id, error = %err, "failed to recompute after no-show");
        }
        if let Err(err) = enforce_hard_stop(state, driver_id) {
            report.errors += 1;
            warn!(driver_id = %driver_id, error = %err, "failed to evaluate hard stop");
        }

        let manager_id = state
            .route(assignment.route_id)
            .ok()
            .and_then(|route| route.manager_id);
        match manager_id {
            Some(manager_id) => {
                if notify(
                    state,
                    manager_id,
                    NotificationKind::DriverNoShow,
                    format!("driver_no_show:{}:{}", assignment.id, assignment.date),
                    json!({
                        "assignment_id": assignment.id,
                        "driver_id": driver_id,
                        "route_id": assignment.route_id,
                        "date": assignment.date,
                    }),
                ) {
                    report.notified += 1;
                }
            }
            None => warn!(route_id = %assignment.route_id, "no manager to notify about no-show"),
        }

        state.metrics.transition("no_show");
        audit(state, "assignment", assignment.id, "no_show", Actor::System, Some(&assignment), Some(&released));
        warn!(assignment_id = %assignment.id, driver_id = %driver_id, date = %assignment.date, "driver no-show recorded");

        if assignment.date == today {
            let opened = open_window(
                state,
                assignment.id,
                BidTrigger::NoShow,
                OpenWindowOptions {
                    exclude_driver: Some(driver_id),
                    ..OpenWindowOptions::default()
                },
            );
            tally_window(&mut report, opened, assignment.id);
        }
    }

    report
}
