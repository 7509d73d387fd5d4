//! Driver reliability state.
//!
//! Metrics are never incremented in place. [`recompute_driver`] rebuilds them
//! from the reliability ledger and shift records and is the only writer of
//! `Driver::metrics`, so concurrent triggers converge on the same values.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DispatchPolicy;
use crate::engine::notify::notify;
use crate::error::AppError;
use crate::models::driver::{Driver, ReliabilityMetrics};
use crate::models::history::{ReliabilityEvent, ReliabilityEventKind};
use crate::models::notification::NotificationKind;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub enum FlagTransition {
    Flagged { attendance_rate: f64, threshold: f64 },
    CapReduced { from: u8, to: u8 },
    Unflagged,
    CapRaised { from: u8, to: u8 },
}

/// The subset of a driver the flag policy reads and writes.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagState {
    pub flagged: bool,
    pub warning_at: Option<DateTime<Utc>>,
    pub cap_reduced: bool,
    pub weekly_cap: u8,
    pub cap_overridden: bool,
    pub cleared_at: Option<DateTime<Utc>>,
}

impl FlagState {
    pub fn of(driver: &Driver) -> Self {
        Self {
            flagged: driver.flagged,
            warning_at: driver.flag_warning_at,
            cap_reduced: driver.flag_cap_reduced,
            weekly_cap: driver.weekly_cap,
            cap_overridden: driver.cap_overridden,
            cleared_at: driver.flag_cleared_at,
        }
    }

    fn apply_to(&self, driver: &mut Driver) {
        driver.flagged = self.flagged;
        driver.flag_warning_at = self.warning_at;
        driver.flag_cap_reduced = self.cap_reduced;
        driver.weekly_cap = self.weekly_cap;
    }
}

#[derive(Debug, Clone, Default)]
pub struct DerivedMetrics {
    pub metrics: ReliabilityMetrics,
    pub route_completions: HashMap<Uuid, u32>,
    /// Most recent late cancellation or no-show.
    pub last_negative_at: Option<DateTime<Utc>>,
}

pub fn attendance_threshold(total_shifts: u32, policy: &DispatchPolicy) -> f64 {
    if total_shifts < policy.new_driver_shift_floor {
        policy.new_driver_attendance_threshold
    } else {
        policy.attendance_threshold
    }
}

pub fn below_threshold(metrics: &ReliabilityMetrics, policy: &DispatchPolicy) -> bool {
    metrics.total_shifts > 0
        && metrics.attendance_rate < attendance_threshold(metrics.total_shifts, policy)
}

/// Builds metrics from ledger rows and recent completion ratios (newest first, already truncated).
pub fn derive_metrics(events: &[ReliabilityEvent], completion_ratios: &[f64]) -> DerivedMetrics {
    let mut derived = DerivedMetrics::default();
    let metrics = &mut derived.metrics;

    for event in events {
        match event.kind {
            ReliabilityEventKind::Confirmed => metrics.confirmed_shifts += 1,
            ReliabilityEventKind::Completed => {
                metrics.completed_shifts += 1;
                *derived.route_completions.entry(event.route_id).or_insert(0) += 1;
            }
            ReliabilityEventKind::EarlyCancellation => metrics.early_cancellations += 1,
            ReliabilityEventKind::LateCancellation => metrics.late_cancellations += 1,
            ReliabilityEventKind::NoShow => metrics.no_shows += 1,
            ReliabilityEventKind::AutoDropped => metrics.auto_dropped_shifts += 1,
        }

        if matches!(
            event.kind,
            ReliabilityEventKind::LateCancellation | ReliabilityEventKind::NoShow
        ) {
            derived.last_negative_at = derived.last_negative_at.max(Some(event.recorded_at));
        }
    }

    metrics.total_shifts = metrics.completed_shifts + metrics.late_cancellations + metrics.no_shows;
    metrics.attendance_rate = ratio(metrics.completed_shifts, metrics.total_shifts);
    metrics.completion_rate = if completion_ratios.is_empty() {
        0.0
    } else {
        completion_ratios.iter().sum::<f64>() / completion_ratios.len() as f64
    };

    derived
}

/// Pure flag/cap policy step.
pub fn next_flag_state(
    current: &FlagState,
    metrics: &ReliabilityMetrics,
    last_negative_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    policy: &DispatchPolicy,
) -> (FlagState, Vec<FlagTransition>) {
    let mut next = current.clone();
    let mut transitions = Vec::new();
    let below = below_threshold(metrics, policy);

    if !next.flagged {
        // a manager clear holds until the driver records a new late cancel or no-show
        let suppressed = match (next.cleared_at, last_negative_at) {
            (Some(cleared), Some(negative)) => negative <= cleared,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if below && !suppressed {
            next.flagged = true;
            next.warning_at = Some(now);
            next.cap_reduced = false;
            transitions.push(FlagTransition::Flagged {
                attendance_rate: metrics.attendance_rate,
                threshold: attendance_threshold(metrics.total_shifts, policy),
            });
        }
    } else if !below {
        next.flagged = false;
        next.warning_at = None;
        next.cap_reduced = false;
        transitions.push(FlagTransition::Unflagged);
    } else if !next.cap_reduced {
        let grace_over = next
            .warning_at
            .map(|warned| now >= warned + Duration::days(policy.flag_grace_days))
            .unwrap_or(true);

        if grace_over {
            next.cap_reduced = true;
            if !next.cap_overridden {
                let from = next.weekly_cap;
                next.weekly_cap = from.saturating_sub(1).max(1);
                transitions.push(FlagTransition::CapReduced {
                    from,
                    to: next.weekly_cap,
                });
            }
        }
    }

    let rewarded = !next.flagged
        && !next.cap_overridden
        && metrics.total_shifts > 0
        && metrics.confirmed_shifts >= policy.reward_min_confirmed
        && metrics.attendance_rate >= policy.reward_min_attendance
        && next.weekly_cap < policy.max_weekly_cap;

    if rewarded {
        let from = next.weekly_cap;
        next.weekly_cap = policy.max_weekly_cap;
        transitions.push(FlagTransition::CapRaised {
            from,
            to: next.weekly_cap,
        });
    }

    (next, transitions)
}

/// Rebuilds a driver's metrics from source history and applies the flag policy.
pub fn recompute_driver(state: &AppState, driver_id: Uuid) -> Result<Vec<FlagTransition>, AppError> {
    let events = state.driver_events(driver_id);

    let mut completions: Vec<(DateTime<Utc>, f64)> = state
        .shifts
        .iter()
        .filter(|entry| entry.value().driver_id == driver_id)
        .filter_map(|entry| {
            let shift = entry.value();
            Some((shift.completed_at?, shift.completion_ratio()?))
        })
        .collect();
    completions.sort_by(|a, b| b.0.cmp(&a.0));
    let ratios: Vec<f64> = completions
        .into_iter()
        .take(state.policy.completion_lookback_shifts)
        .map(|(_, ratio)| ratio)
        .collect();

    let derived = derive_metrics(&events, &ratios);
    let now = state.clock.now();

    let transitions = {
        let mut driver = state
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

        let (next, transitions) = next_flag_state(
            &FlagState::of(&driver),
            &derived.metrics,
            derived.last_negative_at,
            now,
            &state.policy,
        );

        driver.metrics = derived.metrics;
        driver.route_completions = derived.route_completions;
        next.apply_to(&mut driver);
        driver.updated_at = now;
        transitions
    };

    for transition in &transitions {
        match transition {
            FlagTransition::Flagged {
                attendance_rate,
                threshold,
            } => {
                warn!(driver_id = %driver_id, attendance_rate, threshold, "driver flagged");
                notify(
                    state,
                    driver_id,
                    NotificationKind::Warning,
                    format!("warning:flagged:{driver_id}:{}", now.timestamp()),
                    json!({
                        "reason": "attendance_below_threshold",
                        "attendance_rate": attendance_rate,
                        "threshold": threshold,
                        "grace_days": state.policy.flag_grace_days,
                    }),
                );
            }
            FlagTransition::CapReduced { from, to } => {
                warn!(driver_id = %driver_id, from, to, "weekly cap reduced after grace period");
                notify(
                    state,
                    driver_id,
                    NotificationKind::Warning,
                    format!("warning:cap_reduced:{driver_id}:{}", now.timestamp()),
                    json!({ "reason": "weekly_cap_reduced", "from": from, "to": to }),
                );
            }
            FlagTransition::Unflagged => {
                info!(driver_id = %driver_id, "driver flag cleared by recovered attendance");
            }
            FlagTransition::CapRaised { from, to } => {
                info!(driver_id = %driver_id, from, to, "weekly cap raised for reliability");
            }
        }
    }

    Ok(transitions)
}

fn ratio(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
