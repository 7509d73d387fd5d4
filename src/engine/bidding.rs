//! Bid windows for unfilled assignments.
//!
//! A window is competitive when the shift is far enough out; bids queue and
//! the highest score wins at close. Instant and emergency windows are
//! first-accept: the winning claim is a compare-and-set on the window row
//! (`open -> resolved`) taken under the row guard, so concurrent accepts
//! cannot both succeed.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DispatchPolicy;
use crate::engine::jobs::{JobKind, JobReport};
use crate::engine::lifecycle::mutate_assignment;
use crate::engine::notify::{audit, notify, notify_many};
use crate::engine::reliability::recompute_driver;
use crate::engine::scoring::{compare_bids, compute_score};
use crate::error::{AppError, Conflict, WindowViolation};
use crate::models::assignment::{AssignedBy, Assignment, AssignmentStatus, CancellationKind};
use crate::models::bid::{Bid, BidMode, BidStatus, BidTrigger, BidWindow, WindowStatus};
use crate::models::driver::Driver;
use crate::models::history::{ReliabilityEvent, ReliabilityEventKind};
use crate::models::notification::{Actor, NotificationKind};
use crate::state::AppState;

#[derive(Debug, Clone, Default)]
pub struct OpenWindowOptions {
    pub pay_bonus_pct: Option<u8>,
    /// Driver who just gave the assignment up; not invited back.
    pub exclude_driver: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub enum WindowOpening {
    Opened(BidWindow),
    Existing(BidWindow),
}

impl WindowOpening {
    pub fn window(&self) -> &BidWindow {
        match self {
            WindowOpening::Opened(window) | WindowOpening::Existing(window) => window,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BidReceipt {
    Queued { bid: Bid },
    Won { bid: Bid, assignment: Assignment },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredBid {
    pub bid_id: Uuid,
    pub driver_id: Uuid,
    pub bid_at: DateTime<Utc>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Ranked best first.
    Award(Vec<ScoredBid>),
    SwitchToInstant,
    CloseUnfilled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Awarded { driver_id: Uuid },
    SwitchedToInstant,
    ClosedUnfilled,
    StillOpen,
    AlreadySettled,
}

pub fn select_mode(trigger: BidTrigger, until_start: Duration, policy: &DispatchPolicy) -> BidMode {
    match trigger {
        BidTrigger::NoShow | BidTrigger::Manager => BidMode::Emergency,
        _ if until_start > Duration::hours(policy.instant_mode_threshold_hours) => {
            BidMode::Competitive
        }
        _ => BidMode::Instant,
    }
}

/// Resolution rule per mode.
pub fn decide(mode: BidMode, mut bids: Vec<ScoredBid>) -> Decision {
    match mode {
        BidMode::Competitive if bids.is_empty() => Decision::SwitchToInstant,
        BidMode::Competitive => {
            bids.sort_by(|a, b| compare_bids((a.score, a.bid_at), (b.score, b.bid_at)));
            Decision::Award(bids)
        }
        BidMode::Instant | BidMode::Emergency => Decision::CloseUnfilled,
    }
}

fn close_time(
    state: &AppState,
    assignment: &Assignment,
    mode: BidMode,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, AppError> {
    let policy = &state.policy;
    let shift_start = state.shift_start(assignment)?;

    Ok(match mode {
        BidMode::Competitive => state.shift_offset(
            assignment,
            -Duration::hours(policy.instant_mode_threshold_hours),
        )?,
        BidMode::Instant => shift_start,
        BidMode::Emergency => {
            shift_start.max(now + Duration::minutes(policy.emergency_window_minutes))
        }
    })
}

/// Opens a window for an unfilled assignment. If one is already open it is
/// returned untouched and nobody is notified again.
pub fn open_window(
    state: &AppState,
    assignment_id: Uuid,
    trigger: BidTrigger,
    options: OpenWindowOptions,
) -> Result<WindowOpening, AppError> {
    let assignment = state.assignment(assignment_id)?;
    if assignment.status != AssignmentStatus::Unfilled || assignment.user_id.is_some() {
        return Err(Conflict::InvalidStatus {
            expected: AssignmentStatus::Unfilled.as_str(),
            actual: assignment.status.as_str(),
        }
        .into());
    }

    let now = state.clock.now();
    let shift_start = state.shift_start(&assignment)?;
    let mode = select_mode(trigger, shift_start - now, &state.policy);
    let closes_at = close_time(state, &assignment, mode, now)?;
    let pay_bonus_pct = match mode {
        BidMode::Emergency => Some(
            options
                .pay_bonus_pct
                .unwrap_or(state.policy.emergency_bonus_pct),
        ),
        _ => options.pay_bonus_pct,
    };

    let window = match state.open_windows.entry(assignment_id) {
        Entry::Occupied(existing) => {
            let window = state.bid_window(*existing.get())?;
            debug!(assignment_id = %assignment_id, window_id = %window.id, "bid window already open");
            return Ok(WindowOpening::Existing(window));
        }
        Entry::Vacant(slot) => {
            let window = BidWindow {
                id: Uuid::new_v4(),
                assignment_id,
                mode,
                trigger,
                opens_at: now,
                closes_at,
                pay_bonus_pct,
                status: WindowStatus::Open,
                winner_id: None,
                resolved_at: None,
            };
            state.bid_windows.insert(window.id, window.clone());
            slot.insert(window.id);
            window
        }
    };

    state.metrics.open_bid_windows.inc();
    state.metrics.transition("bid_window_opened");
    audit(
        state,
        "bid_window",
        window.id,
        "opened",
        Actor::System,
        None,
        Some(&window),
    );

    let invited = notify_bidders(state, &window, &assignment, options.exclude_driver, "open");
    info!(
        assignment_id = %assignment_id,
        window_id = %window.id,
        mode = window.mode.as_str(),
        closes_at = %window.closes_at,
        invited,
        "bid window opened"
    );

    Ok(WindowOpening::Opened(window))
}

/// Every reliability-eligible driver with room under their cap that day.
pub fn eligible_bidders(
    state: &AppState,
    assignment: &Assignment,
    exclude: Option<Uuid>,
) -> Vec<Uuid> {
    let drivers: Vec<Driver> = state
        .drivers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    drivers
        .into_iter()
        .filter(|driver| Some(driver.id) != exclude && driver.is_eligible())
        .filter(|driver| {
            state.weekly_load(driver.id, assignment.date) < usize::from(driver.weekly_cap)
                && !state.works_on(driver.id, assignment.date)
        })
        .map(|driver| driver.id)
        .collect()
}

pub(crate) fn notify_bidders(
    state: &AppState,
    window: &BidWindow,
    assignment: &Assignment,
    exclude: Option<Uuid>,
    round: &str,
) -> usize {
    let kind = match window.mode {
        BidMode::Emergency => NotificationKind::EmergencyRouteAvailable,
        BidMode::Competitive | BidMode::Instant => NotificationKind::BidOpen,
    };
    let recipients = eligible_bidders(state, assignment, exclude);

    notify_many(
        state,
        &recipients,
        kind,
        &format!("{}:{}:{round}", kind.as_str(), window.id),
        json!({
            "window_id": window.id,
            "assignment_id": assignment.id,
            "route_id": assignment.route_id,
            "date": assignment.date,
            "mode": window.mode,
            "closes_at": window.closes_at,
            "pay_bonus_pct": window.pay_bonus_pct,
        }),
    )
}

/// Re-checks a bidder at the moment of submission or award.
fn check_bidder(state: &AppState, driver_id: Uuid, assignment: &Assignment) -> Result<Driver, AppError> {
    let driver = state.driver(driver_id)?;

    if !driver.is_eligible() {
        return Err(Conflict::DriverIneligible.into());
    }
    if state.works_on(driver_id, assignment.date) {
        return Err(Conflict::DoubleBooked.into());
    }
    if state.weekly_load(driver_id, assignment.date) >= usize::from(driver.weekly_cap) {
        return Err(Conflict::WeeklyCapReached.into());
    }

    Ok(driver)
}

pub fn submit_bid(state: &AppState, window_id: Uuid, driver_id: Uuid) -> Result<BidReceipt, AppError> {
    let window = state.bid_window(window_id)?;
    if window.status != WindowStatus::Open {
        return Err(if window.mode.is_first_accept() && window.winner_id.is_some() {
            AppError::AlreadyAssigned
        } else {
            Conflict::WindowNotOpen.into()
        });
    }

    let now = state.clock.now();
    if now >= window.closes_at {
        return Err(WindowViolation::BidWindowClosed.into());
    }

    let assignment = state.assignment(window.assignment_id)?;

    let gate = state.driver_gate(driver_id);
    let _held = gate
        .lock()
        .map_err(|_| AppError::Internal("driver gate poisoned".to_string()))?;

    check_bidder(state, driver_id, &assignment)?;

    if window.mode.is_first_accept() {
        let assignment = match claim(state, &window, driver_id, AssignedBy::Bid, now) {
            Ok(assignment) => assignment,
            Err(err) => {
                if err == AppError::AlreadyAssigned {
                    state
                        .metrics
                        .bids_total
                        .with_label_values(&[window.mode.as_str(), "race_lost"])
                        .inc();
                }
                return Err(err);
            }
        };

        let bid = Bid {
            id: Uuid::new_v4(),
            window_id,
            assignment_id: assignment.id,
            driver_id,
            bid_at: now,
            score: None,
            score_breakdown: None,
            status: BidStatus::Won,
            resolved_at: Some(now),
        };
        state.bid_index.insert((window_id, driver_id), bid.id);
        state.bids.insert(bid.id, bid.clone());

        state
            .metrics
            .bids_total
            .with_label_values(&[window.mode.as_str(), "won"])
            .inc();
        finish_award(state, &window, &assignment, driver_id, now);

        return Ok(BidReceipt::Won { bid, assignment });
    }

    let bid = match state.bid_index.entry((window_id, driver_id)) {
        Entry::Occupied(_) => return Err(Conflict::AlreadyBid.into()),
        Entry::Vacant(slot) => {
            let bid = Bid {
                id: Uuid::new_v4(),
                window_id,
                assignment_id: assignment.id,
                driver_id,
                bid_at: now,
                score: None,
                score_breakdown: None,
                status: BidStatus::Pending,
                resolved_at: None,
            };
            state.bids.insert(bid.id, bid.clone());
            slot.insert(bid.id);
            bid
        }
    };

    state
        .metrics
        .bids_total
        .with_label_values(&[window.mode.as_str(), "queued"])
        .inc();
    info!(window_id = %window_id, driver_id = %driver_id, "competitive bid queued");

    Ok(BidReceipt::Queued { bid })
}

/// Atomic claim: only the caller that flips the window from open wins.
fn claim(
    state: &AppState,
    window: &BidWindow,
    driver_id: Uuid,
    assigned_by: AssignedBy,
    now: DateTime<Utc>,
) -> Result<Assignment, AppError> {
    {
        let mut row = state
            .bid_windows
            .get_mut(&window.id)
            .ok_or_else(|| AppError::NotFound(format!("bid window {} not found", window.id)))?;
        if row.status != WindowStatus::Open {
            return Err(AppError::AlreadyAssigned);
        }
        row.status = WindowStatus::Resolved;
        row.winner_id = Some(driver_id);
        row.resolved_at = Some(now);
    }

    state
        .open_windows
        .remove_if(&window.assignment_id, |_, open| *open == window.id);
    state.metrics.open_bid_windows.dec();

    mutate_assignment(state, window.assignment_id, |assignment| {
        if assignment.status != AssignmentStatus::Unfilled || assignment.user_id.is_some() {
            return Err(AppError::Internal(format!(
                "assignment {} changed under a resolved window",
                assignment.id
            )));
        }
        assignment.bind(driver_id, assigned_by, now);
        // taking a replacement shift counts as confirming it
        assignment.confirmed_at = Some(now);
        Ok(())
    })
}

fn finish_award(
    state: &AppState,
    window: &BidWindow,
    assignment: &Assignment,
    driver_id: Uuid,
    now: DateTime<Utc>,
) {
    state.record_event(ReliabilityEvent {
        driver_id,
        assignment_id: assignment.id,
        route_id: assignment.route_id,
        date: assignment.date,
        kind: ReliabilityEventKind::Confirmed,
        recorded_at: now,
    });
    if let Err(err) = recompute_driver(state, driver_id) {
        warn!(driver_id = %driver_id, error = %err, "failed to recompute winner metrics");
    }

    notify(
        state,
        driver_id,
        NotificationKind::BidWon,
        format!("bid_won:{}:{driver_id}", window.id),
        json!({
            "window_id": window.id,
            "assignment_id": assignment.id,
            "route_id": assignment.route_id,
            "date": assignment.date,
            "pay_bonus_pct": window.pay_bonus_pct,
        }),
    );

    state.metrics.transition("bid_awarded");
    audit(
        state,
        "assignment",
        assignment.id,
        "bid_awarded",
        Actor::Driver(driver_id),
        None,
        Some(assignment),
    );
    info!(
        window_id = %window.id,
        assignment_id = %assignment.id,
        driver_id = %driver_id,
        mode = window.mode.as_str(),
        "assignment awarded by bid"
    );
}

fn pending_bids(state: &AppState, window_id: Uuid) -> Vec<Bid> {
    state
        .bids
        .iter()
        .filter(|entry| entry.value().window_id == window_id && entry.value().status == BidStatus::Pending)
        .map(|entry| entry.value().clone())
        .collect()
}

/// Marks the listed bids lost and tells each bidder.
fn reject_bids(state: &AppState, window: &BidWindow, bid_ids: &[Uuid], now: DateTime<Utc>) -> usize {
    let mut notified = 0;

    for bid_id in bid_ids {
        let driver_id = match state.bids.get_mut(bid_id) {
            Some(mut bid) if bid.status == BidStatus::Pending => {
                bid.status = BidStatus::Lost;
                bid.resolved_at = Some(now);
                bid.driver_id
            }
            _ => continue,
        };

        state
            .metrics
            .bids_total
            .with_label_values(&[window.mode.as_str(), "lost"])
            .inc();
        if notify(
            state,
            driver_id,
            NotificationKind::BidLost,
            format!("bid_lost:{}:{driver_id}", window.id),
            json!({ "window_id": window.id, "assignment_id": window.assignment_id }),
        ) {
            notified += 1;
        }
    }

    notified
}

/// Marks every bid still pending on the window lost.
pub(crate) fn reject_pending(state: &AppState, window: &BidWindow) -> usize {
    let leftover: Vec<Uuid> = pending_bids(state, window.id)
        .into_iter()
        .map(|bid| bid.id)
        .collect();
    reject_bids(state, window, &leftover, state.clock.now())
}

/// Settles a window whose close time has passed. Safe to call repeatedly.
pub fn resolve_window(state: &AppState, window_id: Uuid) -> Result<ResolutionOutcome, AppError> {
    let window = state.bid_window(window_id)?;
    if window.status != WindowStatus::Open {
        return Ok(ResolutionOutcome::AlreadySettled);
    }

    let now = state.clock.now();
    if now < window.closes_at {
        return Ok(ResolutionOutcome::StillOpen);
    }

    let assignment = state.assignment(window.assignment_id)?;
    let week = state.clock.week_start(assignment.date);

    let bids = pending_bids(state, window_id);
    let mut scored = Vec::with_capacity(bids.len());
    for bid in &bids {
        let Ok(driver) = state.driver(bid.driver_id) else {
            continue;
        };
        let preferences = state.preferences_for(bid.driver_id, week);
        let (score, breakdown) = compute_score(&driver, assignment.route_id, preferences.as_ref());

        if let Some(mut row) = state.bids.get_mut(&bid.id) {
            row.score = Some(score);
            row.score_breakdown = Some(breakdown);
        }
        scored.push(ScoredBid {
            bid_id: bid.id,
            driver_id: bid.driver_id,
            bid_at: bid.bid_at,
            score,
        });
    }

    match decide(window.mode, scored) {
        Decision::Award(ranked) => award_competitive(state, &window, &assignment, ranked, now),
        Decision::SwitchToInstant => switch_to_instant(state, &window, &assignment, now),
        Decision::CloseUnfilled => close_unfilled(state, &window, &assignment, now),
    }
}

fn award_competitive(
    state: &AppState,
    window: &BidWindow,
    assignment: &Assignment,
    ranked: Vec<ScoredBid>,
    now: DateTime<Utc>,
) -> Result<ResolutionOutcome, AppError> {
    let all_ids: Vec<Uuid> = ranked.iter().map(|bid| bid.bid_id).collect();

    for candidate in &ranked {
        let gate = state.driver_gate(candidate.driver_id);
        let _held = gate
            .lock()
            .map_err(|_| AppError::Internal("driver gate poisoned".to_string()))?;

        if let Err(err) = check_bidder(state, candidate.driver_id, assignment) {
            debug!(driver_id = %candidate.driver_id, error = %err, "skipping bidder no longer eligible");
            continue;
        }

        let awarded = match claim(state, window, candidate.driver_id, AssignedBy::Bid, now) {
            Ok(awarded) => awarded,
            Err(AppError::AlreadyAssigned) => return Ok(ResolutionOutcome::AlreadySettled),
            Err(err) => return Err(err),
        };

        if let Some(mut bid) = state.bids.get_mut(&candidate.bid_id) {
            bid.status = BidStatus::Won;
            bid.resolved_at = Some(now);
        }
        state
            .metrics
            .bids_total
            .with_label_values(&[window.mode.as_str(), "won"])
            .inc();

        let losers: Vec<Uuid> = all_ids
            .iter()
            .copied()
            .filter(|id| *id != candidate.bid_id)
            .collect();
        reject_bids(state, window, &losers, now);
        finish_award(state, window, &awarded, candidate.driver_id, now);

        return Ok(ResolutionOutcome::Awarded {
            driver_id: candidate.driver_id,
        });
    }

    // every bidder dropped out of eligibility; treat like an empty window
    reject_bids(state, window, &all_ids, now);
    switch_to_instant(state, window, assignment, now)
}

fn switch_to_instant(
    state: &AppState,
    window: &BidWindow,
    assignment: &Assignment,
    now: DateTime<Utc>,
) -> Result<ResolutionOutcome, AppError> {
    let shift_start = state.shift_start(assignment)?;
    if shift_start <= now {
        return close_unfilled(state, window, assignment, now);
    }

    let switched = {
        let mut row = state
            .bid_windows
            .get_mut(&window.id)
            .ok_or_else(|| AppError::NotFound(format!("bid window {} not found", window.id)))?;
        if row.status != WindowStatus::Open || row.mode != BidMode::Competitive {
            return Ok(ResolutionOutcome::AlreadySettled);
        }
        row.mode = BidMode::Instant;
        row.closes_at = shift_start;
        row.clone()
    };

    state.metrics.transition("bid_window_instant");
    let invited = notify_bidders(state, &switched, assignment, None, "instant");
    info!(
        window_id = %window.id,
        assignment_id = %assignment.id,
        invited,
        "competitive window closed without bids; switched to instant"
    );

    Ok(ResolutionOutcome::SwitchedToInstant)
}

fn close_unfilled(
    state: &AppState,
    window: &BidWindow,
    assignment: &Assignment,
    now: DateTime<Utc>,
) -> Result<ResolutionOutcome, AppError> {
    {
        let mut row = state
            .bid_windows
            .get_mut(&window.id)
            .ok_or_else(|| AppError::NotFound(format!("bid window {} not found", window.id)))?;
        if row.status != WindowStatus::Open {
            return Ok(ResolutionOutcome::AlreadySettled);
        }
        row.status = WindowStatus::Closed;
        row.resolved_at = Some(now);
    }

    state
        .open_windows
        .remove_if(&window.assignment_id, |_, open| *open == window.id);
    state.metrics.open_bid_windows.dec();
    state.metrics.transition("bid_window_closed_unfilled");
    reject_pending(state, window);

    alert_manager_unfilled(state, window, assignment);
    warn!(
        window_id = %window.id,
        assignment_id = %assignment.id,
        mode = window.mode.as_str(),
        "bid window closed without a winner"
    );

    Ok(ResolutionOutcome::ClosedUnfilled)
}

fn alert_manager_unfilled(state: &AppState, window: &BidWindow, assignment: &Assignment) {
    let manager_id = state
        .route(assignment.route_id)
        .ok()
        .and_then(|route| route.manager_id);

    match manager_id {
        Some(manager_id) => {
            notify(
                state,
                manager_id,
                NotificationKind::RouteUnfilled,
                format!("route_unfilled:{}", window.id),
                json!({
                    "window_id": window.id,
                    "assignment_id": assignment.id,
                    "route_id": assignment.route_id,
                    "date": assignment.date,
                }),
            );
        }
        None => warn!(route_id = %assignment.route_id, "route has no manager to alert"),
    }
}

/// Closes without a winner when a manager fills the assignment directly.
pub(crate) fn withdraw_window(state: &AppState, assignment_id: Uuid) -> Result<(), AppError> {
    let Some(window_id) = state.open_windows.get(&assignment_id).map(|entry| *entry.value()) else {
        return Ok(());
    };

    let now = state.clock.now();
    let window = {
        let mut row = state
            .bid_windows
            .get_mut(&window_id)
            .ok_or_else(|| AppError::NotFound(format!("bid window {window_id} not found")))?;
        if row.status != WindowStatus::Open {
            return Err(AppError::AlreadyAssigned);
        }
        row.status = WindowStatus::Closed;
        row.resolved_at = Some(now);
        row.clone()
    };

    state
        .open_windows
        .remove_if(&assignment_id, |_, open| *open == window_id);
    state.metrics.open_bid_windows.dec();
    reject_pending(state, &window);

    Ok(())
}

pub fn close_expired_windows(state: &AppState) -> JobReport {
    let mut report = JobReport::new(JobKind::CloseBidWindows);
    let now = state.clock.now();

    let due: Vec<Uuid> = state
        .bid_windows
        .iter()
        .filter(|entry| entry.value().status == WindowStatus::Open && entry.value().closes_at <= now)
        .map(|entry| *entry.key())
        .collect();

    for window_id in due {
        report.examined += 1;
        match resolve_window(state, window_id) {
            Ok(ResolutionOutcome::Awarded { .. }) => report.resolved += 1,
            Ok(ResolutionOutcome::SwitchedToInstant) => report.transitioned += 1,
            Ok(ResolutionOutcome::ClosedUnfilled) => report.closed += 1,
            Ok(ResolutionOutcome::StillOpen | ResolutionOutcome::AlreadySettled) => {
                report.skipped += 1
            }
            Err(err) => {
                report.errors += 1;
                warn!(window_id = %window_id, error = %err, "failed to resolve bid window");
            }
        }
    }

    reopen_orphaned(state, &mut report, now);

    report
}

/// Trigger to reuse when reopening a window for a released assignment.
fn recovery_trigger(assignment: &Assignment) -> BidTrigger {
    match assignment.cancellation.as_ref().map(|cancellation| cancellation.kind) {
        Some(CancellationKind::NoShow) => BidTrigger::NoShow,
        Some(_) => BidTrigger::Cancellation,
        None if assignment.version > 0 => BidTrigger::AutoDrop,
        None => BidTrigger::ScheduleGap,
    }
}

/// Unfilled assignments still ahead of their start with no window opened
/// since they were last released. Opening a window is the last step of a
/// release, so a failure there leaves one of these behind.
fn orphaned_assignments(state: &AppState, now: DateTime<Utc>) -> Vec<Assignment> {
    let candidates: Vec<Assignment> = state
        .assignments
        .iter()
        .filter(|entry| {
            let assignment = entry.value();
            assignment.status == AssignmentStatus::Unfilled
                && assignment.user_id.is_none()
                && !state.open_windows.contains_key(&assignment.id)
        })
        .map(|entry| entry.value().clone())
        .collect();

    candidates
        .into_iter()
        .filter(|assignment| {
            state
                .shift_start(assignment)
                .is_ok_and(|start| start > now)
        })
        .filter(|assignment| {
            !state.bid_windows.iter().any(|entry| {
                let window = entry.value();
                window.assignment_id == assignment.id && window.opens_at >= assignment.updated_at
            })
        })
        .collect()
}

fn reopen_orphaned(state: &AppState, report: &mut JobReport, now: DateTime<Utc>) {
    for assignment in orphaned_assignments(state, now) {
        report.examined += 1;
        let options = OpenWindowOptions {
            exclude_driver: assignment
                .cancellation
                .as_ref()
                .map(|cancellation| cancellation.driver_id),
            ..OpenWindowOptions::default()
        };
        match open_window(state, assignment.id, recovery_trigger(&assignment), options) {
            Ok(WindowOpening::Opened(window)) => {
                report.created += 1;
                info!(
                    assignment_id = %assignment.id,
                    window_id = %window.id,
                    "reopened bid window for released assignment"
                );
            }
            Ok(WindowOpening::Existing(_)) | Err(AppError::Conflict(_)) => report.skipped += 1,
            Err(err) => {
                report.errors += 1;
                warn!(assignment_id = %assignment.id, error = %err, "failed to reopen bid window");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{Decision, ScoredBid, decide, select_mode};
    use crate::config::DispatchPolicy;
    use crate::models::bid::{BidMode, BidTrigger};

    #[test]
    fn mode_follows_time_to_start() {
        let policy = DispatchPolicy::default();

        assert_eq!(
            select_mode(BidTrigger::Cancellation, Duration::hours(72), &policy),
            BidMode::Competitive
        );
        assert_eq!(
            select_mode(BidTrigger::Cancellation, Duration::hours(24), &policy),
            BidMode::Instant
        );
        assert_eq!(
            select_mode(BidTrigger::AutoDrop, Duration::hours(10), &policy),
            BidMode::Instant
        );
    }

    #[test]
    fn no_show_and_manager_triggers_are_emergencies() {
        let policy = DispatchPolicy::default();

        assert_eq!(
            select_mode(BidTrigger::NoShow, Duration::hours(200), &policy),
            BidMode::Emergency
        );
        assert_eq!(
            select_mode(BidTrigger::Manager, Duration::hours(200), &policy),
            BidMode::Emergency
        );
    }

    #[test]
    fn competitive_award_prefers_score_then_earliest_bid() {
        let now = Utc::now();
        let bid = |seed: u128, score: f64, offset: i64| ScoredBid {
            bid_id: Uuid::from_u128(seed),
            driver_id: Uuid::from_u128(seed + 100),
            bid_at: now + Duration::seconds(offset),
            score,
        };

        let decision = decide(
            BidMode::Competitive,
            vec![bid(1, 0.6, 0), bid(2, 0.8, 10), bid(3, 0.8, 5)],
        );

        let Decision::Award(ranked) = decision else {
            panic!("expected award");
        };
        let order: Vec<u128> = ranked.iter().map(|b| b.bid_id.as_u128()).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn empty_competitive_window_switches_instead_of_failing() {
        assert_eq!(decide(BidMode::Competitive, vec![]), Decision::SwitchToInstant);
        assert_eq!(decide(BidMode::Instant, vec![]), Decision::CloseUnfilled);
        assert_eq!(decide(BidMode::Emergency, vec![]), Decision::CloseUnfilled);
    }
}
