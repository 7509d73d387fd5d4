use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use route_dispatch::clock::{Clock, ManualTimeSource};
use route_dispatch::config::DispatchPolicy;
use route_dispatch::engine::bidding::{self, BidReceipt, OpenWindowOptions};
use route_dispatch::engine::jobs::{JobKind, JobParams, run_job};
use route_dispatch::engine::lifecycle::{self, CompletionInput, ShiftEdit};
use route_dispatch::engine::manager::{self, NewDriver, NewRoute};
use route_dispatch::engine::preferences::{self, PreferencesInput};
use route_dispatch::engine::{detector, health};
use route_dispatch::error::{AppError, Conflict, WindowViolation};
use route_dispatch::models::assignment::{
    AssignedBy, Assignment, AssignmentStatus, Cancellation, CancellationKind,
};
use route_dispatch::models::bid::{BidMode, BidTrigger, WindowStatus};
use route_dispatch::models::notification::NotificationKind;
use route_dispatch::state::AppState;
use uuid::Uuid;

const MANAGER: Uuid = Uuid::from_u128(0xfeed);

fn local(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    chrono_tz::America::Toronto
        .from_local_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
        .single()
        .unwrap()
        .with_timezone(&Utc)
}

fn day(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, day).unwrap()
}

struct Harness {
    state: Arc<AppState>,
    clock: Arc<ManualTimeSource>,
}

impl Harness {
    /// Monday 2026-10-05, noon in Toronto.
    fn new() -> Self {
        Self::at(local(day(10, 5), 12, 0))
    }

    fn at(start: DateTime<Utc>) -> Self {
        let policy = DispatchPolicy::default();
        let (clock, source) = Clock::manual(policy.timezone, start);
        Self {
            state: Arc::new(AppState::new(policy, clock, 256)),
            clock: source,
        }
    }

    fn route(&self, name: &str, hour: u32) -> Uuid {
        manager::create_route(
            &self.state,
            NewRoute {
                name: name.to_string(),
                warehouse_id: Uuid::from_u128(1),
                manager_id: Some(MANAGER),
                start_time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            },
        )
        .unwrap()
        .id
    }

    fn driver(&self, name: &str) -> Uuid {
        manager::create_driver(
            &self.state,
            NewDriver {
                name: name.to_string(),
                weekly_cap: None,
            },
        )
        .unwrap()
        .id
    }

    fn scheduled(&self, route_id: Uuid, date: NaiveDate, driver_id: Uuid, confirmed: bool) -> Uuid {
        let now = self.state.clock.now();
        let mut assignment = Assignment::scheduled(route_id, date, driver_id, now);
        if confirmed {
            assignment.confirmed_at = Some(now);
        }
        let id = assignment.id;
        assert!(self.state.insert_assignment_if_vacant(assignment));
        id
    }

    fn notifications(&self, recipient: Uuid, kind: NotificationKind) -> usize {
        self.state
            .notifications
            .iter()
            .filter(|entry| entry.value().recipient_id == recipient && entry.value().kind == kind)
            .count()
    }

    fn open_window_for(&self, assignment_id: Uuid) -> Uuid {
        *self.state.open_windows.get(&assignment_id).unwrap().value()
    }
}

fn prefer(h: &Harness, driver_id: Uuid, week: NaiveDate, days: &[Weekday], routes: Vec<Uuid>) {
    preferences::set_preferences(
        &h.state,
        driver_id,
        PreferencesInput {
            week_start: week,
            weekdays: days.to_vec(),
            preferred_routes: routes,
        },
    )
    .unwrap();
}

const WEEKDAYS: [Weekday; 5] = [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri];

#[test]
fn scheduler_fills_each_slot_once_and_reruns_are_no_ops() {
    let h = Harness::new();
    let week = day(10, 19);
    let north = h.route("North", 8);
    h.route("South", 9);
    let drivers: Vec<Uuid> = ["Ana", "Ben", "Cy", "Dot"].iter().map(|name| h.driver(name)).collect();
    for driver in &drivers {
        prefer(&h, *driver, week, &WEEKDAYS, vec![north]);
    }

    let first = run_job(&h.state, JobKind::LockPreferences, JobParams { week_start: Some(week) }).unwrap();
    assert_eq!(first.created, 10);
    // nobody asked for weekends
    assert_eq!(first.unfilled, 4);
    assert_eq!(first.notified, 4);

    let assignments_after_first = h.state.assignments.len();
    let windows_after_first = h.state.bid_windows.len();
    let notifications_after_first = h.state.notifications.len();

    let second = run_job(&h.state, JobKind::LockPreferences, JobParams { week_start: Some(week) }).unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.unfilled, 0);
    assert_eq!(second.notified, 0);
    assert_eq!(h.state.assignments.len(), assignments_after_first);
    assert_eq!(h.state.bid_windows.len(), windows_after_first);
    assert_eq!(h.state.notifications.len(), notifications_after_first);

    let mut slots = HashSet::new();
    for entry in h.state.assignments.iter() {
        let a = entry.value();
        assert!(slots.insert((a.route_id, a.date)), "duplicate slot {:?}", (a.route_id, a.date));
        if a.status == AssignmentStatus::Unfilled {
            assert!(a.user_id.is_none());
        }
    }

    for driver in &drivers {
        let load = h.state.weekly_load(*driver, week);
        assert!(load <= 4, "driver over cap: {load}");
        for offset in 0..7 {
            let date = week + Duration::days(offset);
            let same_day = h
                .state
                .assignments
                .iter()
                .filter(|entry| entry.value().date == date && entry.value().is_held_by(*driver))
                .count();
            assert!(same_day <= 1);
        }
        assert_eq!(h.notifications(*driver, NotificationKind::ScheduleLocked), 1);
    }
}

#[test]
fn scheduler_prefers_familiar_drivers_and_skips_flagged_ones() {
    let h = Harness::new();
    let week = day(10, 19);
    let route = h.route("Harbour", 8);
    let veteran = h.driver("Vee");
    let rookie = h.driver("Roo");
    let flagged = h.driver("Flo");

    h.state.drivers.get_mut(&veteran).unwrap().route_completions.insert(route, 12);
    for driver in [veteran, rookie, flagged] {
        prefer(&h, driver, week, &[Weekday::Mon], vec![]);
    }
    h.state.drivers.get_mut(&flagged).unwrap().flagged = true;
    h.state.drivers.get_mut(&flagged).unwrap().route_completions.insert(route, 40);

    run_job(&h.state, JobKind::LockPreferences, JobParams { week_start: Some(week) }).unwrap();

    let monday = h
        .state
        .assignment_slots
        .get(&(route, week))
        .map(|entry| *entry.value())
        .unwrap();
    let assignment = h.state.assignment(monday).unwrap();
    assert_eq!(assignment.user_id, Some(veteran));
    assert_eq!(assignment.assigned_by, Some(AssignedBy::Algorithm));
    assert!(h.state.assignments.iter().all(|entry| !entry.value().is_held_by(flagged)));
}

#[test]
fn scheduler_respects_weekly_cap_and_excludes_late_signups() {
    let h = Harness::new();
    let week = day(10, 19);
    let route = h.route("Ridge", 8);
    let capped = manager::create_driver(
        &h.state,
        NewDriver {
            name: "Cap".to_string(),
            weekly_cap: Some(2),
        },
    )
    .unwrap()
    .id;
    let every_day = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];
    prefer(&h, capped, week, &every_day, vec![route]);

    let first = preferences::lock_week(&h.state, week).unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.unfilled, 5);

    // signed up after the lock, with standing preferences from an earlier week
    h.clock.advance(Duration::hours(1));
    let late = h.driver("Late");
    prefer(&h, late, day(10, 12), &every_day, vec![]);
    h.route("Ridge II", 9);

    let rerun = run_job(&h.state, JobKind::LockPreferences, JobParams { week_start: Some(week) }).unwrap();
    assert_eq!(rerun.transitioned, 1);
    assert_eq!(rerun.created, 0);
    assert_eq!(rerun.unfilled, 7);

    assert_eq!(h.state.weekly_load(capped, week), 2);
    assert_eq!(h.state.weekly_load(late, week), 0);
    assert!(h.state.preferences.get(&(late, week)).unwrap().locked_at.is_some());
    let unfilled = h
        .state
        .assignments
        .iter()
        .filter(|entry| entry.value().status == AssignmentStatus::Unfilled)
        .count();
    assert_eq!(unfilled, 12);
}

#[test]
fn early_cancellation_opens_competitive_window_without_penalty() {
    let h = Harness::new();
    let route = h.route("East", 8);
    let driver = h.driver("Dee");
    // Thursday 08:00 is 68 hours out
    let assignment = h.scheduled(route, day(10, 8), driver, true);

    let outcome = lifecycle::cancel(&h.state, assignment, driver, Some("family".to_string())).unwrap();

    assert_eq!(outcome.kind, CancellationKind::DriverEarly);
    assert_eq!(outcome.assignment.status, AssignmentStatus::Unfilled);
    assert!(outcome.assignment.user_id.is_none());
    let window = outcome.window.unwrap();
    assert_eq!(window.mode, BidMode::Competitive);
    assert_eq!(window.trigger, BidTrigger::Cancellation);

    let driver_row = h.state.driver(driver).unwrap();
    assert_eq!(driver_row.metrics.early_cancellations, 1);
    assert_eq!(driver_row.metrics.late_cancellations, 0);
    assert_eq!(driver_row.metrics.total_shifts, 0);
    assert_eq!(h.notifications(MANAGER, NotificationKind::ShiftCancelled), 1);

    // a second cancel attempt finds nothing to cancel and opens nothing new
    assert!(lifecycle::cancel(&h.state, assignment, driver, None).is_err());
    assert_eq!(h.state.bid_windows.len(), 1);
}

#[test]
fn late_cancellation_counts_against_attendance_and_goes_instant() {
    let h = Harness::at(local(day(10, 5), 22, 0));
    let route = h.route("West", 8);
    let driver = h.driver("Eli");
    // Tuesday 08:00 is 10 hours out
    let assignment = h.scheduled(route, day(10, 6), driver, true);

    let outcome = lifecycle::cancel(&h.state, assignment, driver, None).unwrap();

    assert_eq!(outcome.kind, CancellationKind::DriverLate);
    assert_eq!(outcome.window.unwrap().mode, BidMode::Instant);
    let driver_row = h.state.driver(driver).unwrap();
    assert_eq!(driver_row.metrics.late_cancellations, 1);
    assert_eq!(driver_row.metrics.total_shifts, 1);
    assert_eq!(driver_row.metrics.attendance_rate, 0.0);
    // one late cancellation alone is not a hard stop
    assert!(driver_row.health.hard_stop_at.is_none());
}

#[test]
fn second_late_cancellation_within_window_imposes_hard_stop() {
    let h = Harness::at(local(day(10, 5), 22, 0));
    let route = h.route("Repeat", 8);
    let driver = h.driver("Gus");
    let owner = h.driver("Hal");
    let tuesday = h.scheduled(route, day(10, 6), driver, true);
    let wednesday = h.scheduled(route, day(10, 7), driver, true);
    let thursday = h.scheduled(route, day(10, 8), owner, true);

    let first = lifecycle::cancel(&h.state, tuesday, driver, None).unwrap();
    assert_eq!(first.kind, CancellationKind::DriverLate);
    assert!(h.state.driver(driver).unwrap().health.hard_stop_at.is_none());

    // Tuesday 20:00, twelve hours before Wednesday's start
    h.clock.set(local(day(10, 6), 20, 0));
    let second = lifecycle::cancel(&h.state, wednesday, driver, None).unwrap();
    assert_eq!(second.kind, CancellationKind::DriverLate);

    let driver_row = h.state.driver(driver).unwrap();
    assert_eq!(driver_row.metrics.late_cancellations, 2);
    assert!(driver_row.health.hard_stop_at.is_some());
    assert!(!driver_row.health.assignment_pool_eligible);
    assert!(driver_row.health.requires_manager_intervention);

    let daily = health::run_daily(&h.state);
    assert_eq!(daily.transitioned, 0);
    let snapshot = h.state.health_snapshots.get(&(driver, day(10, 6))).unwrap().clone();
    assert!(snapshot.hard_stop);
    assert!(snapshot.attendance_component < 1.0);

    lifecycle::cancel(&h.state, thursday, owner, None).unwrap();
    let window_id = h.open_window_for(thursday);
    assert_eq!(
        bidding::submit_bid(&h.state, window_id, driver).unwrap_err(),
        AppError::Conflict(Conflict::DriverIneligible)
    );
    assert!(h.state.driver(owner).unwrap().health.hard_stop_at.is_none());
}

#[test]
fn cancellation_after_start_is_refused() {
    let h = Harness::at(local(day(10, 6), 8, 30));
    let route = h.route("Late start", 8);
    let driver = h.driver("Fay");
    let assignment = h.scheduled(route, day(10, 6), driver, true);

    assert_eq!(
        lifecycle::cancel(&h.state, assignment, driver, None).unwrap_err(),
        AppError::Conflict(Conflict::CancellationAfterStart)
    );
}

#[test]
fn instant_window_has_exactly_one_winner_under_contention() {
    let h = Harness::at(local(day(10, 5), 22, 0));
    let route = h.route("Race", 8);
    let owner = h.driver("Owner");
    let assignment = h.scheduled(route, day(10, 6), owner, true);
    let window = lifecycle::cancel(&h.state, assignment, owner, None)
        .unwrap()
        .window
        .unwrap();
    assert_eq!(window.mode, BidMode::Instant);

    let window_id = window.id;
    let bidders: Vec<Uuid> = (0..8).map(|i| h.driver(&format!("bidder-{i}"))).collect();

    let results: Vec<Result<BidReceipt, AppError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = bidders
            .iter()
            .map(|driver| {
                let state = Arc::clone(&h.state);
                let driver = *driver;
                scope.spawn(move || bidding::submit_bid(&state, window_id, driver))
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let winners: Vec<&BidReceipt> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| *err == AppError::AlreadyAssigned)
    );

    let BidReceipt::Won { assignment: won, .. } = winners[0] else {
        panic!("instant bid should win outright");
    };
    assert_eq!(won.assigned_by, Some(AssignedBy::Bid));
    assert!(won.confirmed_at.is_some());
    assert_eq!(h.state.bid_window(window_id).unwrap().status, WindowStatus::Resolved);
    assert!(h.state.open_windows.is_empty());
}

#[test]
fn competitive_window_without_bids_switches_to_instant_then_closes() {
    let h = Harness::new();
    let route = h.route("Quiet", 8);
    let owner = h.driver("Gil");
    let assignment = h.scheduled(route, day(10, 8), owner, true);
    let window = lifecycle::cancel(&h.state, assignment, owner, None)
        .unwrap()
        .window
        .unwrap();
    assert_eq!(window.mode, BidMode::Competitive);

    // Wednesday 08:00 local is 24 hours before the shift
    h.clock.set(local(day(10, 7), 8, 5));
    let report = run_job(&h.state, JobKind::CloseBidWindows, JobParams::default()).unwrap();
    assert_eq!(report.transitioned, 1);

    let switched = h.state.bid_window(window.id).unwrap();
    assert_eq!(switched.mode, BidMode::Instant);
    assert_eq!(switched.status, WindowStatus::Open);

    let rerun = run_job(&h.state, JobKind::CloseBidWindows, JobParams::default()).unwrap();
    assert_eq!(rerun.transitioned, 0);
    assert_eq!(rerun.examined, 0);

    h.clock.set(local(day(10, 8), 8, 1));
    let closing = run_job(&h.state, JobKind::CloseBidWindows, JobParams::default()).unwrap();
    assert_eq!(closing.closed, 1);
    assert_eq!(h.state.bid_window(window.id).unwrap().status, WindowStatus::Closed);
    assert_eq!(h.notifications(MANAGER, NotificationKind::RouteUnfilled), 1);
}

#[test]
fn competitive_window_awards_highest_score_and_notifies_loser() {
    let h = Harness::new();
    let route = h.route("Scored", 8);
    let owner = h.driver("Hal");
    let strong = h.driver("Strong");
    let weak = h.driver("Weak");
    h.state.drivers.get_mut(&strong).unwrap().route_completions.insert(route, 20);

    let assignment = h.scheduled(route, day(10, 8), owner, true);
    lifecycle::cancel(&h.state, assignment, owner, None).unwrap();
    let window_id = h.open_window_for(assignment);

    // the weaker driver bids first; score still wins
    assert!(matches!(
        bidding::submit_bid(&h.state, window_id, weak).unwrap(),
        BidReceipt::Queued { .. }
    ));
    h.clock.advance(Duration::minutes(5));
    bidding::submit_bid(&h.state, window_id, strong).unwrap();
    assert_eq!(
        bidding::submit_bid(&h.state, window_id, strong).unwrap_err(),
        AppError::Conflict(Conflict::AlreadyBid)
    );

    h.clock.set(local(day(10, 7), 9, 0));
    let report = bidding::close_expired_windows(&h.state);
    assert_eq!(report.resolved, 1);

    let awarded = h.state.assignment(assignment).unwrap();
    assert_eq!(awarded.user_id, Some(strong));
    assert_eq!(awarded.status, AssignmentStatus::Scheduled);
    assert_eq!(h.notifications(strong, NotificationKind::BidWon), 1);
    assert_eq!(h.notifications(weak, NotificationKind::BidLost), 1);

    let again = bidding::close_expired_windows(&h.state);
    assert_eq!(again.resolved, 0);
    assert_eq!(h.notifications(weak, NotificationKind::BidLost), 1);
}

#[test]
fn close_job_reopens_window_for_released_assignment_left_without_one() {
    let h = Harness::new();
    let route = h.route("Orphan", 8);
    let quitter = h.driver("Kit");
    let bidder = h.driver("Lou");

    let now = h.state.clock.now();
    let mut released = Assignment::scheduled(route, day(10, 9), quitter, now);
    released.release();
    released.cancellation = Some(Cancellation {
        kind: CancellationKind::DriverEarly,
        driver_id: quitter,
        at: now,
        reason: None,
    });
    released.touch(now);
    let assignment = released.id;
    h.state.insert_assignment_if_vacant(released);

    let report = bidding::close_expired_windows(&h.state);
    assert_eq!(report.created, 1);
    let window = h.state.bid_window(h.open_window_for(assignment)).unwrap();
    assert_eq!(window.trigger, BidTrigger::Cancellation);
    assert_eq!(window.mode, BidMode::Competitive);
    assert_eq!(h.notifications(bidder, NotificationKind::BidOpen), 1);
    assert_eq!(h.notifications(quitter, NotificationKind::BidOpen), 0);

    let rerun = bidding::close_expired_windows(&h.state);
    assert_eq!(rerun.created, 0);
    assert_eq!(rerun.examined, 0);
    assert_eq!(h.state.bid_windows.len(), 1);
}

#[test]
fn flagged_driver_cannot_bid() {
    let h = Harness::new();
    let route = h.route("Guarded", 8);
    let owner = h.driver("Ivy");
    let flagged = h.driver("Jo");
    h.state.drivers.get_mut(&flagged).unwrap().flagged = true;

    let assignment = h.scheduled(route, day(10, 8), owner, true);
    lifecycle::cancel(&h.state, assignment, owner, None).unwrap();
    let window_id = h.open_window_for(assignment);

    assert_eq!(
        bidding::submit_bid(&h.state, window_id, flagged).unwrap_err(),
        AppError::Conflict(Conflict::DriverIneligible)
    );
    assert_eq!(h.notifications(flagged, NotificationKind::BidOpen), 0);
}

#[test]
fn no_show_triggers_hard_stop_and_emergency_window_once() {
    let h = Harness::at(local(day(10, 5), 6, 0));
    let route = h.route("Dawn", 7);
    let driver = h.driver("Kit");
    let standby = h.driver("Lou");
    let assignment = h.scheduled(route, day(10, 5), driver, true);

    h.clock.set(local(day(10, 5), 9, 30));
    let first = detector::detect_no_shows(&h.state);
    assert_eq!(first.transitioned, 1);
    assert_eq!(first.created, 1);

    let released = h.state.assignment(assignment).unwrap();
    assert_eq!(released.status, AssignmentStatus::Unfilled);
    assert_eq!(
        released.cancellation.as_ref().map(|c| c.kind),
        Some(CancellationKind::NoShow)
    );

    let driver_row = h.state.driver(driver).unwrap();
    assert_eq!(driver_row.metrics.no_shows, 1);
    assert!(driver_row.health.hard_stop_at.is_some());
    assert!(!driver_row.health.assignment_pool_eligible);
    assert!(driver_row.health.requires_manager_intervention);
    assert!(driver_row.health.score <= 49);
    assert!(!driver_row.is_eligible());

    let window = h.state.bid_window(h.open_window_for(assignment)).unwrap();
    assert_eq!(window.mode, BidMode::Emergency);
    assert_eq!(window.pay_bonus_pct, Some(20));
    assert_eq!(h.notifications(MANAGER, NotificationKind::DriverNoShow), 1);
    assert_eq!(h.notifications(standby, NotificationKind::EmergencyRouteAvailable), 1);
    assert_eq!(h.notifications(driver, NotificationKind::EmergencyRouteAvailable), 0);

    let windows = h.state.bid_windows.len();
    let notifications = h.state.notifications.len();
    let second = detector::detect_no_shows(&h.state);
    assert_eq!(second.transitioned, 0);
    assert_eq!(second.notified, 0);
    assert_eq!(h.state.bid_windows.len(), windows);
    assert_eq!(h.state.notifications.len(), notifications);

    // the standby picks it up and gets the emergency arrival allowance
    bidding::submit_bid(&h.state, window.id, standby).unwrap();
    lifecycle::arrive(&h.state, assignment, standby).unwrap();

    manager::reinstate(&h.state, driver, MANAGER).unwrap();
    health::enforce_hard_stop(&h.state, driver).unwrap();
    assert!(h.state.driver(driver).unwrap().health.hard_stop_at.is_none());
}

#[test]
fn unconfirmed_assignment_is_dropped_once() {
    let h = Harness::new();
    let route = h.route("Drop", 8);
    let driver = h.driver("Max");
    // Wednesday 08:00 minus 48h is Monday 08:00, already past
    let assignment = h.scheduled(route, day(10, 7), driver, false);

    let first = run_job(&h.state, JobKind::AutoDropUnconfirmed, JobParams::default()).unwrap();
    assert_eq!(first.transitioned, 1);
    assert_eq!(first.created, 1);
    assert_eq!(h.state.assignment(assignment).unwrap().status, AssignmentStatus::Unfilled);
    assert_eq!(h.state.driver(driver).unwrap().metrics.auto_dropped_shifts, 1);
    assert_eq!(h.notifications(driver, NotificationKind::ShiftAutoDropped), 1);

    let second = run_job(&h.state, JobKind::AutoDropUnconfirmed, JobParams::default()).unwrap();
    assert_eq!(second.transitioned, 0);
    assert_eq!(second.created, 0);
    assert_eq!(h.state.bid_windows.len(), 1);
}

#[test]
fn confirmation_only_inside_window_and_reminders_are_deduplicated() {
    let h = Harness::new();
    let route = h.route("Confirm", 8);
    let driver = h.driver("Ned");
    let too_far = h.scheduled(route, day(10, 14), driver, false);
    let soon = h.scheduled(route, day(10, 8), driver, false);

    assert_eq!(
        lifecycle::confirm(&h.state, too_far, driver).unwrap_err(),
        AppError::Window(WindowViolation::OutsideConfirmationWindow)
    );

    // Thursday 08:00 deadline is Tuesday 08:00; reminders start Monday 08:00
    let reminders = detector::send_confirmation_reminders(&h.state);
    assert_eq!(reminders.notified, 1);
    let again = detector::send_confirmation_reminders(&h.state);
    assert_eq!(again.notified, 0);
    assert_eq!(h.notifications(driver, NotificationKind::ConfirmationReminder), 1);

    let confirmed = lifecycle::confirm(&h.state, soon, driver).unwrap();
    assert!(confirmed.confirmed_at.is_some());
    assert_eq!(
        lifecycle::confirm(&h.state, soon, driver).unwrap_err(),
        AppError::Conflict(Conflict::AlreadyConfirmed)
    );
    assert_eq!(h.state.driver(driver).unwrap().metrics.confirmed_shifts, 1);
}

#[test]
fn shift_work_record_keeps_parcel_arithmetic_consistent() {
    let h = Harness::at(local(day(10, 5), 6, 0));
    let route = h.route("Parcels", 8);
    let driver = h.driver("Oli");
    let other = h.driver("Pat");
    let assignment = h.scheduled(route, day(10, 5), driver, true);

    assert!(matches!(
        lifecycle::arrive(&h.state, assignment, other),
        Err(AppError::Forbidden(_))
    ));
    assert_eq!(
        lifecycle::record_start(&h.state, assignment, driver, 100).unwrap_err(),
        AppError::Conflict(Conflict::NotArrived)
    );

    lifecycle::arrive(&h.state, assignment, driver).unwrap();
    assert_eq!(
        lifecycle::arrive(&h.state, assignment, driver).unwrap_err(),
        AppError::Conflict(Conflict::AlreadyArrived)
    );
    lifecycle::record_start(&h.state, assignment, driver, 120).unwrap();
    assert_eq!(
        lifecycle::record_start(&h.state, assignment, driver, 120).unwrap_err(),
        AppError::Conflict(Conflict::AlreadyStarted)
    );

    let too_many = CompletionInput {
        parcels_returned: 121,
        exceptions: None,
        exception_notes: None,
    };
    assert_eq!(
        lifecycle::complete(&h.state, assignment, driver, too_many).unwrap_err(),
        AppError::ReturnsExceedStart {
            start: 120,
            returned: 121
        }
    );

    h.clock.advance(Duration::hours(8));
    let shift = lifecycle::complete(
        &h.state,
        assignment,
        driver,
        CompletionInput {
            parcels_returned: 6,
            exceptions: Some(2),
            exception_notes: Some("gate locked".to_string()),
        },
    )
    .unwrap();
    assert_eq!(shift.parcels_delivered, Some(114));
    assert_eq!(h.state.assignment(assignment).unwrap().status, AssignmentStatus::Completed);

    let driver_row = h.state.driver(driver).unwrap();
    assert_eq!(driver_row.metrics.completed_shifts, 1);
    assert_eq!(driver_row.route_familiarity(route), 1);
    assert!((driver_row.metrics.completion_rate - 0.95).abs() < 1e-9);

    h.clock.advance(Duration::minutes(30));
    let edited = lifecycle::edit_shift(
        &h.state,
        assignment,
        driver,
        ShiftEdit {
            parcels_returned: Some(0),
            ..ShiftEdit::default()
        },
    )
    .unwrap();
    assert_eq!(edited.parcels_delivered, Some(120));
    assert_eq!(h.state.driver(driver).unwrap().metrics.completion_rate, 1.0);

    h.clock.advance(Duration::minutes(31));
    assert_eq!(
        lifecycle::edit_shift(&h.state, assignment, driver, ShiftEdit::default()).unwrap_err(),
        AppError::Window(WindowViolation::EditWindowExpired)
    );
}

#[test]
fn arrival_after_deadline_is_refused() {
    let h = Harness::at(local(day(10, 5), 6, 0));
    let route = h.route("Tardy", 7);
    let driver = h.driver("Quin");
    let assignment = h.scheduled(route, day(10, 5), driver, true);

    h.clock.set(local(day(10, 5), 9, 1));
    assert_eq!(
        lifecycle::arrive(&h.state, assignment, driver).unwrap_err(),
        AppError::Window(WindowViolation::ArrivalDeadlinePassed)
    );
}

#[test]
fn manual_assign_withdraws_window_and_loses_queued_bids() {
    let h = Harness::new();
    let route = h.route("Manual", 8);
    let owner = h.driver("Ray");
    let bidder = h.driver("Sol");
    let pick = h.driver("Tam");

    let assignment = h.scheduled(route, day(10, 8), owner, true);
    lifecycle::cancel(&h.state, assignment, owner, None).unwrap();
    let window_id = h.open_window_for(assignment);
    bidding::submit_bid(&h.state, window_id, bidder).unwrap();

    let assigned = manager::manual_assign(&h.state, assignment, pick, MANAGER).unwrap();
    assert_eq!(assigned.user_id, Some(pick));
    assert_eq!(assigned.assigned_by, Some(AssignedBy::Manager));
    assert!(assigned.confirmed_at.is_none());
    assert_eq!(h.state.bid_window(window_id).unwrap().status, WindowStatus::Closed);
    assert_eq!(h.notifications(bidder, NotificationKind::BidLost), 1);

    assert!(matches!(
        manager::manual_assign(&h.state, assignment, bidder, MANAGER),
        Err(AppError::Conflict(Conflict::InvalidStatus { .. }))
    ));
}

#[test]
fn emergency_reopen_upgrades_open_window() {
    let h = Harness::new();
    let route = h.route("Upgrade", 8);
    let owner = h.driver("Uma");
    let assignment = h.scheduled(route, day(10, 8), owner, true);
    lifecycle::cancel(&h.state, assignment, owner, None).unwrap();
    let window_id = h.open_window_for(assignment);

    let upgraded = manager::emergency_reopen(&h.state, assignment, MANAGER, Some(35)).unwrap();

    assert_eq!(upgraded.id, window_id);
    assert_eq!(upgraded.mode, BidMode::Emergency);
    assert_eq!(upgraded.pay_bonus_pct, Some(35));
    assert_eq!(h.state.bid_windows.len(), 1);
}

#[test]
fn open_window_is_idempotent_per_assignment() {
    let h = Harness::new();
    let route = h.route("Once", 8);
    let gap = Assignment::unfilled(route, day(10, 9), h.state.clock.now());
    let gap_id = gap.id;
    h.state.insert_assignment_if_vacant(gap);

    let first = bidding::open_window(&h.state, gap_id, BidTrigger::ScheduleGap, OpenWindowOptions::default()).unwrap();
    let second = bidding::open_window(&h.state, gap_id, BidTrigger::ScheduleGap, OpenWindowOptions::default()).unwrap();

    assert_eq!(first.window().id, second.window().id);
    assert_eq!(h.state.bid_windows.len(), 1);
}

#[test]
fn weekly_health_advances_streak_for_clean_week() {
    // Monday 2026-10-12; evaluates the week of 2026-10-05
    let h = Harness::at(local(day(10, 5), 6, 0));
    let route = h.route("Streak", 8);
    let driver = h.driver("Val");
    let assignment = h.scheduled(route, day(10, 5), driver, true);
    lifecycle::arrive(&h.state, assignment, driver).unwrap();
    lifecycle::record_start(&h.state, assignment, driver, 100).unwrap();
    lifecycle::complete(
        &h.state,
        assignment,
        driver,
        CompletionInput {
            parcels_returned: 2,
            exceptions: None,
            exception_notes: None,
        },
    )
    .unwrap();

    h.clock.set(local(day(10, 12), 3, 0));
    let report = health::run_weekly(&h.state);
    assert_eq!(report.transitioned, 1);
    let health_row = h.state.driver(driver).unwrap().health;
    assert_eq!(health_row.streak_weeks, 1);
    assert_eq!(health_row.stars, 1);
    assert_eq!(h.notifications(driver, NotificationKind::StreakAdvanced), 1);

    let rerun = health::run_weekly(&h.state);
    assert_eq!(rerun.transitioned, 0);
    assert_eq!(h.state.driver(driver).unwrap().health.streak_weeks, 1);

    let daily = health::run_daily(&h.state);
    assert_eq!(daily.created, 1);
    let daily_again = health::run_daily(&h.state);
    assert_eq!(daily_again.created, 0);
    assert_eq!(h.state.health_snapshots.len(), 1);
}
