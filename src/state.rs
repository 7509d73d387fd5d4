use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::{Clock, week_start};
use crate::config::DispatchPolicy;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::bid::{Bid, BidWindow};
use crate::models::driver::Driver;
use crate::models::history::{HealthSnapshot, ReliabilityEvent, ReliabilityEventKind};
use crate::models::notification::{AuditEntry, Notification};
use crate::models::preferences::DriverPreferences;
use crate::models::route::Route;
use crate::models::shift::Shift;
use crate::observability::metrics::Metrics;

pub type HistoryKey = (Uuid, Uuid, ReliabilityEventKind);

pub struct AppState {
    pub drivers: DashMap<Uuid, Driver>,
    pub routes: DashMap<Uuid, Route>,
    pub assignments: DashMap<Uuid, Assignment>,
    /// Non-cancelled assignment per (route, date).
    pub assignment_slots: DashMap<(Uuid, NaiveDate), Uuid>,
    /// Keyed by assignment id.
    pub shifts: DashMap<Uuid, Shift>,
    pub bid_windows: DashMap<Uuid, BidWindow>,
    /// Assignment id to its single open window.
    pub open_windows: DashMap<Uuid, Uuid>,
    pub bids: DashMap<Uuid, Bid>,
    /// (window, driver) to bid id.
    pub bid_index: DashMap<(Uuid, Uuid), Uuid>,
    pub preferences: DashMap<(Uuid, NaiveDate), DriverPreferences>,
    pub week_locks: DashMap<NaiveDate, DateTime<Utc>>,
    pub history: DashMap<HistoryKey, ReliabilityEvent>,
    pub health_snapshots: DashMap<(Uuid, NaiveDate), HealthSnapshot>,
    /// Outbox keyed by dedupe key. Unbounded: the keys are what keep job
    /// reruns from notifying twice, so nothing is evicted. Live delivery goes
    /// through `notification_tx`, which is bounded by the event buffer size.
    pub notifications: DashMap<String, Notification>,
    /// Append-only for the life of the process.
    pub audit_log: RwLock<Vec<AuditEntry>>,
    pub notification_tx: broadcast::Sender<Notification>,
    driver_gates: DashMap<Uuid, Arc<Mutex<()>>>,
    pub clock: Clock,
    pub policy: DispatchPolicy,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(policy: DispatchPolicy, clock: Clock, event_buffer_size: usize) -> Self {
        let (notification_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            drivers: DashMap::new(),
            routes: DashMap::new(),
            assignments: DashMap::new(),
            assignment_slots: DashMap::new(),
            shifts: DashMap::new(),
            bid_windows: DashMap::new(),
            open_windows: DashMap::new(),
            bids: DashMap::new(),
            bid_index: DashMap::new(),
            preferences: DashMap::new(),
            week_locks: DashMap::new(),
            history: DashMap::new(),
            health_snapshots: DashMap::new(),
            notifications: DashMap::new(),
            audit_log: RwLock::new(Vec::new()),
            notification_tx,
            driver_gates: DashMap::new(),
            clock,
            policy,
            metrics: Metrics::new(),
        }
    }

    pub fn driver(&self, id: Uuid) -> Result<Driver, AppError> {
        self.drivers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))
    }

    pub fn route(&self, id: Uuid) -> Result<Route, AppError> {
        self.routes
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("route {id} not found")))
    }

    pub fn assignment(&self, id: Uuid) -> Result<Assignment, AppError> {
        self.assignments
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("assignment {id} not found")))
    }

    pub fn bid_window(&self, id: Uuid) -> Result<BidWindow, AppError> {
        self.bid_windows
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("bid window {id} not found")))
    }

    pub fn shift_start(&self, assignment: &Assignment) -> Result<DateTime<Utc>, AppError> {
        let route = self.route(assignment.route_id)?;
        Ok(self.clock.civil_instant(assignment.date, route.start_time))
    }

    /// Shift start moved by `offset` on the local wall clock.
    pub fn shift_offset(
        &self,
        assignment: &Assignment,
        offset: Duration,
    ) -> Result<DateTime<Utc>, AppError> {
        let route = self.route(assignment.route_id)?;
        Ok(self
            .clock
            .civil_offset(assignment.date, route.start_time, offset))
    }

    /// Assignments the driver holds in the week containing `date`.
    pub fn weekly_load(&self, driver_id: Uuid, date: NaiveDate) -> usize {
        let monday = week_start(date);
        let sunday = monday + Duration::days(6);

        self.assignments
            .iter()
            .filter(|entry| {
                let assignment = entry.value();
                assignment.is_held_by(driver_id)
                    && assignment.date >= monday
                    && assignment.date <= sunday
            })
            .count()
    }

    pub fn works_on(&self, driver_id: Uuid, date: NaiveDate) -> bool {
        self.assignments.iter().any(|entry| {
            let assignment = entry.value();
            assignment.date == date && assignment.is_held_by(driver_id)
        })
    }

    /// Serialises cap-sensitive claims for one driver.
    pub fn driver_gate(&self, driver_id: Uuid) -> Arc<Mutex<()>> {
        self.driver_gates
            .entry(driver_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Inserts unless the (route, date) slot already holds a non-cancelled assignment.
    pub fn insert_assignment_if_vacant(&self, assignment: Assignment) -> bool {
        match self.assignment_slots.entry((assignment.route_id, assignment.date)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(assignment.id);
                self.assignments.insert(assignment.id, assignment);
                true
            }
        }
    }

    /// Appends a ledger row; a repeated (driver, assignment, kind) is ignored.
    pub fn record_event(&self, event: ReliabilityEvent) -> bool {
        match self
            .history
            .entry((event.driver_id, event.assignment_id, event.kind))
        {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(event);
                true
            }
        }
    }

    pub fn driver_events(&self, driver_id: Uuid) -> Vec<ReliabilityEvent> {
        self.history
            .iter()
            .filter(|entry| entry.key().0 == driver_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn locked_preferences(&self, week: NaiveDate) -> HashMap<Uuid, DriverPreferences> {
        self.preferences
            .iter()
            .filter(|entry| entry.key().1 == week && entry.value().locked_at.is_some())
            .map(|entry| (entry.key().0, entry.value().clone()))
            .collect()
    }

    /// Preferences for the given week, falling back to the latest earlier week on file.
    pub fn preferences_for(&self, driver_id: Uuid, week: NaiveDate) -> Option<DriverPreferences> {
        if let Some(found) = self.preferences.get(&(driver_id, week)) {
            return Some(found.value().clone());
        }

        self.preferences
            .iter()
            .filter(|entry| entry.key().0 == driver_id && entry.key().1 < week)
            .max_by_key(|entry| entry.key().1)
            .map(|entry| entry.value().clone())
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        match self.audit_log.read() {
            Ok(log) => log.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
