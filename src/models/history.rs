use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityEventKind {
    Confirmed,
    Completed,
    EarlyCancellation,
    LateCancellation,
    NoShow,
    AutoDropped,
}

impl ReliabilityEventKind {
    /// Outcomes that count as an assigned shift for attendance.
    pub fn counts_toward_attendance(&self) -> bool {
        matches!(
            self,
            ReliabilityEventKind::Completed
                | ReliabilityEventKind::LateCancellation
                | ReliabilityEventKind::NoShow
        )
    }
}

/// One ledger row: a driver's outcome on one assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityEvent {
    pub driver_id: Uuid,
    pub assignment_id: Uuid,
    pub route_id: Uuid,
    pub date: NaiveDate,
    pub kind: ReliabilityEventKind,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub driver_id: Uuid,
    pub date: NaiveDate,
    pub score: u8,
    pub attendance_component: f64,
    pub completion_component: f64,
    pub reliability_component: f64,
    pub hard_stop: bool,
    pub computed_at: DateTime<Utc>,
}
