use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Scheduled,
    Active,
    Completed,
    Cancelled,
    Unfilled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Scheduled => "scheduled",
            AssignmentStatus::Active => "active",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Cancelled => "cancelled",
            AssignmentStatus::Unfilled => "unfilled",
        }
    }

    /// Statuses that occupy a driver's day and count toward the weekly cap.
    pub fn holds_driver(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::Scheduled | AssignmentStatus::Active | AssignmentStatus::Completed
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignedBy {
    Algorithm,
    Manager,
    Bid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CancellationKind {
    DriverEarly,
    DriverLate,
    NoShow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cancellation {
    pub kind: CancellationKind,
    pub driver_id: Uuid,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub route_id: Uuid,
    pub date: NaiveDate,
    pub user_id: Option<Uuid>,
    pub status: AssignmentStatus,
    pub assigned_by: Option<AssignedBy>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancellation: Option<Cancellation>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn scheduled(route_id: Uuid, date: NaiveDate, driver_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            route_id,
            date,
            user_id: Some(driver_id),
            status: AssignmentStatus::Scheduled,
            assigned_by: Some(AssignedBy::Algorithm),
            assigned_at: Some(now),
            confirmed_at: None,
            cancellation: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn unfilled(route_id: Uuid, date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            route_id,
            date,
            user_id: None,
            status: AssignmentStatus::Unfilled,
            assigned_by: None,
            assigned_at: None,
            confirmed_at: None,
            cancellation: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_held_by(&self, driver_id: Uuid) -> bool {
        self.user_id == Some(driver_id) && self.status.holds_driver()
    }

    /// Drops the current driver. Cancellation metadata is kept for audit.
    pub fn release(&mut self) {
        self.user_id = None;
        self.assigned_by = None;
        self.assigned_at = None;
        self.confirmed_at = None;
        self.status = AssignmentStatus::Unfilled;
    }

    pub fn bind(&mut self, driver_id: Uuid, assigned_by: AssignedBy, now: DateTime<Utc>) {
        self.user_id = Some(driver_id);
        self.assigned_by = Some(assigned_by);
        self.assigned_at = Some(now);
        self.status = AssignmentStatus::Scheduled;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}
