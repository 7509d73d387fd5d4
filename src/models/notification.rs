use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ShiftReminder,
    BidOpen,
    BidWon,
    BidLost,
    ShiftCancelled,
    Warning,
    ScheduleLocked,
    AssignmentConfirmed,
    ConfirmationReminder,
    ShiftAutoDropped,
    EmergencyRouteAvailable,
    DriverNoShow,
    StreakAdvanced,
    StreakReset,
    BonusEligible,
    CorrectiveWarning,
    RouteUnfilled,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ShiftReminder => "shift_reminder",
            NotificationKind::BidOpen => "bid_open",
            NotificationKind::BidWon => "bid_won",
            NotificationKind::BidLost => "bid_lost",
            NotificationKind::ShiftCancelled => "shift_cancelled",
            NotificationKind::Warning => "warning",
            NotificationKind::ScheduleLocked => "schedule_locked",
            NotificationKind::AssignmentConfirmed => "assignment_confirmed",
            NotificationKind::ConfirmationReminder => "confirmation_reminder",
            NotificationKind::ShiftAutoDropped => "shift_auto_dropped",
            NotificationKind::EmergencyRouteAvailable => "emergency_route_available",
            NotificationKind::DriverNoShow => "driver_no_show",
            NotificationKind::StreakAdvanced => "streak_advanced",
            NotificationKind::StreakReset => "streak_reset",
            NotificationKind::BonusEligible => "bonus_eligible",
            NotificationKind::CorrectiveWarning => "corrective_warning",
            NotificationKind::RouteUnfilled => "route_unfilled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub dedupe_key: String,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    System,
    Driver(Uuid),
    Manager(Uuid),
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity: &'static str,
    pub entity_id: Uuid,
    pub action: &'static str,
    pub actor: Actor,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub recorded_at: DateTime<Utc>,
}
