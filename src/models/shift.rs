use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Work record created when the driver arrives for an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shift {
    pub assignment_id: Uuid,
    pub driver_id: Uuid,
    pub route_id: Uuid,
    pub arrived_at: DateTime<Utc>,
    pub parcels_start: Option<u32>,
    pub parcels_returned: Option<u32>,
    pub parcels_delivered: Option<u32>,
    pub exceptions: u32,
    pub exception_notes: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub editable_until: Option<DateTime<Utc>>,
}

impl Shift {
    pub fn completion_ratio(&self) -> Option<f64> {
        match (self.parcels_start, self.parcels_delivered) {
            (Some(start), Some(delivered)) if start > 0 => Some(delivered as f64 / start as f64),
            _ => None,
        }
    }
}
