use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_PREFERRED_ROUTES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverPreferences {
    pub driver_id: Uuid,
    pub week_start: NaiveDate,
    pub weekdays: Vec<Weekday>,
    /// Ranked, most preferred first.
    pub preferred_routes: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
}

impl DriverPreferences {
    pub fn prefers_day(&self, day: Weekday) -> bool {
        self.weekdays.contains(&day)
    }

    pub fn ranks_route(&self, route_id: Uuid) -> bool {
        self.preferred_routes
            .iter()
            .take(MAX_PREFERRED_ROUTES)
            .any(|id| *id == route_id)
    }
}
