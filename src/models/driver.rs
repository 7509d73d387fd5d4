use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Counters and rates derived from the reliability ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReliabilityMetrics {
    pub total_shifts: u32,
    pub completed_shifts: u32,
    pub attendance_rate: f64,
    pub completion_rate: f64,
    pub confirmed_shifts: u32,
    pub auto_dropped_shifts: u32,
    pub early_cancellations: u32,
    pub late_cancellations: u32,
    pub no_shows: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverHealth {
    pub score: u8,
    pub streak_weeks: u32,
    pub stars: u8,
    pub assignment_pool_eligible: bool,
    pub requires_manager_intervention: bool,
    pub hard_stop_at: Option<DateTime<Utc>>,
    pub reinstated_at: Option<DateTime<Utc>>,
    pub last_weekly_evaluation: Option<NaiveDate>,
}

impl Default for DriverHealth {
    fn default() -> Self {
        Self {
            score: 100,
            streak_weeks: 0,
            stars: 0,
            assignment_pool_eligible: true,
            requires_manager_intervention: false,
            hard_stop_at: None,
            reinstated_at: None,
            last_weekly_evaluation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub weekly_cap: u8,
    /// Set when a manager edits the cap; automatic cap changes stop applying.
    pub cap_overridden: bool,
    pub flagged: bool,
    pub flag_warning_at: Option<DateTime<Utc>>,
    pub flag_cap_reduced: bool,
    pub flag_cleared_at: Option<DateTime<Utc>>,
    pub metrics: ReliabilityMetrics,
    pub route_completions: HashMap<Uuid, u32>,
    pub health: DriverHealth,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn new(name: String, weekly_cap: u8, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            active: true,
            weekly_cap,
            cap_overridden: false,
            flagged: false,
            flag_warning_at: None,
            flag_cap_reduced: false,
            flag_cleared_at: None,
            metrics: ReliabilityMetrics::default(),
            route_completions: HashMap::new(),
            health: DriverHealth::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn route_familiarity(&self, route_id: Uuid) -> u32 {
        self.route_completions.get(&route_id).copied().unwrap_or(0)
    }

    /// Not flagged, not hard-stopped and still active.
    pub fn is_eligible(&self) -> bool {
        self.active && !self.flagged && self.health.assignment_pool_eligible
    }
}
