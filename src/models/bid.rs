use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BidMode {
    Competitive,
    Instant,
    Emergency,
}

impl BidMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidMode::Competitive => "competitive",
            BidMode::Instant => "instant",
            BidMode::Emergency => "emergency",
        }
    }

    pub fn is_first_accept(&self) -> bool {
        matches!(self, BidMode::Instant | BidMode::Emergency)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BidTrigger {
    Cancellation,
    AutoDrop,
    NoShow,
    Manager,
    ScheduleGap,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    Open,
    Resolved,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidWindow {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub mode: BidMode,
    pub trigger: BidTrigger,
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
    pub pay_bonus_pct: Option<u8>,
    pub status: WindowStatus,
    pub winner_id: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BidStatus {
    Pending,
    Won,
    Lost,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub completion_score: f64,
    pub familiarity_score: f64,
    pub attendance_score: f64,
    pub preference_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub window_id: Uuid,
    pub assignment_id: Uuid,
    pub driver_id: Uuid,
    pub bid_at: DateTime<Utc>,
    pub score: Option<f64>,
    pub score_breakdown: Option<ScoreBreakdown>,
    pub status: BidStatus,
    pub resolved_at: Option<DateTime<Utc>>,
}
