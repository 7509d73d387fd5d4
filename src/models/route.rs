use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub name: String,
    pub warehouse_id: Uuid,
    pub manager_id: Option<Uuid>,
    pub start_time: NaiveTime,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
