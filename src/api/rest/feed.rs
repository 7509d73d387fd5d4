use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::notification::{AuditEntry, Notification, NotificationKind};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/audit", get(list_audit))
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub recipient: Option<Uuid>,
    pub kind: Option<NotificationKind>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub entity_id: Option<Uuid>,
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotificationQuery>,
) -> Json<Vec<Notification>> {
    let mut notifications: Vec<Notification> = state
        .notifications
        .iter()
        .map(|entry| entry.value().clone())
        .filter(|n| query.recipient.is_none_or(|id| n.recipient_id == id))
        .filter(|n| query.kind.is_none_or(|kind| n.kind == kind))
        .collect();
    notifications.sort_by_key(|n| n.created_at);

    Json(notifications)
}

async fn list_audit(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditEntry>> {
    let entries = state
        .audit_entries()
        .into_iter()
        .filter(|entry| query.entity_id.is_none_or(|id| entry.entity_id == id))
        .collect();

    Json(entries)
}
