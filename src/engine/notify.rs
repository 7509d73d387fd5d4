use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::notification::{Actor, AuditEntry, Notification, NotificationKind};
use crate::state::AppState;

/// Queues a notification unless one with the same dedupe key was already sent.
/// Returns whether a new notification went out.
pub fn notify(
    state: &AppState,
    recipient_id: Uuid,
    kind: NotificationKind,
    dedupe_key: String,
    payload: Value,
) -> bool {
    let notification = match state.notifications.entry(dedupe_key) {
        Entry::Occupied(existing) => {
            debug!(key = %existing.key(), "notification already sent; skipping");
            return false;
        }
        Entry::Vacant(slot) => {
            let notification = Notification {
                id: Uuid::new_v4(),
                dedupe_key: slot.key().clone(),
                recipient_id,
                kind,
                payload,
                created_at: state.clock.now(),
            };
            slot.insert(notification.clone());
            notification
        }
    };

    state
        .metrics
        .notifications_total
        .with_label_values(&[kind.as_str()])
        .inc();
    let _ = state.notification_tx.send(notification);
    true
}

/// Fan-out helper; returns the number of notifications actually sent.
pub fn notify_many(
    state: &AppState,
    recipients: &[Uuid],
    kind: NotificationKind,
    key_prefix: &str,
    payload: Value,
) -> usize {
    recipients
        .iter()
        .filter(|recipient| {
            notify(
                state,
                **recipient,
                kind,
                format!("{key_prefix}:{recipient}"),
                payload.clone(),
            )
        })
        .count()
}

pub fn audit<T: Serialize>(
    state: &AppState,
    entity: &'static str,
    entity_id: Uuid,
    action: &'static str,
    actor: Actor,
    before: Option<&T>,
    after: Option<&T>,
) {
    let entry = AuditEntry {
        id: Uuid::new_v4(),
        entity,
        entity_id,
        action,
        actor,
        before: before.and_then(|value| serde_json::to_value(value).ok()),
        after: after.and_then(|value| serde_json::to_value(value).ok()),
        recorded_at: state.clock.now(),
    };

    match state.audit_log.write() {
        Ok(mut log) => log.push(entry),
        Err(poisoned) => {
            warn!("audit log lock poisoned; recovering");
            poisoned.into_inner().push(entry);
        }
    }
}
