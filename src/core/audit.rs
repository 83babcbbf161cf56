//! Staff audit trail.

use crate::{
    entities::{StaffAuditLog, staff_audit_log},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, prelude::*};
use serde_json::Value;
use tracing::debug;

/// Appends one audit row for a privileged staff action.
pub async fn record_staff_action<C>(
    db: &C,
    event_id: i64,
    staff_user_id: &str,
    action_type: &str,
    target: (&str, String),
    payload: &Value,
) -> Result<staff_audit_log::Model>
where
    C: ConnectionTrait,
{
    let (target_model, target_id) = target;
    let payload = serde_json::to_string(payload).map_err(|e| Error::Config {
        message: format!("Failed to serialize audit payload: {e}"),
    })?;

    let row = staff_audit_log::ActiveModel {
        event_id: Set(event_id),
        staff_user_id: Set(staff_user_id.to_string()),
        action_type: Set(action_type.to_string()),
        target_model: Set(target_model.to_string()),
        target_id: Set(target_id),
        payload: Set(payload),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    debug!(event_id, staff = staff_user_id, action = action_type, "recorded staff action");
    Ok(row)
}

/// Audit rows of an event, oldest first.
pub async fn list_audit_log<C>(db: &C, event_id: i64) -> Result<Vec<staff_audit_log::Model>>
where
    C: ConnectionTrait,
{
    StaffAuditLog::find()
        .filter(staff_audit_log::Column::EventId.eq(event_id))
        .order_by_asc(staff_audit_log::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_payload_is_stored_as_json() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;

        record_staff_action(
            &db,
            event.id,
            "root",
            "grant_role",
            ("event_role", "alice".to_string()),
            &json!({ "role": "vendor" }),
        )
        .await?;

        let log = list_audit_log(&db, event.id).await?;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action_type, "grant_role");
        let payload: Value = serde_json::from_str(&log[0].payload).unwrap();
        assert_eq!(payload["role"], "vendor");
        Ok(())
    }
}
