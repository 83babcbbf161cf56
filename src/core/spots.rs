//! Floor plan spots and vendor assignment.
//!
//! Staff place stalls on numbered map spots and tie each stall to the vendor
//! who runs it. A spot is `available`, `assigned` to exactly one stall, or
//! `blocked`. Moving a stall to a new spot releases the old one in the same
//! transaction, and every change is audited.

use crate::{
    core::{
        audit::record_staff_action,
        catalog::require_stall,
        event::{assert_not_closed, require_event_for_update},
        roles::{Capability, Role, assign_role, require_capability},
    },
    entities::{
        MapSpot, SpotStatus, Stall, StallAssignment, map_spot, stall, stall_assignment,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde_json::json;
use tracing::{info, instrument};

/// Locks the event, then checks it is not closed and `staff_user_id` may assign stalls.
async fn begin_staff_change<C>(db: &C, event_id: i64, staff_user_id: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    assert_not_closed(&require_event_for_update(db, event_id).await?)?;
    require_capability(db, event_id, staff_user_id, Capability::AssignStalls).await
}

async fn lock_spot<C>(db: &C, event_id: i64, spot_id: i64) -> Result<map_spot::Model>
where
    C: ConnectionTrait,
{
    let spot = MapSpot::find_by_id(spot_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or(Error::SpotNotFound { id: spot_id })?;
    if spot.event_id != event_id {
        return Err(Error::InvalidEntry {
            message: format!("spot '{}' belongs to another event", spot.label),
        });
    }
    Ok(spot)
}

fn require_same_event(stall: &stall::Model, event_id: i64) -> Result<()> {
    if stall.event_id != event_id {
        return Err(Error::InvalidEntry {
            message: format!("stall {} belongs to another event", stall.code),
        });
    }
    Ok(())
}

/// Fails unless `spot` can be taken by the assignment currently holding `held_spot_id`.
fn ensure_spot_free(spot: &map_spot::Model, held_spot_id: Option<i64>) -> Result<()> {
    match spot.spot_status()? {
        SpotStatus::Available => Ok(()),
        SpotStatus::Assigned if held_spot_id == Some(spot.id) => Ok(()),
        status => Err(Error::SpotUnavailable {
            label: spot.label.clone(),
            status: status.to_string(),
        }),
    }
}

async fn set_spot_status<C>(db: &C, spot_id: i64, status: SpotStatus) -> Result<()>
where
    C: ConnectionTrait,
{
    MapSpot::update_many()
        .col_expr(map_spot::Column::Status, Expr::value(status.as_str()))
        .filter(map_spot::Column::Id.eq(spot_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Staff adds a spot to the event's floor plan. Spot labels are unique per event.
#[instrument(skip(db))]
pub async fn create_map_spot(
    db: &DatabaseConnection,
    event_id: i64,
    staff_user_id: &str,
    zone: &str,
    label: &str,
) -> Result<map_spot::Model> {
    let txn = db.begin().await?;
    begin_staff_change(&txn, event_id, staff_user_id).await?;

    let created = map_spot::ActiveModel {
        event_id: Set(event_id),
        zone: Set(zone.to_string()),
        label: Set(label.to_string()),
        status: Set(SpotStatus::Available.as_str().to_string()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    record_staff_action(
        &txn,
        event_id,
        staff_user_id,
        "create_map_spot",
        ("map_spot", created.id.to_string()),
        &json!({ "zone": zone, "label": label }),
    )
    .await?;
    txn.commit().await?;
    Ok(created)
}

/// Staff takes a free spot out of use, or puts a blocked spot back.
#[instrument(skip(db))]
pub async fn set_spot_blocked(
    db: &DatabaseConnection,
    event_id: i64,
    staff_user_id: &str,
    spot_id: i64,
    blocked: bool,
) -> Result<map_spot::Model> {
    let txn = db.begin().await?;
    begin_staff_change(&txn, event_id, staff_user_id).await?;
    let spot = lock_spot(&txn, event_id, spot_id).await?;

    let (from, to) = if blocked {
        (SpotStatus::Available, SpotStatus::Blocked)
    } else {
        (SpotStatus::Blocked, SpotStatus::Available)
    };
    let current = spot.spot_status()?;
    if current != from {
        return Err(Error::InvalidTransition {
            entity: "map spot",
            from: current.to_string(),
            to: to.to_string(),
        });
    }
    let mut active: map_spot::ActiveModel = spot.into();
    active.status = Set(to.as_str().to_string());
    let updated = active.update(&txn).await?;
    record_staff_action(
        &txn,
        event_id,
        staff_user_id,
        "set_spot_status",
        ("map_spot", spot_id.to_string()),
        &json!({ "status": to.as_str() }),
    )
    .await?;
    txn.commit().await?;
    Ok(updated)
}

/// Spots of an event ordered by zone and label.
pub async fn list_map_spots<C>(db: &C, event_id: i64) -> Result<Vec<map_spot::Model>>
where
    C: ConnectionTrait,
{
    MapSpot::find()
        .filter(map_spot::Column::EventId.eq(event_id))
        .order_by_asc(map_spot::Column::Zone)
        .order_by_asc(map_spot::Column::Label)
        .all(db)
        .await
        .map_err(Into::into)
}

/// The assignment holding a stall, if any.
pub async fn get_assignment_for_stall<C>(
    db: &C,
    event_id: i64,
    stall_id: i64,
) -> Result<Option<stall_assignment::Model>>
where
    C: ConnectionTrait,
{
    StallAssignment::find()
        .filter(stall_assignment::Column::EventId.eq(event_id))
        .filter(stall_assignment::Column::StallId.eq(stall_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Staff puts `vendor_user_id` in charge of a stall on a spot.
///
/// The vendor gets the vendor role and becomes the stall's operator. A vendor
/// holds one assignment per event: assigning them again moves them, and the
/// spot they leave becomes available. A stall whose assignment belongs to
/// another vendor is rejected.
#[instrument(skip(db))]
pub async fn assign_vendor(
    db: &DatabaseConnection,
    event_id: i64,
    staff_user_id: &str,
    vendor_user_id: &str,
    stall_id: i64,
    spot_id: i64,
) -> Result<stall_assignment::Model> {
    let txn = db.begin().await?;
    begin_staff_change(&txn, event_id, staff_user_id).await?;
    let target_stall = require_stall(&txn, stall_id).await?;
    require_same_event(&target_stall, event_id)?;
    let spot = lock_spot(&txn, event_id, spot_id).await?;

    let existing = StallAssignment::find()
        .filter(stall_assignment::Column::EventId.eq(event_id))
        .filter(stall_assignment::Column::VendorUserId.eq(vendor_user_id))
        .lock_exclusive()
        .one(&txn)
        .await?;
    if let Some(holder) = get_assignment_for_stall(&txn, event_id, stall_id).await?
        && holder.vendor_user_id != vendor_user_id
    {
        return Err(Error::InvalidEntry {
            message: format!(
                "stall {} is already assigned to '{}'",
                target_stall.code, holder.vendor_user_id
            ),
        });
    }
    ensure_spot_free(&spot, existing.as_ref().map(|a| a.spot_id))?;
    assign_role(&txn, event_id, vendor_user_id, Role::Vendor).await?;

    let now = Utc::now();
    let assignment = match existing {
        None => {
            stall_assignment::ActiveModel {
                event_id: Set(event_id),
                stall_id: Set(stall_id),
                vendor_user_id: Set(vendor_user_id.to_string()),
                spot_id: Set(spot_id),
                assigned_by: Set(staff_user_id.to_string()),
                assigned_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await?
        }
        Some(previous) => {
            let (previous_spot, previous_stall) = (previous.spot_id, previous.stall_id);
            let mut active: stall_assignment::ActiveModel = previous.into();
            active.stall_id = Set(stall_id);
            active.spot_id = Set(spot_id);
            active.assigned_by = Set(staff_user_id.to_string());
            active.assigned_at = Set(now);
            let updated = active.update(&txn).await?;
            if previous_spot != spot_id {
                set_spot_status(&txn, previous_spot, SpotStatus::Available).await?;
            }
            if previous_stall != stall_id {
                Stall::update_many()
                    .col_expr(stall::Column::VendorUserId, Expr::value(Option::<String>::None))
                    .filter(stall::Column::Id.eq(previous_stall))
                    .filter(stall::Column::VendorUserId.eq(vendor_user_id))
                    .exec(&txn)
                    .await?;
            }
            updated
        }
    };
    set_spot_status(&txn, spot_id, SpotStatus::Assigned).await?;

    let mut running: stall::ActiveModel = target_stall.into();
    running.vendor_user_id = Set(Some(vendor_user_id.to_string()));
    running.update(&txn).await?;

    record_staff_action(
        &txn,
        event_id,
        staff_user_id,
        "assign_vendor",
        ("stall_assignment", assignment.id.to_string()),
        &json!({ "vendor": vendor_user_id, "stall_id": stall_id, "spot_id": spot_id }),
    )
    .await?;
    txn.commit().await?;

    info!(event_id, vendor = vendor_user_id, stall_id, spot_id, "vendor assigned");
    Ok(assignment)
}

/// Staff moves an assigned stall to another spot, releasing the old one.
#[instrument(skip(db))]
pub async fn assign_spot(
    db: &DatabaseConnection,
    event_id: i64,
    staff_user_id: &str,
    stall_id: i64,
    spot_id: i64,
) -> Result<stall_assignment::Model> {
    let txn = db.begin().await?;
    begin_staff_change(&txn, event_id, staff_user_id).await?;
    let target_stall = require_stall(&txn, stall_id).await?;
    require_same_event(&target_stall, event_id)?;

    let assignment = StallAssignment::find()
        .filter(stall_assignment::Column::EventId.eq(event_id))
        .filter(stall_assignment::Column::StallId.eq(stall_id))
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| Error::InvalidEntry {
            message: format!("stall {} has no vendor assignment", target_stall.code),
        })?;
    let spot = lock_spot(&txn, event_id, spot_id).await?;
    ensure_spot_free(&spot, Some(assignment.spot_id))?;

    let previous_spot = assignment.spot_id;
    let mut active: stall_assignment::ActiveModel = assignment.into();
    active.spot_id = Set(spot_id);
    active.assigned_by = Set(staff_user_id.to_string());
    active.assigned_at = Set(Utc::now());
    let updated = active.update(&txn).await?;
    if previous_spot != spot_id {
        set_spot_status(&txn, previous_spot, SpotStatus::Available).await?;
    }
    set_spot_status(&txn, spot_id, SpotStatus::Assigned).await?;

    record_staff_action(
        &txn,
        event_id,
        staff_user_id,
        "assign_spot",
        ("stall_assignment", updated.id.to_string()),
        &json!({ "stall_id": stall_id, "spot_id": spot_id, "previous_spot_id": previous_spot }),
    )
    .await?;
    txn.commit().await?;

    info!(event_id, stall_id, from = previous_spot, to = spot_id, "stall moved");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::audit::list_audit_log;
    use crate::core::catalog::create_stall;
    use crate::core::roles::roles_of;
    use crate::test_utils::*;

    async fn spot_status(db: &DatabaseConnection, spot_id: i64) -> Result<String> {
        Ok(MapSpot::find_by_id(spot_id).one(db).await?.unwrap().status)
    }

    #[tokio::test]
    async fn test_assign_vendor_takes_spot_and_grants_role() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let stall = create_stall(&db, event.id, TEST_STAFF, "S1", "Tacos", "vera").await?;
        let a1 = create_map_spot(&db, event.id, TEST_STAFF, "North", "A1").await?;
        let a2 = create_map_spot(&db, event.id, TEST_STAFF, "North", "A2").await?;

        let assignment = assign_vendor(&db, event.id, TEST_STAFF, "victor", stall.id, a1.id).await?;

        assert_eq!(assignment.vendor_user_id, "victor");
        assert_eq!(assignment.assigned_by, TEST_STAFF);
        assert_eq!(spot_status(&db, a1.id).await?, "assigned");
        assert!(roles_of(&db, event.id, "victor").await?.contains(&Role::Vendor));
        let running = require_stall(&db, stall.id).await?;
        assert_eq!(running.vendor_user_id.as_deref(), Some("victor"));
        let last = list_audit_log(&db, event.id).await?.pop().unwrap();
        assert_eq!(last.action_type, "assign_vendor");

        let taken = assign_vendor(&db, event.id, TEST_STAFF, "walt", stall.id, a2.id).await;
        assert!(matches!(taken, Err(Error::InvalidEntry { .. })));
        assert_eq!(spot_status(&db, a2.id).await?, "available");
        Ok(())
    }

    #[tokio::test]
    async fn test_reassigning_vendor_releases_previous_spot() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let stall = create_stall(&db, event.id, TEST_STAFF, "S1", "Tacos", "vera").await?;
        let a1 = create_map_spot(&db, event.id, TEST_STAFF, "North", "A1").await?;
        let a2 = create_map_spot(&db, event.id, TEST_STAFF, "North", "A2").await?;
        let first = assign_vendor(&db, event.id, TEST_STAFF, "vera", stall.id, a1.id).await?;

        let moved = assign_vendor(&db, event.id, TEST_STAFF, "vera", stall.id, a2.id).await?;

        assert_eq!(moved.id, first.id);
        assert_eq!(moved.spot_id, a2.id);
        assert_eq!(spot_status(&db, a1.id).await?, "available");
        assert_eq!(spot_status(&db, a2.id).await?, "assigned");
        Ok(())
    }

    #[tokio::test]
    async fn test_vendor_moving_stalls_leaves_old_stall_unrun() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let first_stall = create_stall(&db, event.id, TEST_STAFF, "S1", "Tacos", "vera").await?;
        let second_stall = create_stall(&db, event.id, TEST_STAFF, "S2", "Crepes", "vera").await?;
        let a1 = create_map_spot(&db, event.id, TEST_STAFF, "North", "A1").await?;
        let b1 = create_map_spot(&db, event.id, TEST_STAFF, "South", "B1").await?;
        assign_vendor(&db, event.id, TEST_STAFF, "vera", first_stall.id, a1.id).await?;

        assign_vendor(&db, event.id, TEST_STAFF, "vera", second_stall.id, b1.id).await?;

        assert_eq!(require_stall(&db, first_stall.id).await?.vendor_user_id, None);
        assert!(get_assignment_for_stall(&db, event.id, first_stall.id).await?.is_none());
        assert_eq!(spot_status(&db, a1.id).await?, "available");
        Ok(())
    }

    #[tokio::test]
    async fn test_assign_spot_moves_stall_and_is_audited() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let stall = create_stall(&db, event.id, TEST_STAFF, "S1", "Tacos", "vera").await?;
        let a1 = create_map_spot(&db, event.id, TEST_STAFF, "North", "A1").await?;
        let b1 = create_map_spot(&db, event.id, TEST_STAFF, "South", "B1").await?;
        assign_vendor(&db, event.id, TEST_STAFF, "vera", stall.id, a1.id).await?;

        let moved = assign_spot(&db, event.id, TEST_STAFF, stall.id, b1.id).await?;

        assert_eq!(moved.spot_id, b1.id);
        assert_eq!(spot_status(&db, a1.id).await?, "available");
        assert_eq!(spot_status(&db, b1.id).await?, "assigned");
        let last = list_audit_log(&db, event.id).await?.pop().unwrap();
        assert_eq!(last.action_type, "assign_spot");
        Ok(())
    }

    #[tokio::test]
    async fn test_taken_or_blocked_spot_is_unavailable() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let tacos = create_stall(&db, event.id, TEST_STAFF, "S1", "Tacos", "vera").await?;
        let crepes = create_stall(&db, event.id, TEST_STAFF, "S2", "Crepes", "victor").await?;
        let a1 = create_map_spot(&db, event.id, TEST_STAFF, "North", "A1").await?;
        let a2 = create_map_spot(&db, event.id, TEST_STAFF, "North", "A2").await?;
        let a3 = create_map_spot(&db, event.id, TEST_STAFF, "North", "A3").await?;
        assign_vendor(&db, event.id, TEST_STAFF, "vera", tacos.id, a1.id).await?;
        assign_vendor(&db, event.id, TEST_STAFF, "victor", crepes.id, a2.id).await?;
        set_spot_blocked(&db, event.id, TEST_STAFF, a3.id, true).await?;

        let taken = assign_spot(&db, event.id, TEST_STAFF, crepes.id, a1.id).await;
        assert!(matches!(taken, Err(Error::SpotUnavailable { .. })));
        let blocked = assign_spot(&db, event.id, TEST_STAFF, crepes.id, a3.id).await;
        assert!(matches!(blocked, Err(Error::SpotUnavailable { .. })));
        assert_eq!(spot_status(&db, a2.id).await?, "assigned");

        let cannot_block = set_spot_blocked(&db, event.id, TEST_STAFF, a1.id, true).await;
        assert!(matches!(cannot_block, Err(Error::InvalidTransition { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_assign_spot_needs_vendor_assignment() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let stall = create_stall(&db, event.id, TEST_STAFF, "S1", "Tacos", "vera").await?;
        let spot = create_map_spot(&db, event.id, TEST_STAFF, "North", "A1").await?;

        let result = assign_spot(&db, event.id, TEST_STAFF, stall.id, spot.id).await;
        assert!(matches!(result, Err(Error::InvalidEntry { .. })));
        assert_eq!(spot_status(&db, spot.id).await?, "available");
        Ok(())
    }

    #[tokio::test]
    async fn test_spot_changes_require_staff_and_open_event() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let stall = create_stall(&db, event.id, TEST_STAFF, "S1", "Tacos", "vera").await?;
        let spot = create_map_spot(&db, event.id, TEST_STAFF, "North", "A1").await?;

        let vendor = assign_vendor(&db, event.id, "vera", "vera", stall.id, spot.id).await;
        assert!(matches!(vendor, Err(Error::PermissionDenied { .. })));

        close_test_event(&db, event.id).await?;
        let closed = assign_vendor(&db, event.id, TEST_STAFF, "vera", stall.id, spot.id).await;
        assert!(matches!(closed, Err(Error::EventAlreadyClosed { .. })));
        let new_spot = create_map_spot(&db, event.id, TEST_STAFF, "North", "A2").await;
        assert!(matches!(new_spot, Err(Error::EventAlreadyClosed { .. })));
        assert_eq!(list_map_spots(&db, event.id).await?.len(), 1);
        Ok(())
    }
}
