//! Stall catalog and inventory business logic.
//!
//! Every stock change leaves a [`stock_movement`] row, so a product's current
//! quantity can be traced back through its movements.

use crate::{
    core::{
        account::ensure_stall_account,
        audit::record_staff_action,
        event::{assert_not_closed, require_event_for_update},
        money::Ucoin,
        roles::{Capability, Role, assign_role, capabilities, require_capability},
    },
    entities::{Stall, StallProduct, StallStatus, StockMovement, stall, stall_product, stock_movement},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*, sea_query::Expr};
use serde_json::json;
use tracing::{debug, info, instrument};

/// Movement type written when a quantity is set outright.
pub const MOVEMENT_SET: &str = "set";
/// Movement type for restocking.
pub const MOVEMENT_INCREASE: &str = "increase";
/// Movement type for manual write-downs.
pub const MOVEMENT_DECREASE: &str = "decrease";
/// Movement type written by checkout.
pub const MOVEMENT_SALE: &str = "sale";

/// How a product's inventory is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stock {
    /// Never runs out
    Unlimited,
    /// Counted inventory
    Finite {
        /// Units on hand
        quantity: i64,
        /// Report as low stock at or below this quantity
        low_stock_threshold: Option<i64>,
    },
}

/// Attributes of a new product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    /// Display name
    pub name: String,
    /// Unit price, must be positive
    pub price: Ucoin,
    /// Inventory mode
    pub stock: Stock,
}

/// A manual inventory change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockAdjustment {
    /// Replace the quantity
    Set(i64),
    /// Add units
    Increase(i64),
    /// Remove units; cannot go below zero
    Decrease(i64),
}

/// Staff opens a stall run by `vendor_user_id`, who becomes a vendor of the
/// event. The stall starts [`StallStatus::Open`] with its revenue account in
/// place. Audited.
#[instrument(skip(db))]
pub async fn create_stall(
    db: &DatabaseConnection,
    event_id: i64,
    staff_user_id: &str,
    code: &str,
    name: &str,
    vendor_user_id: &str,
) -> Result<stall::Model> {
    let txn = db.begin().await?;
    let event = require_event_for_update(&txn, event_id).await?;
    assert_not_closed(&event)?;
    require_capability(&txn, event.id, staff_user_id, Capability::AssignStalls).await?;

    let created = stall::ActiveModel {
        event_id: Set(event.id),
        code: Set(code.to_string()),
        name: Set(name.to_string()),
        status: Set(StallStatus::Open.as_str().to_string()),
        vendor_user_id: Set(Some(vendor_user_id.to_string())),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    ensure_stall_account(&txn, event.id, created.id).await?;
    assign_role(&txn, event.id, vendor_user_id, Role::Vendor).await?;
    record_staff_action(
        &txn,
        event.id,
        staff_user_id,
        "create_stall",
        ("stall", created.id.to_string()),
        &json!({ "code": code, "vendor": vendor_user_id }),
    )
    .await?;
    txn.commit().await?;

    info!(stall_id = created.id, "stall created");
    Ok(created)
}

/// Gets a stall by id or fails with [`Error::StallNotFound`].
pub async fn require_stall<C>(db: &C, stall_id: i64) -> Result<stall::Model>
where
    C: ConnectionTrait,
{
    Stall::find_by_id(stall_id)
        .one(db)
        .await?
        .ok_or(Error::StallNotFound { id: stall_id })
}

/// Fails with [`Error::PermissionDenied`] unless the user runs the stall and
/// holds `capability`, or is staff.
pub async fn require_stall_access<C>(
    db: &C,
    stall: &stall::Model,
    user_id: &str,
    capability: Capability,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let caps = capabilities(db, stall.event_id, user_id).await?;
    let runs_stall =
        stall.vendor_user_id.as_deref() == Some(user_id) && caps.contains(&capability);
    if runs_stall || caps.contains(&Capability::AccessStaffPanel) {
        Ok(())
    } else {
        Err(Error::PermissionDenied {
            message: format!("user '{user_id}' does not operate stall {}", stall.code),
        })
    }
}

/// [`require_stall_access`] for catalog changes.
pub async fn require_stall_operator<C>(db: &C, stall: &stall::Model, user_id: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    require_stall_access(db, stall, user_id, Capability::ManageProducts).await
}

/// Locks the stall's event and fails once it is closed.
async fn lock_open_event<C>(db: &C, stall: &stall::Model) -> Result<()>
where
    C: ConnectionTrait,
{
    assert_not_closed(&require_event_for_update(db, stall.event_id).await?)
}

/// Moves a stall to `next`, e.g. to pause sales. `closed` is terminal.
#[instrument(skip(db))]
pub async fn set_stall_status(
    db: &DatabaseConnection,
    stall_id: i64,
    actor_user_id: &str,
    next: StallStatus,
) -> Result<stall::Model> {
    let txn = db.begin().await?;
    let stall = Stall::find_by_id(stall_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or(Error::StallNotFound { id: stall_id })?;
    lock_open_event(&txn, &stall).await?;
    require_stall_operator(&txn, &stall, actor_user_id).await?;

    let current = stall.stall_status()?;
    if !current.can_transition_to(next) {
        return Err(Error::InvalidTransition {
            entity: "stall",
            from: current.to_string(),
            to: next.to_string(),
        });
    }
    let mut active: stall::ActiveModel = stall.into();
    active.status = Set(next.as_str().to_string());
    let updated = active.update(&txn).await?;
    txn.commit().await?;

    info!(stall_id, from = %current, to = %next, "stall status changed");
    Ok(updated)
}

async fn record_movement<C>(
    db: &C,
    product: &stall_product::Model,
    movement_type: &str,
    quantity_delta: i64,
    note: &str,
    created_by: Option<&str>,
) -> Result<()>
where
    C: ConnectionTrait,
{
    stock_movement::ActiveModel {
        event_id: Set(product.event_id),
        stall_product_id: Set(product.id),
        movement_type: Set(movement_type.to_string()),
        quantity_delta: Set(quantity_delta),
        note: Set(note.to_string()),
        created_by: Set(created_by.map(str::to_string)),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Adds a product to a stall.
pub async fn create_stall_product(
    db: &DatabaseConnection,
    stall_id: i64,
    actor_user_id: &str,
    product: NewProduct,
) -> Result<stall_product::Model> {
    if !product.price.is_positive() {
        return Err(Error::InvalidAmount {
            amount: product.price,
        });
    }
    let (stock_mode, stock_qty, threshold) = match product.stock {
        Stock::Unlimited => (stall_product::STOCK_MODE_UNLIMITED, None, None),
        Stock::Finite {
            quantity,
            low_stock_threshold,
        } => {
            if quantity < 0 || low_stock_threshold.is_some_and(|t| t < 0) {
                return Err(Error::Config {
                    message: format!("Invalid stock for '{}'", product.name),
                });
            }
            (stall_product::STOCK_MODE_FINITE, Some(quantity), low_stock_threshold)
        }
    };

    let txn = db.begin().await?;
    let stall = require_stall(&txn, stall_id).await?;
    lock_open_event(&txn, &stall).await?;
    require_stall_operator(&txn, &stall, actor_user_id).await?;

    let now = Utc::now();
    let created = stall_product::ActiveModel {
        event_id: Set(stall.event_id),
        stall_id: Set(stall.id),
        name: Set(product.name),
        price: Set(product.price.cents()),
        stock_mode: Set(stock_mode.to_string()),
        stock_qty: Set(stock_qty),
        low_stock_threshold: Set(threshold),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if let Some(quantity) = stock_qty {
        record_movement(&txn, &created, MOVEMENT_SET, quantity, "initial stock", Some(actor_user_id))
            .await?;
    }
    txn.commit().await?;

    debug!(product_id = created.id, stall_id, "product created");
    Ok(created)
}

/// Gets a product by id.
pub async fn get_product_by_id<C>(db: &C, product_id: i64) -> Result<Option<stall_product::Model>>
where
    C: ConnectionTrait,
{
    StallProduct::find_by_id(product_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Active products of a stall, by name.
pub async fn list_products_for_stall<C>(db: &C, stall_id: i64) -> Result<Vec<stall_product::Model>>
where
    C: ConnectionTrait,
{
    StallProduct::find()
        .filter(stall_product::Column::StallId.eq(stall_id))
        .filter(stall_product::Column::IsActive.eq(true))
        .order_by_asc(stall_product::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Changes a finite product's inventory and records the movement.
#[instrument(skip(db))]
pub async fn adjust_stock(
    db: &DatabaseConnection,
    product_id: i64,
    actor_user_id: &str,
    adjustment: StockAdjustment,
    note: &str,
) -> Result<stall_product::Model> {
    let txn = db.begin().await?;
    let product = StallProduct::find_by_id(product_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or(Error::ProductNotFound { id: product_id })?;
    let stall = require_stall(&txn, product.stall_id).await?;
    lock_open_event(&txn, &stall).await?;
    require_stall_operator(&txn, &stall, actor_user_id).await?;

    if !product.is_finite() {
        return Err(Error::Config {
            message: format!("'{}' has unlimited stock", product.name),
        });
    }
    let current = product.stock_qty.unwrap_or(0);
    let (movement_type, delta) = match adjustment {
        StockAdjustment::Set(quantity) if quantity >= 0 => (MOVEMENT_SET, quantity - current),
        StockAdjustment::Increase(quantity) if quantity > 0 => (MOVEMENT_INCREASE, quantity),
        StockAdjustment::Decrease(quantity) if quantity > 0 => {
            if quantity > current {
                return Err(Error::OutOfStock {
                    product: product.name.clone(),
                    available: current,
                    requested: quantity,
                });
            }
            (MOVEMENT_DECREASE, -quantity)
        }
        other => {
            return Err(Error::Config {
                message: format!("Invalid stock adjustment {other:?}"),
            });
        }
    };

    // A decrease must still fit if a checkout took units since the read
    let updated = StallProduct::update_many()
        .col_expr(
            stall_product::Column::StockQty,
            Expr::col(stall_product::Column::StockQty).add(delta),
        )
        .col_expr(stall_product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(stall_product::Column::Id.eq(product.id))
        .filter(stall_product::Column::StockQty.gte(-delta.min(0)))
        .exec(&txn)
        .await?;
    if updated.rows_affected == 0 {
        return Err(Error::OutOfStock {
            product: product.name.clone(),
            available: current,
            requested: -delta,
        });
    }
    record_movement(&txn, &product, movement_type, delta, note, Some(actor_user_id)).await?;

    let updated = get_product_by_id(&txn, product.id)
        .await?
        .ok_or(Error::ProductNotFound { id: product.id })?;
    txn.commit().await?;

    info!(product_id, movement_type, delta, "stock adjusted");
    Ok(updated)
}

/// Active finite products of an event whose quantity is at or below their threshold.
pub async fn list_low_stock<C>(db: &C, event_id: i64) -> Result<Vec<stall_product::Model>>
where
    C: ConnectionTrait,
{
    let products = StallProduct::find()
        .filter(stall_product::Column::EventId.eq(event_id))
        .filter(stall_product::Column::IsActive.eq(true))
        .filter(stall_product::Column::StockMode.eq(stall_product::STOCK_MODE_FINITE))
        .order_by_asc(stall_product::Column::StockQty)
        .order_by_asc(stall_product::Column::Id)
        .all(db)
        .await?;

    Ok(products
        .into_iter()
        .filter(|p| match (p.stock_qty, p.low_stock_threshold) {
            (Some(quantity), Some(threshold)) => quantity <= threshold,
            (Some(quantity), None) => quantity == 0,
            (None, _) => false,
        })
        .collect())
}

/// Soft deletes a product so it can no longer be bought.
pub async fn deactivate_product(
    db: &DatabaseConnection,
    product_id: i64,
    actor_user_id: &str,
) -> Result<stall_product::Model> {
    let txn = db.begin().await?;
    let product = get_product_by_id(&txn, product_id)
        .await?
        .ok_or(Error::ProductNotFound { id: product_id })?;
    let stall = require_stall(&txn, product.stall_id).await?;
    lock_open_event(&txn, &stall).await?;
    require_stall_operator(&txn, &stall, actor_user_id).await?;

    let mut active: stall_product::ActiveModel = product.into();
    active.is_active = Set(false);
    active.updated_at = Set(Utc::now());
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    Ok(updated)
}

/// Stock movements of a product, oldest first.
pub async fn list_stock_movements<C>(db: &C, product_id: i64) -> Result<Vec<stock_movement::Model>>
where
    C: ConnectionTrait,
{
    StockMovement::find()
        .filter(stock_movement::Column::StallProductId.eq(product_id))
        .order_by_asc(stock_movement::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::account::{find_account_by_code, stall_code};
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_create_stall_opens_account_and_vendor_role() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let (stall, _) = create_stall_with_product(&db, event.id, "vera", 500, None).await?;

        assert!(
            find_account_by_code(&db, event.id, &stall_code(stall.id))
                .await?
                .is_some()
        );
        let caps = capabilities(&db, event.id, "vera").await?;
        assert!(caps.contains(&Capability::ManageProducts));
        Ok(())
    }

    #[tokio::test]
    async fn test_create_stall_requires_staff() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let result = create_stall(&db, event.id, "nobody", "S1", "Tacos", "vera").await;
        assert!(matches!(result, Err(Error::PermissionDenied { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_product_price_must_be_positive() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let (stall, _) = create_stall_with_product(&db, event.id, "vera", 500, None).await?;

        let result = create_stall_product(
            &db,
            stall.id,
            "vera",
            NewProduct {
                name: "Free".to_string(),
                price: Ucoin::ZERO,
                stock: Stock::Unlimited,
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_other_vendor_cannot_manage_stall() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let (_, product) = create_stall_with_product(&db, event.id, "vera", 500, Some(5)).await?;
        assign_role(&db, event.id, "victor", Role::Vendor).await?;

        let result = adjust_stock(&db, product.id, "victor", StockAdjustment::Increase(3), "").await;
        assert!(matches!(result, Err(Error::PermissionDenied { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_adjust_stock_records_movements() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let (_, product) = create_stall_with_product(&db, event.id, "vera", 500, Some(5)).await?;

        let product_after = adjust_stock(&db, product.id, "vera", StockAdjustment::Increase(10), "delivery").await?;
        assert_eq!(product_after.stock_qty, Some(15));
        let product_after = adjust_stock(&db, product.id, "vera", StockAdjustment::Decrease(4), "spilled").await?;
        assert_eq!(product_after.stock_qty, Some(11));
        let product_after = adjust_stock(&db, product.id, "vera", StockAdjustment::Set(2), "recount").await?;
        assert_eq!(product_after.stock_qty, Some(2));

        let movements = list_stock_movements(&db, product.id).await?;
        let deltas: Vec<_> = movements
            .iter()
            .map(|m| (m.movement_type.as_str(), m.quantity_delta))
            .collect();
        assert_eq!(
            deltas,
            vec![("set", 5), ("increase", 10), ("decrease", -4), ("set", -9)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_decrease_below_zero_is_out_of_stock() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let (_, product) = create_stall_with_product(&db, event.id, "vera", 500, Some(2)).await?;

        let result = adjust_stock(&db, product.id, "vera", StockAdjustment::Decrease(3), "").await;

        assert!(matches!(
            result,
            Err(Error::OutOfStock { available: 2, requested: 3, .. })
        ));
        let unchanged = get_product_by_id(&db, product.id).await?.unwrap();
        assert_eq!(unchanged.stock_qty, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_low_stock_uses_threshold() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let (stall, plenty) = create_stall_with_product(&db, event.id, "vera", 500, Some(50)).await?;
        let scarce = create_stall_product(
            &db,
            stall.id,
            "vera",
            NewProduct {
                name: "Churros".to_string(),
                price: Ucoin::whole(3),
                stock: Stock::Finite {
                    quantity: 4,
                    low_stock_threshold: Some(5),
                },
            },
        )
        .await?;

        let low = list_low_stock(&db, event.id).await?;

        assert_eq!(low.iter().map(|p| p.id).collect::<Vec<_>>(), vec![scarce.id]);
        assert!(!low.iter().any(|p| p.id == plenty.id));
        Ok(())
    }

    #[tokio::test]
    async fn test_deactivated_product_is_hidden() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let (stall, product) = create_stall_with_product(&db, event.id, "vera", 500, None).await?;

        let deactivated = deactivate_product(&db, product.id, "vera").await?;

        assert!(!deactivated.is_active);
        assert!(list_products_for_stall(&db, stall.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_event_catalog_is_read_only() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let (stall, product) = create_stall_with_product(&db, event.id, "vera", 500, Some(5)).await?;
        close_test_event(&db, event.id).await?;

        let new_stall = create_stall(&db, event.id, TEST_STAFF, "S2", "Crepes", "victor").await;
        assert!(matches!(new_stall, Err(Error::EventAlreadyClosed { .. })));

        let new_product = create_stall_product(
            &db,
            stall.id,
            "vera",
            NewProduct {
                name: "Late".to_string(),
                price: Ucoin::whole(1),
                stock: Stock::Unlimited,
            },
        )
        .await;
        assert!(matches!(new_product, Err(Error::EventAlreadyClosed { .. })));

        let restock = adjust_stock(&db, product.id, "vera", StockAdjustment::Increase(3), "").await;
        assert!(matches!(restock, Err(Error::EventAlreadyClosed { .. })));

        let hidden = deactivate_product(&db, product.id, "vera").await;
        assert!(matches!(hidden, Err(Error::EventAlreadyClosed { .. })));

        let unchanged = get_product_by_id(&db, product.id).await?.unwrap();
        assert_eq!(unchanged.stock_qty, Some(5));
        assert!(unchanged.is_active);
        assert_eq!(list_products_for_stall(&db, stall.id).await?.len(), 1);
        assert_eq!(list_stock_movements(&db, product.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_stall_can_be_set_up_on_draft_event() -> Result<()> {
        let db = setup_test_db().await?;
        let draft = create_draft_event(&db, "DRAFT").await?;
        assign_role(&db, draft.id, TEST_STAFF, Role::Staff).await?;

        let stall = create_stall(&db, draft.id, TEST_STAFF, "S1", "Tacos", "vera").await?;
        assert_eq!(stall.stall_status()?, StallStatus::Open);
        Ok(())
    }

    #[tokio::test]
    async fn test_stall_status_transitions() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let (stall, _) = create_stall_with_product(&db, event.id, "vera", 500, None).await?;

        let paused = set_stall_status(&db, stall.id, "vera", StallStatus::Paused).await?;
        assert_eq!(paused.status, "paused");
        let closed = set_stall_status(&db, stall.id, TEST_STAFF, StallStatus::Closed).await?;
        assert_eq!(closed.status, "closed");

        let reopen = set_stall_status(&db, stall.id, "vera", StallStatus::Open).await;
        assert!(matches!(reopen, Err(Error::InvalidTransition { .. })));

        let stranger = set_stall_status(&db, stall.id, "alice", StallStatus::Open).await;
        assert!(matches!(stranger, Err(Error::PermissionDenied { .. })));
        Ok(())
    }
}
