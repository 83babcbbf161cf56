//! Checkout and order fulfilment.
//!
//! A checkout turns a cart into a paid order in one database transaction: it
//! decrements finite stock, writes the order with name and price snapshots, and
//! posts a single `payment` transaction from the buyer's wallet to the stall's
//! account. If any step fails nothing is written.
//!
//! Each paid order gets a pickup token. The buyer receives the raw token once;
//! only its SHA-256 is stored. The stall redeems it at the counter with
//! [`verify_and_deliver`], and every scan lands in the delivery log.

use crate::{
    config::ledger::LedgerSettings,
    core::{
        account::{ensure_stall_account, ensure_user_wallet},
        catalog::{MOVEMENT_SALE, require_stall, require_stall_access},
        event::{assert_not_closed, assert_public_window, require_event_for_update},
        ledger::{EntryRequest, PostingRequest, balance_of, post_within},
        money::Ucoin,
        retry::with_conflict_retry,
        roles::{Capability, require_capability},
    },
    entities::{
        DeliveryAction, DeliveryLog, OrderStatus, PickupToken, SalesOrder, SalesOrderItem,
        StallProduct, StallStatus, TransactionKind, delivery_log, pickup_token, sales_order,
        sales_order_item, stall_product, stock_movement,
    },
    errors::{Error, Result},
};
use chrono::{Duration, Utc};
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*, sea_query::Expr};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// How long a pickup token stays redeemable.
pub const PICKUP_TOKEN_TTL_MINUTES: i64 = 120;

/// One cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartItem {
    /// Product to buy
    pub stall_product_id: i64,
    /// Units, must be positive
    pub quantity: i64,
}

/// A paid order with its items.
#[derive(Debug, Clone)]
pub struct CheckoutReceipt {
    /// The order
    pub order: sales_order::Model,
    /// Snapshot lines
    pub items: Vec<sales_order_item::Model>,
    /// Payment transaction id
    pub transaction_id: i64,
    /// Buyer's wallet balance after paying
    pub balance_after: Ucoin,
    /// Raw pickup token, shown to the buyer and never stored
    pub pickup_token: String,
}

/// Lowercase hex SHA-256 of a raw pickup token.
#[must_use]
pub fn hash_pickup_token(raw_token: &str) -> String {
    hex::encode(Sha256::digest(raw_token.as_bytes()))
}

/// Deactivates the order's tokens and stores a fresh one. Returns the raw token.
async fn issue_token_within<C>(db: &C, order_id: i64) -> Result<String>
where
    C: ConnectionTrait,
{
    deactivate_tokens(db, order_id).await?;
    let raw_token = Uuid::new_v4().simple().to_string();
    let now = Utc::now();
    pickup_token::ActiveModel {
        order_id: Set(order_id),
        token_hash: Set(hash_pickup_token(&raw_token)),
        expires_at: Set(now + Duration::minutes(PICKUP_TOKEN_TTL_MINUTES)),
        is_active: Set(true),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(raw_token)
}

async fn deactivate_tokens<C>(db: &C, order_id: i64) -> Result<()>
where
    C: ConnectionTrait,
{
    PickupToken::update_many()
        .col_expr(pickup_token::Column::IsActive, Expr::value(false))
        .filter(pickup_token::Column::OrderId.eq(order_id))
        .filter(pickup_token::Column::IsActive.eq(true))
        .exec(db)
        .await?;
    Ok(())
}

async fn log_delivery<C>(
    db: &C,
    order_id: i64,
    action: DeliveryAction,
    actor_user_id: &str,
    notes: &str,
) -> Result<()>
where
    C: ConnectionTrait,
{
    delivery_log::ActiveModel {
        order_id: Set(order_id),
        action: Set(action.as_str().to_string()),
        performed_by: Set(actor_user_id.to_string()),
        notes: Set(notes.to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Merges duplicate products and rejects empty carts and non-positive quantities.
///
/// The result is ordered by product id.
pub fn normalize_cart(items: &[CartItem]) -> Result<BTreeMap<i64, i64>> {
    if items.is_empty() {
        return Err(Error::InvalidEntry {
            message: "cart is empty".to_string(),
        });
    }
    let mut merged: BTreeMap<i64, i64> = BTreeMap::new();
    for item in items {
        if item.quantity <= 0 {
            return Err(Error::InvalidEntry {
                message: format!(
                    "quantity for product {} must be positive, got {}",
                    item.stall_product_id, item.quantity
                ),
            });
        }
        let quantity = merged.entry(item.stall_product_id).or_insert(0);
        *quantity = quantity
            .checked_add(item.quantity)
            .ok_or_else(|| Error::InvalidEntry {
                message: format!("quantity overflow for product {}", item.stall_product_id),
            })?;
    }
    Ok(merged)
}

/// Pays for a cart from the buyer's wallet.
#[allow(clippy::too_many_lines)] // One database transaction from validation to commit
#[instrument(skip(db, settings, items), fields(lines = items.len()))]
pub async fn checkout(
    db: &DatabaseConnection,
    settings: &LedgerSettings,
    event_id: i64,
    buyer_user_id: &str,
    items: &[CartItem],
) -> Result<CheckoutReceipt> {
    let cart = normalize_cart(items)?;
    let cart = &cart;
    let receipt = with_conflict_retry(settings, "checkout", || async move {
        let txn = db.begin().await?;
        // Locking the event row serializes order numbering within the event
        let event = require_event_for_update(&txn, event_id).await?;
        let now = Utc::now();
        assert_public_window(&event, now)?;
        require_capability(&txn, event.id, buyer_user_id, Capability::Checkout).await?;

        let product_ids: Vec<i64> = cart.keys().copied().collect();
        let products: HashMap<i64, stall_product::Model> = StallProduct::find()
            .filter(stall_product::Column::Id.is_in(product_ids.clone()))
            .order_by_asc(stall_product::Column::Id)
            .lock_exclusive()
            .all(&txn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut stall_id = None;
        let mut total = Ucoin::ZERO;
        let mut lines = Vec::with_capacity(cart.len());
        for (&product_id, &quantity) in cart {
            let product = products
                .get(&product_id)
                .filter(|p| p.is_active && p.event_id == event.id)
                .ok_or(Error::ProductNotFound { id: product_id })?;
            match stall_id {
                None => stall_id = Some(product.stall_id),
                Some(id) if id != product.stall_id => {
                    return Err(Error::InvalidEntry {
                        message: "all cart items must come from the same stall".to_string(),
                    });
                }
                Some(_) => {}
            }
            if product.is_finite() {
                let available = product.stock_qty.unwrap_or(0);
                if available < quantity {
                    return Err(Error::OutOfStock {
                        product: product.name.clone(),
                        available,
                        requested: quantity,
                    });
                }
            }
            let line_total = Ucoin::from_cents(product.price).checked_mul(quantity)?;
            total = total.checked_add(line_total)?;
            lines.push((product, quantity, line_total));
        }
        let stall_id = stall_id.ok_or_else(|| Error::InvalidEntry {
            message: "cart is empty".to_string(),
        })?;
        let stall = require_stall(&txn, stall_id).await?;
        let stall_status = stall.stall_status()?;
        if stall_status != StallStatus::Open {
            return Err(Error::StallNotOpen {
                code: stall.code.clone(),
                status: stall_status.to_string(),
            });
        }

        let wallet = ensure_user_wallet(&txn, event.id, buyer_user_id).await?;
        let available = balance_of(&txn, wallet.id).await?;
        if available < total {
            return Err(Error::InsufficientBalance {
                account_id: wallet.id,
                available,
                required: total,
            });
        }

        for (product, quantity, _) in &lines {
            if !product.is_finite() {
                continue;
            }
            let updated = StallProduct::update_many()
                .col_expr(
                    stall_product::Column::StockQty,
                    Expr::col(stall_product::Column::StockQty).sub(*quantity),
                )
                .col_expr(stall_product::Column::UpdatedAt, Expr::value(now))
                .filter(stall_product::Column::Id.eq(product.id))
                .filter(stall_product::Column::StockQty.gte(*quantity))
                .exec(&txn)
                .await?;
            if updated.rows_affected == 0 {
                return Err(Error::OutOfStock {
                    product: product.name.clone(),
                    available: product.stock_qty.unwrap_or(0),
                    requested: *quantity,
                });
            }
        }

        let stall_account = ensure_stall_account(&txn, event.id, stall.id).await?;
        let order_number = SalesOrder::find()
            .filter(sales_order::Column::EventId.eq(event.id))
            .order_by_desc(sales_order::Column::OrderNumber)
            .one(&txn)
            .await?
            .map_or(1, |last| last.order_number + 1);

        let request = PostingRequest::new(
            TransactionKind::Payment,
            vec![
                EntryRequest::debit(wallet.id, total, format!("Order #{order_number}")),
                EntryRequest::credit(
                    stall_account.id,
                    total,
                    format!("Order #{order_number} from {buyer_user_id}"),
                ),
            ],
        )
        .idempotency_key(format!("payment:{}:{order_number}", event.id))
        .reference("sales_order_number", order_number)
        .created_by(buyer_user_id);
        let posted = post_within(&txn, &event, &request).await?;

        let order = sales_order::ActiveModel {
            event_id: Set(event.id),
            buyer_user_id: Set(buyer_user_id.to_string()),
            buyer_account_id: Set(wallet.id),
            stall_id: Set(stall.id),
            order_number: Set(order_number),
            status: Set(OrderStatus::Paid.as_str().to_string()),
            total: Set(total.cents()),
            ledger_transaction_id: Set(posted.transaction.id),
            paid_at: Set(now),
            delivered_at: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        for (product, quantity, line_total) in &lines {
            let item = sales_order_item::ActiveModel {
                order_id: Set(order.id),
                stall_product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                unit_price: Set(product.price),
                quantity: Set(*quantity),
                line_total: Set(line_total.cents()),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            items.push(item);

            if product.is_finite() {
                stock_movement::ActiveModel {
                    event_id: Set(event.id),
                    stall_product_id: Set(product.id),
                    movement_type: Set(MOVEMENT_SALE.to_string()),
                    quantity_delta: Set(-quantity),
                    note: Set(format!("Order #{order_number}")),
                    created_by: Set(Some(buyer_user_id.to_string())),
                    created_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }
        }

        let pickup_token = issue_token_within(&txn, order.id).await?;
        let balance_after = balance_of(&txn, wallet.id).await?;
        txn.commit().await?;
        Ok(CheckoutReceipt {
            order,
            items,
            transaction_id: posted.transaction.id,
            balance_after,
            pickup_token,
        })
    })
    .await?;

    info!(
        order_id = receipt.order.id,
        order_number = receipt.order.order_number,
        total = %Ucoin::from_cents(receipt.order.total),
        "checkout completed"
    );
    Ok(receipt)
}

/// Locks an order for fulfilment by `actor_user_id`, who must verify orders
/// for its stall or be staff, while the event is not closed.
async fn lock_order_for_fulfilment<C>(
    db: &C,
    order_id: i64,
    actor_user_id: &str,
) -> Result<(sales_order::Model, OrderStatus)>
where
    C: ConnectionTrait,
{
    let order = SalesOrder::find_by_id(order_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or(Error::OrderNotFound { id: order_id })?;
    assert_not_closed(&require_event_for_update(db, order.event_id).await?)?;
    let stall = require_stall(db, order.stall_id).await?;
    require_stall_access(db, &stall, actor_user_id, Capability::VerifyOrders).await?;
    let status = order.status.parse()?;
    Ok((order, status))
}

async fn move_order_within<C>(
    db: &C,
    order: sales_order::Model,
    actor_user_id: &str,
    next: OrderStatus,
    notes: &str,
) -> Result<sales_order::Model>
where
    C: ConnectionTrait,
{
    let order_id = order.id;
    let mut active: sales_order::ActiveModel = order.into();
    active.status = Set(next.as_str().to_string());
    if next == OrderStatus::Delivered {
        active.delivered_at = Set(Some(Utc::now()));
    }
    let updated = active.update(db).await?;
    if next == OrderStatus::Delivered {
        deactivate_tokens(db, order_id).await?;
        log_delivery(db, order_id, DeliveryAction::MarkDelivered, actor_user_id, notes).await?;
    }
    Ok(updated)
}

/// Moves an order forward through `paid -> preparing -> ready -> delivered`.
///
/// Only the stall's vendor or staff may do this. Steps may be skipped but never
/// reversed; `delivered` is terminal, stamps `delivered_at` and retires the
/// pickup token.
#[instrument(skip(db))]
pub async fn advance_order_status(
    db: &DatabaseConnection,
    order_id: i64,
    actor_user_id: &str,
    next: OrderStatus,
) -> Result<sales_order::Model> {
    let txn = db.begin().await?;
    let (order, current) = lock_order_for_fulfilment(&txn, order_id, actor_user_id).await?;
    if !current.can_advance_to(next) {
        return Err(Error::InvalidTransition {
            entity: "order",
            from: current.to_string(),
            to: next.to_string(),
        });
    }
    let updated =
        move_order_within(&txn, order, actor_user_id, next, "Marked delivered by hand").await?;
    txn.commit().await?;

    info!(order_id, from = %current, to = %next, "order status advanced");
    Ok(updated)
}

/// Redeems the buyer's pickup token and marks the order delivered.
///
/// A token that does not match the order's active, unexpired token fails with
/// [`Error::InvalidPickupToken`]; the failed scan is still written to the
/// delivery log. A successful scan logs `scan_ok` then `mark_delivered`.
#[instrument(skip(db, raw_token))]
pub async fn verify_and_deliver(
    db: &DatabaseConnection,
    order_id: i64,
    raw_token: &str,
    actor_user_id: &str,
) -> Result<sales_order::Model> {
    let txn = db.begin().await?;
    let (order, current) = lock_order_for_fulfilment(&txn, order_id, actor_user_id).await?;
    if !current.can_advance_to(OrderStatus::Delivered) {
        return Err(Error::InvalidTransition {
            entity: "order",
            from: current.to_string(),
            to: OrderStatus::Delivered.to_string(),
        });
    }

    let now = Utc::now();
    let token = PickupToken::find()
        .filter(pickup_token::Column::OrderId.eq(order.id))
        .filter(pickup_token::Column::IsActive.eq(true))
        .order_by_desc(pickup_token::Column::Id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .filter(|t| t.expires_at > now);
    let presented = raw_token.trim();
    let accepted = token
        .as_ref()
        .is_some_and(|t| !presented.is_empty() && t.token_hash == hash_pickup_token(presented));

    if !accepted {
        log_delivery(
            &txn,
            order.id,
            DeliveryAction::ScanFail,
            actor_user_id,
            "Invalid or expired token",
        )
        .await?;
        txn.commit().await?;
        warn!(order_id, actor = actor_user_id, "pickup token rejected");
        return Err(Error::InvalidPickupToken { order_id });
    }

    log_delivery(&txn, order.id, DeliveryAction::ScanOk, actor_user_id, "Token valid").await?;
    let updated = move_order_within(
        &txn,
        order,
        actor_user_id,
        OrderStatus::Delivered,
        "Delivered against pickup token",
    )
    .await?;
    txn.commit().await?;

    info!(order_id, from = %current, "order delivered against pickup token");
    Ok(updated)
}

/// Replaces a lost pickup token. Only the buyer may ask, and only before delivery.
#[instrument(skip(db))]
pub async fn reissue_pickup_token(
    db: &DatabaseConnection,
    order_id: i64,
    buyer_user_id: &str,
) -> Result<String> {
    let txn = db.begin().await?;
    let order = SalesOrder::find_by_id(order_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or(Error::OrderNotFound { id: order_id })?;
    assert_not_closed(&require_event_for_update(&txn, order.event_id).await?)?;
    if order.buyer_user_id != buyer_user_id {
        return Err(Error::PermissionDenied {
            message: format!("order {order_id} does not belong to '{buyer_user_id}'"),
        });
    }
    let status: OrderStatus = order.status.parse()?;
    if status == OrderStatus::Delivered {
        return Err(Error::InvalidTransition {
            entity: "order",
            from: status.to_string(),
            to: status.to_string(),
        });
    }
    let raw_token = issue_token_within(&txn, order.id).await?;
    txn.commit().await?;

    info!(order_id, "pickup token reissued");
    Ok(raw_token)
}

/// Delivery log of an order, oldest first.
pub async fn list_delivery_log<C>(db: &C, order_id: i64) -> Result<Vec<delivery_log::Model>>
where
    C: ConnectionTrait,
{
    DeliveryLog::find()
        .filter(delivery_log::Column::OrderId.eq(order_id))
        .order_by_asc(delivery_log::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// An order with its items.
pub async fn get_order<C>(
    db: &C,
    order_id: i64,
) -> Result<Option<(sales_order::Model, Vec<sales_order_item::Model>)>>
where
    C: ConnectionTrait,
{
    let Some(order) = SalesOrder::find_by_id(order_id).one(db).await? else {
        return Ok(None);
    };
    let items = order
        .find_related(SalesOrderItem)
        .order_by_asc(sales_order_item::Column::Id)
        .all(db)
        .await?;
    Ok(Some((order, items)))
}

/// A buyer's orders in an event, newest first.
pub async fn list_orders_for_buyer<C>(
    db: &C,
    event_id: i64,
    buyer_user_id: &str,
) -> Result<Vec<sales_order::Model>>
where
    C: ConnectionTrait,
{
    SalesOrder::find()
        .filter(sales_order::Column::EventId.eq(event_id))
        .filter(sales_order::Column::BuyerUserId.eq(buyer_user_id))
        .order_by_desc(sales_order::Column::OrderNumber)
        .all(db)
        .await
        .map_err(Into::into)
}
