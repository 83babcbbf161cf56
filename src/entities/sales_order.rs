//! Sales order entity - A settled cart.
//!
//! `total` and the order's items are fixed at checkout; only `status` and
//! `delivered_at` change afterwards. `order_number` is sequential per event.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fulfilment state of a paid order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Paid, not yet picked up by the stall
    Paid,
    /// Stall is preparing it
    Preparing,
    /// Ready for pickup
    Ready,
    /// Handed to the buyer (terminal)
    Delivered,
}

impl OrderStatus {
    /// Value stored in the `status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Delivered => "delivered",
        }
    }

    /// Whether `next` is a legal step from `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Paid, Self::Preparing | Self::Ready | Self::Delivered)
                | (Self::Preparing, Self::Ready | Self::Delivered)
                | (Self::Ready, Self::Delivered)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "paid" => Ok(Self::Paid),
            "preparing" => Ok(Self::Preparing),
            "ready" => Ok(Self::Ready),
            "delivered" => Ok(Self::Delivered),
            other => Err(crate::errors::Error::Config {
                message: format!("Unknown order status '{other}'"),
            }),
        }
    }
}

/// Sales order database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sales_orders")]
pub struct Model {
    /// Unique identifier for the order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event the order was placed in
    pub event_id: i64,
    /// Buyer's user id
    pub buyer_user_id: String,
    /// Buyer's wallet account that was debited
    pub buyer_account_id: i64,
    /// Stall that sold the items
    pub stall_id: i64,
    /// Sequential number within the event, starting at 1
    pub order_number: i64,
    /// See [`OrderStatus`]
    pub status: String,
    /// Sum of line totals in minor units
    pub total: i64,
    /// Payment transaction that settled the order
    pub ledger_transaction_id: i64,
    /// When the order was paid
    pub paid_at: DateTimeUtc,
    /// When the order was delivered
    pub delivered_at: Option<DateTimeUtc>,
}

/// Defines relationships between `SalesOrder` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One order has many items
    #[sea_orm(has_many = "super::sales_order_item::Entity")]
    Items,
    /// Each order is settled by one ledger transaction
    #[sea_orm(
        belongs_to = "super::ledger_transaction::Entity",
        from = "Column::LedgerTransactionId",
        to = "super::ledger_transaction::Column::Id"
    )]
    LedgerTransaction,
}

impl Related<super::sales_order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::ledger_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerTransaction.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
