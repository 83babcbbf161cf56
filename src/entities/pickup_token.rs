//! Pickup token entity - Hashed one-time code a buyer shows to collect an order.
//!
//! Only the SHA-256 of the raw token is stored. An order has at most one active
//! token; issuing a new one deactivates the previous.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Pickup token database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_pickup_tokens")]
pub struct Model {
    /// Unique identifier for the token
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Order the token redeems
    pub order_id: i64,
    /// Lowercase hex SHA-256 of the raw token
    pub token_hash: String,
    /// Token is rejected from this instant on
    pub expires_at: DateTimeUtc,
    /// Cleared when redeemed or replaced
    pub is_active: bool,
    /// When the token was issued
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `PickupToken` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each token belongs to one order
    #[sea_orm(
        belongs_to = "super::sales_order::Entity",
        from = "Column::OrderId",
        to = "super::sales_order::Column::Id"
    )]
    Order,
}

impl Related<super::sales_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
