//! Stall product entity - A priced item a stall sells, with optional finite stock.
//!
//! Products with `stock_mode = "unlimited"` ignore `stock_qty`. Finite products are
//! decremented at checkout and flagged as low once `stock_qty <= low_stock_threshold`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Stock mode for products that are never decremented.
pub const STOCK_MODE_UNLIMITED: &str = "unlimited";
/// Stock mode for products with a counted inventory.
pub const STOCK_MODE_FINITE: &str = "finite";

/// Stall product database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stall_products")]
pub struct Model {
    /// Unique identifier for the product
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event the product is sold in
    pub event_id: i64,
    /// Stall selling the product
    pub stall_id: i64,
    /// Display name shown to buyers
    pub name: String,
    /// Unit price in minor units
    pub price: i64,
    /// `"finite"` or `"unlimited"`
    pub stock_mode: String,
    /// Units on hand for finite products
    pub stock_qty: Option<i64>,
    /// Finite products at or below this quantity are reported as low stock
    pub low_stock_threshold: Option<i64>,
    /// Soft delete flag - inactive products cannot be bought
    pub is_active: bool,
    /// When the product was created
    pub created_at: DateTimeUtc,
    /// When the product was last modified
    pub updated_at: DateTimeUtc,
}

impl Model {
    /// Whether checkout must check and decrement `stock_qty`.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.stock_mode == STOCK_MODE_FINITE
    }
}

/// Defines relationships between `StallProduct` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each product belongs to one stall
    #[sea_orm(
        belongs_to = "super::stall::Entity",
        from = "Column::StallId",
        to = "super::stall::Column::Id"
    )]
    Stall,
}

impl Related<super::stall::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Stall.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
