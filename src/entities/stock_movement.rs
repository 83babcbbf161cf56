//! Stock movement entity - Append-only audit trail of inventory changes.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Stock movement database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    /// Unique identifier for the movement
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event of the product
    pub event_id: i64,
    /// Product whose stock changed
    pub stall_product_id: i64,
    /// `"set"`, `"increase"`, `"decrease"` or `"sale"`
    pub movement_type: String,
    /// Signed change in units
    pub quantity_delta: i64,
    /// Free-form reason
    pub note: String,
    /// User who caused the change
    pub created_by: Option<String>,
    /// When the change happened
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `StockMovement` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each movement belongs to one product
    #[sea_orm(
        belongs_to = "super::stall_product::Entity",
        from = "Column::StallProductId",
        to = "super::stall_product::Column::Id"
    )]
    StallProduct,
}

impl Related<super::stall_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StallProduct.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
