//! Sales order item entity - Price and name snapshot of one cart line.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Sales order item database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sales_order_items")]
pub struct Model {
    /// Unique identifier for the line
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Order the line belongs to
    pub order_id: i64,
    /// Product that was bought
    pub stall_product_id: i64,
    /// Product name at the time of purchase
    pub product_name: String,
    /// Unit price at the time of purchase, minor units
    pub unit_price: i64,
    /// Units bought
    pub quantity: i64,
    /// `unit_price * quantity`
    pub line_total: i64,
}

/// Defines relationships between `SalesOrderItem` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each line belongs to one order
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
