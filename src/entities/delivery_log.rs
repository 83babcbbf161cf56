//! Delivery log entity - Append-only record of pickup scans and hand-overs.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What happened at the pickup counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryAction {
    /// A presented token matched
    ScanOk,
    /// A presented token was wrong, expired or already used
    ScanFail,
    /// The order was handed over
    MarkDelivered,
}

impl DeliveryAction {
    /// Value stored in the `action` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScanOk => "scan_ok",
            Self::ScanFail => "scan_fail",
            Self::MarkDelivered => "mark_delivered",
        }
    }
}

impl fmt::Display for DeliveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryAction {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "scan_ok" => Ok(Self::ScanOk),
            "scan_fail" => Ok(Self::ScanFail),
            "mark_delivered" => Ok(Self::MarkDelivered),
            other => Err(crate::errors::Error::Config {
                message: format!("Unknown delivery action '{other}'"),
            }),
        }
    }
}

/// Delivery log database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_delivery_logs")]
pub struct Model {
    /// Unique identifier for the log row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Order concerned
    pub order_id: i64,
    /// See [`DeliveryAction`]
    pub action: String,
    /// Vendor or staff member at the counter
    pub performed_by: String,
    /// Short human-readable note
    pub notes: String,
    /// When it happened
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `DeliveryLog` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each row belongs to one order
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
