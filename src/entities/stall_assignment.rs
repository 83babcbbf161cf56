//! Stall assignment entity - Which vendor runs which stall on which spot.
//!
//! Per event a vendor, a stall and a spot each appear in at most one assignment.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Stall assignment database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stall_assignments")]
pub struct Model {
    /// Unique identifier for the assignment
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event the assignment belongs to
    pub event_id: i64,
    /// Assigned stall
    pub stall_id: i64,
    /// Vendor running the stall
    pub vendor_user_id: String,
    /// Spot the stall occupies
    pub spot_id: i64,
    /// Staff member who made the latest change
    pub assigned_by: String,
    /// When the assignment was last changed
    pub assigned_at: DateTimeUtc,
}

/// Defines relationships between `StallAssignment` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// The assigned stall
    #[sea_orm(
        belongs_to = "super::stall::Entity",
        from = "Column::StallId",
        to = "super::stall::Column::Id"
    )]
    Stall,
    /// The occupied spot
    #[sea_orm(
        belongs_to = "super::map_spot::Entity",
        from = "Column::SpotId",
        to = "super::map_spot::Column::Id"
    )]
    Spot,
}

impl Related<super::stall::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Stall.def()
    }
}

impl Related<super::map_spot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Spot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
