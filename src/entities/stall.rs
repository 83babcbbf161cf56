//! Stall entity - A vendor booth selling products within one event.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a stall is selling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StallStatus {
    /// Being set up, not selling yet
    Draft,
    /// Selling
    Open,
    /// Temporarily not selling
    Paused,
    /// Done for the event (terminal)
    Closed,
}

impl StallStatus {
    /// Value stored in the `status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Open => "open",
            Self::Paused => "paused",
            Self::Closed => "closed",
        }
    }

    /// Whether the stall may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Open | Self::Closed)
                | (Self::Open, Self::Paused | Self::Closed)
                | (Self::Paused, Self::Open | Self::Closed)
        )
    }
}

impl fmt::Display for StallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StallStatus {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "open" => Ok(Self::Open),
            "paused" => Ok(Self::Paused),
            "closed" => Ok(Self::Closed),
            other => Err(crate::errors::Error::Config {
                message: format!("Unknown stall status '{other}'"),
            }),
        }
    }
}

/// Stall database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stalls")]
pub struct Model {
    /// Unique identifier for the stall
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event the stall belongs to
    pub event_id: i64,
    /// Unique within the event
    pub code: String,
    /// Display name
    pub name: String,
    /// See [`StallStatus`]
    pub status: String,
    /// Vendor running the stall
    pub vendor_user_id: Option<String>,
    /// When the stall was created
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Parses the `status` column.
    pub fn stall_status(&self) -> crate::errors::Result<StallStatus> {
        self.status.parse()
    }
}

/// Defines relationships between Stall and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each stall belongs to one event
    #[sea_orm(
        belongs_to = "super::event::Entity",
        from = "Column::EventId",
        to = "super::event::Column::Id"
    )]
    Event,
    /// One stall sells many products
    #[sea_orm(has_many = "super::stall_product::Entity")]
    Products,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl Related<super::stall_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Products.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
