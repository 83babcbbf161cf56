//! Map spot entity - A numbered place on the event floor plan that a stall can occupy.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Occupancy of a spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotStatus {
    /// Free to assign
    Available,
    /// Held by a stall assignment
    Assigned,
    /// Taken out of use by staff
    Blocked,
}

impl SpotStatus {
    /// Value stored in the `status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Assigned => "assigned",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for SpotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpotStatus {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "available" => Ok(Self::Available),
            "assigned" => Ok(Self::Assigned),
            "blocked" => Ok(Self::Blocked),
            other => Err(crate::errors::Error::Config {
                message: format!("Unknown spot status '{other}'"),
            }),
        }
    }
}

/// Map spot database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "map_spots")]
pub struct Model {
    /// Unique identifier for the spot
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event whose floor plan holds the spot
    pub event_id: i64,
    /// Area of the floor plan (e.g. `"North hall"`)
    pub zone: String,
    /// Unique within the event
    pub label: String,
    /// See [`SpotStatus`]
    pub status: String,
}

impl Model {
    /// Parses the `status` column.
    pub fn spot_status(&self) -> crate::errors::Result<SpotStatus> {
        self.status.parse()
    }
}

/// Defines relationships between `MapSpot` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each spot belongs to one event
    #[sea_orm(
        belongs_to = "super::event::Entity",
        from = "Column::EventId",
        to = "super::event::Column::Id"
    )]
    Event,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
