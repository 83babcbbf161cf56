//! Event role entity - Grants a user a role (`client`, `vendor`, `staff`) in one event.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Event role database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "event_roles")]
pub struct Model {
    /// Unique identifier for the grant
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event the role applies to
    pub event_id: i64,
    /// User holding the role
    pub user_id: String,
    /// `"client"`, `"vendor"` or `"staff"`
    pub role: String,
    /// When the role was granted
    pub created_at: DateTimeUtc,
}

/// Event roles have no navigable relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
