//! Staff audit log entity - One row per privileged staff action.
//!
//! `payload` holds a JSON object describing the action's inputs and outcome.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Staff audit log database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "staff_audit_logs")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event the action was taken in
    pub event_id: i64,
    /// Staff member who acted
    pub staff_user_id: String,
    /// Action name (e.g. `"grant_role"`, `"grant_ucoins"`)
    pub action_type: String,
    /// Kind of record the action touched
    pub target_model: String,
    /// Id of that record
    pub target_id: String,
    /// Serialized JSON payload
    pub payload: String,
    /// When the action happened
    pub created_at: DateTimeUtc,
}

/// `StaffAuditLog` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
