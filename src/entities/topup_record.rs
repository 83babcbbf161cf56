//! Top-up record entity - Business record behind `topup` and `grant` postings.
//!
//! `source_reference`, when present, is unique per event and makes provider
//! callbacks idempotent.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Top-up paid online through a payment provider.
pub const CHANNEL_ONLINE: &str = "online";
/// Top-up paid in cash to a staff member.
pub const CHANNEL_CASH_STAFF: &str = "cash_staff";

/// Top-up record database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "topup_records")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event the top-up belongs to
    pub event_id: i64,
    /// User whose wallet was credited
    pub user_id: String,
    /// `"online"` or `"cash_staff"`
    pub channel: String,
    /// Positive amount in minor units
    pub amount: i64,
    /// Payment provider name (e.g. `"PayPal"`, `"cash"`)
    pub provider: String,
    /// Provider-side reference
    pub provider_ref: String,
    /// Caller reference used for idempotency
    pub source_reference: Option<String>,
    /// Staff member who took the cash
    pub staff_user_id: Option<String>,
    /// Ledger transaction that booked the top-up
    pub ledger_transaction_id: Option<i64>,
    /// When the top-up was recorded
    pub created_at: DateTimeUtc,
}

/// `TopupRecord` is looked up by event and reference only
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
