//! Ledger transaction entity - One atomic, balanced financial action.
//!
//! Rows are written once together with their entries and never updated afterwards.
//! `idempotency_key`, when given, is unique so a retried request cannot post twice.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Business meaning of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Wallet top-up paid through a provider
    Topup,
    /// Credit granted by staff against cash received
    Grant,
    /// Checkout payment
    Payment,
    /// Balance expiry at event close
    Expiry,
    /// Manual correction
    Adjustment,
}

impl TransactionKind {
    /// Value stored in the `kind` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Topup => "topup",
            Self::Grant => "grant",
            Self::Payment => "payment",
            Self::Expiry => "expiry",
            Self::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "topup" => Ok(Self::Topup),
            "grant" => Ok(Self::Grant),
            "payment" => Ok(Self::Payment),
            "expiry" => Ok(Self::Expiry),
            "adjustment" => Ok(Self::Adjustment),
            other => Err(crate::errors::Error::Config {
                message: format!("Unknown transaction kind '{other}'"),
            }),
        }
    }
}

/// Ledger transaction database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_transactions")]
pub struct Model {
    /// Unique identifier, monotonically increasing in commit order
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event the transaction belongs to
    pub event_id: i64,
    /// See [`TransactionKind`]
    pub kind: String,
    /// Caller-supplied key; re-posting the same key is a no-op
    #[sea_orm(unique)]
    pub idempotency_key: Option<String>,
    /// Name of the record that caused the posting (e.g. `"sales_order"`)
    pub reference_model: String,
    /// Id of that record
    pub reference_id: String,
    /// User who triggered the posting, `None` for operator batches
    pub created_by: Option<String>,
    /// Commit time
    pub created_at: DateTimeUtc,
}

/// Defines relationships between `LedgerTransaction` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each transaction belongs to one event
    #[sea_orm(
        belongs_to = "super::event::Entity",
        from = "Column::EventId",
        to = "super::event::Column::Id"
    )]
    Event,
    /// One transaction owns its entries
    #[sea_orm(has_many = "super::ledger_entry::Entity")]
    Entries,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl Related<super::ledger_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Entries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
