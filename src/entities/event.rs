//! Event entity - A time-boxed campaign that scopes every account and transaction.
//!
//! The campaign window (`starts_at`..`ends_at`) bounds all activity; the optional public
//! window is when clients may check out and defaults to the campaign window.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an event: `draft -> active -> closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Being prepared; no transactions yet
    Draft,
    /// Accepting transactions and orders
    Active,
    /// Terminal, read-only
    Closed,
}

impl EventStatus {
    /// Value stored in the `status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(crate::errors::Error::Config {
                message: format!("Unknown event status '{other}'"),
            }),
        }
    }
}

/// Event database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "events")]
pub struct Model {
    /// Unique identifier for the event
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Short unique code used by operators (e.g. `"FERIA-2026"`)
    #[sea_orm(unique)]
    pub code: String,
    /// Display name
    pub name: String,
    /// Campaign window start
    pub starts_at: DateTimeUtc,
    /// Campaign window end
    pub ends_at: DateTimeUtc,
    /// Public window start, `None` means `starts_at`
    pub public_starts_at: Option<DateTimeUtc>,
    /// Public window end, `None` means `ends_at`
    pub public_ends_at: Option<DateTimeUtc>,
    /// One of `"draft"`, `"active"`, `"closed"`
    pub status: String,
    /// When the event was created
    pub created_at: DateTimeUtc,
    /// When the event was closed
    pub closed_at: Option<DateTimeUtc>,
}

impl Model {
    /// Parsed lifecycle state.
    pub fn event_status(&self) -> crate::errors::Result<EventStatus> {
        self.status.parse()
    }

    /// Effective public window, falling back to the campaign window.
    #[must_use]
    pub fn public_window(&self) -> (DateTimeUtc, DateTimeUtc) {
        (
            self.public_starts_at.unwrap_or(self.starts_at),
            self.public_ends_at.unwrap_or(self.ends_at),
        )
    }
}

/// Defines relationships between Event and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One event has many ledger accounts
    #[sea_orm(has_many = "super::account::Entity")]
    Accounts,
    /// One event has many ledger transactions
    #[sea_orm(has_many = "super::ledger_transaction::Entity")]
    LedgerTransactions,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Accounts.def()
    }
}

impl Related<super::ledger_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LedgerTransactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
