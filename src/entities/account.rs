//! Account entity - A ledger account scoped to one event.
//!
//! User wallets are identified by `owner_user_id`, stall revenue accounts by
//! `owner_stall_id`, and platform accounts (cash, revenue, expiry) by well-known codes.
//! `code` is unique within an event.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What an account represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// A user's wallet; its balance may never go negative
    User,
    /// A stall's revenue account
    Stall,
    /// A platform account (cash, revenue, expiry write-off)
    System,
}

impl AccountKind {
    /// Value stored in the `kind` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Stall => "stall",
            Self::System => "system",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountKind {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "stall" => Ok(Self::Stall),
            "system" => Ok(Self::System),
            other => Err(crate::errors::Error::Config {
                message: format!("Unknown account kind '{other}'"),
            }),
        }
    }
}

/// Account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    /// Unique identifier for the account
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Event this account belongs to
    pub event_id: i64,
    /// Code unique within the event (e.g. `"WALLET_USER_alice"`, `"PLATFORM_CASH"`)
    pub code: String,
    /// Display name
    pub name: String,
    /// One of `"user"`, `"stall"`, `"system"`
    pub kind: String,
    /// Owning user for wallet accounts
    pub owner_user_id: Option<String>,
    /// Owning stall for stall revenue accounts
    pub owner_stall_id: Option<i64>,
    /// Inactive accounts cannot receive new entries
    pub is_active: bool,
    /// When the account was opened
    pub created_at: DateTimeUtc,
}

impl Model {
    /// Parsed account kind.
    pub fn account_kind(&self) -> crate::errors::Result<AccountKind> {
        self.kind.parse()
    }

    /// Whether this is a user wallet (non-negative balance enforced).
    #[must_use]
    pub fn is_user_wallet(&self) -> bool {
        self.kind == AccountKind::User.as_str()
    }
}

/// Defines relationships between Account and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each account belongs to one event
    #[sea_orm(
        belongs_to = "super::event::Entity",
        from = "Column::EventId",
        to = "super::event::Column::Id"
    )]
    Event,
    /// One account has many ledger entries
    #[sea_orm(has_many = "super::ledger_entry::Entity")]
    Entries,
    /// One account has one balance cache row
    #[sea_orm(has_one = "super::balance_cache::Entity")]
    BalanceCache,
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

impl Related<super::balance_cache::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BalanceCache.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
