//! Ledger entry entity - One debit or credit line of a ledger transaction.
//!
//! `amount` is always positive (minor units); `direction` carries the sign.
//! A credit adds to the account balance, a debit subtracts from it.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Side of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Subtracts from the account balance
    Debit,
    /// Adds to the account balance
    Credit,
}

impl Direction {
    /// Value stored in the `direction` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    /// Applies the sign of this direction to a positive amount.
    #[must_use]
    pub const fn signed(self, amount: i64) -> i64 {
        match self {
            Self::Debit => -amount,
            Self::Credit => amount,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            other => Err(crate::errors::Error::Config {
                message: format!("Unknown entry direction '{other}'"),
            }),
        }
    }
}

/// Ledger entry database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    /// Unique identifier
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owning transaction
    pub transaction_id: i64,
    /// Account the entry is booked against
    pub account_id: i64,
    /// Positive amount in minor units
    pub amount: i64,
    /// `"debit"` or `"credit"`
    pub direction: String,
    /// Free-text line description
    pub description: String,
}

impl Model {
    /// Amount with the direction's sign applied (credit positive).
    #[must_use]
    pub fn signed_amount(&self) -> i64 {
        if self.direction == Direction::Debit.as_str() {
            -self.amount
        } else {
            self.amount
        }
    }
}

/// Defines relationships between `LedgerEntry` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each entry belongs to one transaction
    #[sea_orm(
        belongs_to = "super::ledger_transaction::Entity",
        from = "Column::TransactionId",
        to = "super::ledger_transaction::Column::Id"
    )]
    Transaction,
    /// Each entry is booked against one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
}

impl Related<super::ledger_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transaction.def()
    }
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
