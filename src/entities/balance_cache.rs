//! Balance cache entity - Denormalized current balance of one account.
//!
//! Only the ledger service writes these rows. Each one can be rebuilt from the entry log.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Balance cache database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "balance_caches")]
pub struct Model {
    /// Account this balance belongs to
    #[sea_orm(primary_key, auto_increment = false)]
    pub account_id: i64,
    /// Sum of the account's signed entries, in minor units
    pub balance: i64,
    /// Last transaction that touched the account
    pub last_transaction_id: Option<i64>,
    /// When the balance last changed
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `BalanceCache` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each cache row mirrors one account
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::AccountId",
        to = "super::account::Column::Id"
    )]
    Account,
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
