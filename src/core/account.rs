//! Ledger account business logic.
//!
//! Accounts are created on demand ("ensure" semantics) together with their zeroed
//! balance cache row, so every account the ledger touches always has a cache row.
//! Codes are unique per event: platform accounts use fixed codes, wallets use
//! `WALLET_USER_<user>` and stall revenue accounts use `STALL_<stall id>`.

use crate::{
    entities::{Account, AccountKind, BalanceCache, account, balance_cache},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, SqlErr, prelude::*};
use tracing::debug;

/// Platform cash account, debited when money enters the system.
pub const PLATFORM_CASH_CODE: &str = "PLATFORM_CASH";
/// Platform revenue account.
pub const PLATFORM_REVENUE_CODE: &str = "PLATFORM_REVENUE";
/// Write-off account credited when balances expire at event close.
pub const PLATFORM_EXPIRY_CODE: &str = "PLATFORM_EXPIRY";

/// Code of a user's wallet account.
#[must_use]
pub fn wallet_code(user_id: &str) -> String {
    format!("WALLET_USER_{user_id}")
}

/// Code of a stall's revenue account.
#[must_use]
pub fn stall_code(stall_id: i64) -> String {
    format!("STALL_{stall_id}")
}

/// Attributes of an account to look up or create.
#[derive(Debug, Clone)]
pub struct AccountSpec {
    /// Code unique within the event
    pub code: String,
    /// Display name used when the account is created
    pub name: String,
    /// What the account represents
    pub kind: AccountKind,
    /// Owning user for wallets
    pub owner_user_id: Option<String>,
    /// Owning stall for stall accounts
    pub owner_stall_id: Option<i64>,
}

/// The three per-event platform accounts.
#[derive(Debug, Clone)]
pub struct PlatformAccounts {
    /// Cash received for top-ups and grants
    pub cash: account::Model,
    /// Platform revenue
    pub revenue: account::Model,
    /// Expiry write-off
    pub expiry: account::Model,
}

/// Finds the account with `spec.code` in the event, creating it and its zero
/// balance cache row if missing.
pub async fn ensure_account<C>(db: &C, event_id: i64, spec: AccountSpec) -> Result<account::Model>
where
    C: ConnectionTrait,
{
    if let Some(existing) = find_account_by_code(db, event_id, &spec.code).await? {
        return Ok(existing);
    }

    let now = Utc::now();
    let new_account = account::ActiveModel {
        event_id: Set(event_id),
        code: Set(spec.code.clone()),
        name: Set(spec.name),
        kind: Set(spec.kind.as_str().to_string()),
        owner_user_id: Set(spec.owner_user_id),
        owner_stall_id: Set(spec.owner_stall_id),
        is_active: Set(true),
        created_at: Set(now),
        ..Default::default()
    };

    let created = match new_account.insert(db).await {
        Ok(created) => created,
        // Someone else opened it between our lookup and insert
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            return find_account_by_code(db, event_id, &spec.code)
                .await?
                .ok_or(Error::AccountNotFound { account: spec.code });
        }
        Err(err) => return Err(err.into()),
    };

    balance_cache::ActiveModel {
        account_id: Set(created.id),
        balance: Set(0),
        last_transaction_id: Set(None),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    debug!(event_id, code = %created.code, kind = %created.kind, "opened ledger account");
    Ok(created)
}

/// Ensures the cash, revenue and expiry accounts of an event exist.
pub async fn ensure_platform_accounts<C>(db: &C, event_id: i64) -> Result<PlatformAccounts>
where
    C: ConnectionTrait,
{
    let system = |code: &str, name: &str| AccountSpec {
        code: code.to_string(),
        name: name.to_string(),
        kind: AccountKind::System,
        owner_user_id: None,
        owner_stall_id: None,
    };
    let cash = ensure_account(db, event_id, system(PLATFORM_CASH_CODE, "Platform cash")).await?;
    let revenue =
        ensure_account(db, event_id, system(PLATFORM_REVENUE_CODE, "Platform revenue")).await?;
    let expiry =
        ensure_account(db, event_id, system(PLATFORM_EXPIRY_CODE, "Expired balances")).await?;
    Ok(PlatformAccounts {
        cash,
        revenue,
        expiry,
    })
}

/// Ensures the user's wallet account in the event exists.
pub async fn ensure_user_wallet<C>(db: &C, event_id: i64, user_id: &str) -> Result<account::Model>
where
    C: ConnectionTrait,
{
    ensure_account(
        db,
        event_id,
        AccountSpec {
            code: wallet_code(user_id),
            name: format!("Wallet of {user_id}"),
            kind: AccountKind::User,
            owner_user_id: Some(user_id.to_string()),
            owner_stall_id: None,
        },
    )
    .await
}

/// Ensures the revenue account of a stall exists.
pub async fn ensure_stall_account<C>(db: &C, event_id: i64, stall_id: i64) -> Result<account::Model>
where
    C: ConnectionTrait,
{
    ensure_account(
        db,
        event_id,
        AccountSpec {
            code: stall_code(stall_id),
            name: format!("Stall {stall_id} sales"),
            kind: AccountKind::Stall,
            owner_user_id: None,
            owner_stall_id: Some(stall_id),
        },
    )
    .await
}

/// Finds an account by its code within an event.
pub async fn find_account_by_code<C>(db: &C, event_id: i64, code: &str) -> Result<Option<account::Model>>
where
    C: ConnectionTrait,
{
    Account::find()
        .filter(account::Column::EventId.eq(event_id))
        .filter(account::Column::Code.eq(code))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a user's wallet without creating it.
pub async fn find_user_wallet<C>(db: &C, event_id: i64, user_id: &str) -> Result<Option<account::Model>>
where
    C: ConnectionTrait,
{
    find_account_by_code(db, event_id, &wallet_code(user_id)).await
}

/// Finds an account by id.
pub async fn get_account_by_id<C>(db: &C, account_id: i64) -> Result<Option<account::Model>>
where
    C: ConnectionTrait,
{
    Account::find_by_id(account_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Lists every account of an event in ascending id order.
pub async fn list_accounts_for_event<C>(db: &C, event_id: i64) -> Result<Vec<account::Model>>
where
    C: ConnectionTrait,
{
    Account::find()
        .filter(account::Column::EventId.eq(event_id))
        .order_by_asc(account::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// User wallets of an event whose cached balance is strictly positive, ascending by id.
pub async fn list_funded_wallets<C>(
    db: &C,
    event_id: i64,
) -> Result<Vec<(account::Model, balance_cache::Model)>>
where
    C: ConnectionTrait,
{
    let rows = Account::find()
        .filter(account::Column::EventId.eq(event_id))
        .filter(account::Column::Kind.eq(AccountKind::User.as_str()))
        .order_by_asc(account::Column::Id)
        .find_also_related(BalanceCache)
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(account, cache)| cache.map(|cache| (account, cache)))
        .filter(|(_, cache)| cache.balance > 0)
        .collect())
}
