//! Double-entry ledger - posts balanced transactions and keeps balance caches exact.
//!
//! A posting is a set of debit/credit entries whose debits and credits sum to the
//! same amount. Posting writes the transaction row, its entries and every affected
//! account's balance cache in the caller's database transaction, so either all of
//! it commits or none of it does. Credits add to a balance and debits subtract.
//!
//! Balance rows are locked in ascending account id before they are read, which
//! keeps two postings over overlapping accounts from deadlocking each other. User
//! wallets are never allowed below zero: the cache update itself is guarded with
//! `balance >= -delta`, so even a backend without row locks cannot overdraw one.

use crate::{
    config::ledger::LedgerSettings,
    core::{event, money::Ucoin, retry::with_conflict_retry},
    entities::{
        Account, BalanceCache, Direction, LedgerEntry, LedgerTransaction, TransactionKind,
        account, balance_cache, ledger_entry, ledger_transaction,
    },
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, QuerySelect, Set, TransactionTrait, prelude::*, sea_query::Expr};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, instrument, warn};

/// One line of a posting request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRequest {
    /// Account to book against
    pub account_id: i64,
    /// Positive amount
    pub amount: Ucoin,
    /// Debit subtracts, credit adds
    pub direction: Direction,
    /// Line description
    pub description: String,
}

impl EntryRequest {
    /// A debit line.
    #[must_use]
    pub fn debit(account_id: i64, amount: Ucoin, description: impl Into<String>) -> Self {
        Self {
            account_id,
            amount,
            direction: Direction::Debit,
            description: description.into(),
        }
    }

    /// A credit line.
    #[must_use]
    pub fn credit(account_id: i64, amount: Ucoin, description: impl Into<String>) -> Self {
        Self {
            account_id,
            amount,
            direction: Direction::Credit,
            description: description.into(),
        }
    }
}

/// A balanced set of entries to post as one ledger transaction.
#[derive(Debug, Clone)]
pub struct PostingRequest {
    /// Business meaning
    pub kind: TransactionKind,
    /// At least two entries
    pub entries: Vec<EntryRequest>,
    /// Re-posting an already committed key returns the original transaction
    pub idempotency_key: Option<String>,
    /// Kind of record behind the posting
    pub reference_model: String,
    /// Id of that record
    pub reference_id: String,
    /// User who triggered the posting
    pub created_by: Option<String>,
}

impl PostingRequest {
    /// Starts a request with no idempotency key or reference.
    #[must_use]
    pub const fn new(kind: TransactionKind, entries: Vec<EntryRequest>) -> Self {
        Self {
            kind,
            entries,
            idempotency_key: None,
            reference_model: String::new(),
            reference_id: String::new(),
            created_by: None,
        }
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Sets the reference to the record that caused the posting.
    #[must_use]
    pub fn reference(mut self, model: impl Into<String>, id: impl ToString) -> Self {
        self.reference_model = model.into();
        self.reference_id = id.to_string();
        self
    }

    /// Sets the acting user.
    #[must_use]
    pub fn created_by(mut self, user_id: impl Into<String>) -> Self {
        self.created_by = Some(user_id.into());
        self
    }
}

/// A committed (or replayed) ledger transaction with its entries.
#[derive(Debug, Clone)]
pub struct PostedTransaction {
    /// The transaction row
    pub transaction: ledger_transaction::Model,
    /// Its entries in insertion order
    pub entries: Vec<ledger_entry::Model>,
    /// True when the idempotency key matched an earlier posting and nothing was written
    pub replayed: bool,
}

/// Checks the shape of a posting without touching the database: at least two
/// entries, all amounts positive, debits equal to credits.
///
/// Returns the net signed delta per account, keyed (and therefore ordered) by
/// ascending account id.
pub fn validate_entries(entries: &[EntryRequest]) -> Result<BTreeMap<i64, i64>> {
    if entries.len() < 2 {
        return Err(Error::InvalidEntry {
            message: format!(
                "a ledger transaction needs at least two entries, got {}",
                entries.len()
            ),
        });
    }

    let mut debits = Ucoin::ZERO;
    let mut credits = Ucoin::ZERO;
    let mut deltas: BTreeMap<i64, i64> = BTreeMap::new();
    for entry in entries {
        if !entry.amount.is_positive() {
            return Err(Error::InvalidAmount {
                amount: entry.amount,
            });
        }
        match entry.direction {
            Direction::Debit => debits = debits.checked_add(entry.amount)?,
            Direction::Credit => credits = credits.checked_add(entry.amount)?,
        }
        *deltas.entry(entry.account_id).or_insert(0) += entry.direction.signed(entry.amount.cents());
    }

    if debits != credits {
        return Err(Error::ImbalancedTransaction { debits, credits });
    }
    Ok(deltas)
}

/// Posts a balanced transaction inside an already open database transaction.
///
/// The caller is responsible for the event-state check (`post_transaction` requires
/// an active event; event close posts expiries while closing). Every account must
/// belong to `event` and be active.
pub async fn post_within<C>(
    db: &C,
    event: &crate::entities::EventModel,
    request: &PostingRequest,
) -> Result<PostedTransaction>
where
    C: ConnectionTrait,
{
    let deltas = validate_entries(&request.entries)?;

    if let Some(key) = &request.idempotency_key
        && let Some(existing) = LedgerTransaction::find()
            .filter(ledger_transaction::Column::IdempotencyKey.eq(key.as_str()))
            .one(db)
            .await?
    {
        if existing.event_id != event.id {
            return Err(Error::InvalidEntry {
                message: format!("idempotency key '{key}' was used in another event"),
            });
        }
        debug!(transaction_id = existing.id, key = %key, "replaying idempotent posting");
        let entries = entries_for_transaction(db, existing.id).await?;
        return Ok(PostedTransaction {
            transaction: existing,
            entries,
            replayed: true,
        });
    }

    let account_ids: Vec<i64> = deltas.keys().copied().collect();
    let accounts: HashMap<i64, account::Model> = Account::find()
        .filter(account::Column::Id.is_in(account_ids.clone()))
        .all(db)
        .await?
        .into_iter()
        .map(|a| (a.id, a))
        .collect();

    for account_id in &account_ids {
        let account = accounts.get(account_id).ok_or_else(|| Error::AccountNotFound {
            account: account_id.to_string(),
        })?;
        if account.event_id != event.id {
            return Err(Error::InvalidEntry {
                message: format!(
                    "account {} belongs to event {}, not {}",
                    account.id, account.event_id, event.code
                ),
            });
        }
        if !account.is_active {
            return Err(Error::InvalidEntry {
                message: format!("account {} is inactive", account.code),
            });
        }
    }

    // Lock balance rows in ascending account id
    let balances: HashMap<i64, i64> = BalanceCache::find()
        .filter(balance_cache::Column::AccountId.is_in(account_ids.clone()))
        .order_by_asc(balance_cache::Column::AccountId)
        .lock_exclusive()
        .all(db)
        .await?
        .into_iter()
        .map(|c| (c.account_id, c.balance))
        .collect();

    for (account_id, delta) in &deltas {
        let available = balances.get(account_id).copied().unwrap_or(0);
        if accounts[account_id].is_user_wallet() && available + delta < 0 {
            return Err(Error::InsufficientBalance {
                account_id: *account_id,
                available: Ucoin::from_cents(available),
                required: Ucoin::from_cents(-delta),
            });
        }
    }

    let now = Utc::now();
    let transaction = ledger_transaction::ActiveModel {
        event_id: Set(event.id),
        kind: Set(request.kind.as_str().to_string()),
        idempotency_key: Set(request.idempotency_key.clone()),
        reference_model: Set(request.reference_model.clone()),
        reference_id: Set(request.reference_id.clone()),
        created_by: Set(request.created_by.clone()),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;

    let mut entries = Vec::with_capacity(request.entries.len());
    for entry in &request.entries {
        let inserted = ledger_entry::ActiveModel {
            transaction_id: Set(transaction.id),
            account_id: Set(entry.account_id),
            amount: Set(entry.amount.cents()),
            direction: Set(entry.direction.as_str().to_string()),
            description: Set(entry.description.clone()),
            ..Default::default()
        }
        .insert(db)
        .await?;
        entries.push(inserted);
    }

    for (account_id, delta) in &deltas {
        let has_cache = balances.contains_key(account_id);
        apply_balance_delta(
            db,
            &accounts[account_id],
            *delta,
            transaction.id,
            has_cache,
        )
        .await?;
    }

    debug!(
        transaction_id = transaction.id,
        kind = %request.kind,
        accounts = account_ids.len(),
        "posted ledger transaction"
    );
    Ok(PostedTransaction {
        transaction,
        entries,
        replayed: false,
    })
}

async fn apply_balance_delta<C>(
    db: &C,
    account: &account::Model,
    delta: i64,
    transaction_id: i64,
    has_cache: bool,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    if !has_cache {
        // Accounts created outside `ensure_account` get their cache row lazily
        balance_cache::ActiveModel {
            account_id: Set(account.id),
            balance: Set(0),
            last_transaction_id: Set(None),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;
    }

    let mut update = BalanceCache::update_many()
        .col_expr(
            balance_cache::Column::Balance,
            Expr::col(balance_cache::Column::Balance).add(delta),
        )
        .col_expr(
            balance_cache::Column::LastTransactionId,
            Expr::value(transaction_id),
        )
        .col_expr(balance_cache::Column::UpdatedAt, Expr::value(now))
        .filter(balance_cache::Column::AccountId.eq(account.id));
    if account.is_user_wallet() && delta < 0 {
        update = update.filter(balance_cache::Column::Balance.gte(-delta));
    }

    let result = update.exec(db).await?;
    if result.rows_affected == 0 {
        let available = BalanceCache::find_by_id(account.id)
            .one(db)
            .await?
            .map_or(0, |c| c.balance);
        return Err(Error::InsufficientBalance {
            account_id: account.id,
            available: Ucoin::from_cents(available),
            required: Ucoin::from_cents(-delta),
        });
    }
    Ok(())
}

/// Posts a balanced transaction into an active event and returns the committed
/// transaction id.
///
/// Runs in its own database transaction and is retried on lock conflicts.
#[instrument(skip(db, settings, request), fields(kind = %request.kind))]
pub async fn post_transaction(
    db: &DatabaseConnection,
    settings: &LedgerSettings,
    event_id: i64,
    request: &PostingRequest,
) -> Result<i64> {
    validate_entries(&request.entries)?;

    let posted = with_conflict_retry(settings, "post_transaction", || async move {
        let txn = db.begin().await?;
        let event = event::require_event(&txn, event_id).await?;
        event::assert_writable(&event)?;
        let posted = post_within(&txn, &event, request).await?;
        txn.commit().await?;
        Ok(posted)
    })
    .await?;

    info!(
        transaction_id = posted.transaction.id,
        replayed = posted.replayed,
        "ledger transaction committed"
    );
    Ok(posted.transaction.id)
}

/// Cached balance of an account.
///
/// Fails with [`Error::AccountNotFound`] if the account does not exist; an
/// account without any postings has balance zero.
pub async fn balance_of<C>(db: &C, account_id: i64) -> Result<Ucoin>
where
    C: ConnectionTrait,
{
    if let Some(cache) = BalanceCache::find_by_id(account_id).one(db).await? {
        return Ok(Ucoin::from_cents(cache.balance));
    }
    Account::find_by_id(account_id)
        .one(db)
        .await?
        .map(|_| Ucoin::ZERO)
        .ok_or_else(|| Error::AccountNotFound {
            account: account_id.to_string(),
        })
}

/// Entries booked against an account, in commit order.
pub async fn list_entries<C>(db: &C, account_id: i64) -> Result<Vec<ledger_entry::Model>>
where
    C: ConnectionTrait,
{
    LedgerEntry::find()
        .filter(ledger_entry::Column::AccountId.eq(account_id))
        .order_by_asc(ledger_entry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Entries of one transaction, in insertion order.
pub async fn entries_for_transaction<C>(db: &C, transaction_id: i64) -> Result<Vec<ledger_entry::Model>>
where
    C: ConnectionTrait,
{
    LedgerEntry::find()
        .filter(ledger_entry::Column::TransactionId.eq(transaction_id))
        .order_by_asc(ledger_entry::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Finds a transaction together with its entries.
pub async fn get_transaction<C>(db: &C, transaction_id: i64) -> Result<Option<PostedTransaction>>
where
    C: ConnectionTrait,
{
    let Some(transaction) = LedgerTransaction::find_by_id(transaction_id).one(db).await? else {
        return Ok(None);
    };
    let entries = entries_for_transaction(db, transaction.id).await?;
    Ok(Some(PostedTransaction {
        transaction,
        entries,
        replayed: false,
    }))
}

/// Transactions of an event, oldest first.
pub async fn list_transactions<C>(db: &C, event_id: i64) -> Result<Vec<ledger_transaction::Model>>
where
    C: ConnectionTrait,
{
    LedgerTransaction::find()
        .filter(ledger_transaction::Column::EventId.eq(event_id))
        .order_by_asc(ledger_transaction::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Sum of an account's signed entries, recomputed from the log.
pub async fn derived_balance<C>(db: &C, account_id: i64) -> Result<Ucoin>
where
    C: ConnectionTrait,
{
    let total = list_entries(db, account_id)
        .await?
        .iter()
        .map(ledger_entry::Model::signed_amount)
        .sum();
    Ok(Ucoin::from_cents(total))
}

/// Outcome of rebuilding one balance cache from the entry log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// Account that was checked
    pub account_id: i64,
    /// Cached balance before reconciling
    pub cached: Ucoin,
    /// Balance derived from the entries
    pub derived: Ucoin,
}

impl Reconciliation {
    /// Whether the cache had drifted and was rewritten.
    #[must_use]
    pub fn drifted(&self) -> bool {
        self.cached != self.derived
    }
}

/// Recomputes an account's balance from its entries and stores it in the cache.
#[instrument(skip(db))]
pub async fn reconcile_balance(db: &DatabaseConnection, account_id: i64) -> Result<Reconciliation> {
    let txn = db.begin().await?;
    let cache = BalanceCache::find_by_id(account_id)
        .lock_exclusive()
        .one(&txn)
        .await?;
    let derived = derived_balance(&txn, account_id).await?;
    let now = Utc::now();

    let cached = if let Some(cache) = cache {
        let cached = Ucoin::from_cents(cache.balance);
        if cached != derived {
            let mut active: balance_cache::ActiveModel = cache.into();
            active.balance = Set(derived.cents());
            active.updated_at = Set(now);
            active.update(&txn).await?;
        }
        cached
    } else {
        Account::find_by_id(account_id)
            .one(&txn)
            .await?
            .ok_or_else(|| Error::AccountNotFound {
                account: account_id.to_string(),
            })?;
        balance_cache::ActiveModel {
            account_id: Set(account_id),
            balance: Set(derived.cents()),
            last_transaction_id: Set(None),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        Ucoin::ZERO
    };
    txn.commit().await?;

    let reconciliation = Reconciliation {
        account_id,
        cached,
        derived,
    };
    if reconciliation.drifted() {
        warn!(account_id, %cached, %derived, "balance cache drift corrected");
    }
    Ok(reconciliation)
}

/// Result of auditing every transaction and balance of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerAudit {
    /// Number of transactions inspected
    pub transactions_checked: usize,
    /// Transactions whose debits and credits differ
    pub unbalanced_transactions: Vec<i64>,
    /// Accounts whose cache differs from their entries
    pub drifted_accounts: Vec<i64>,
}

impl LedgerAudit {
    /// No imbalance and no drift.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.unbalanced_transactions.is_empty() && self.drifted_accounts.is_empty()
    }
}

/// Checks that every transaction of the event balances and every balance cache
/// equals the sum of its account's entries. Read-only.
pub async fn verify_event_ledger<C>(db: &C, event_id: i64) -> Result<LedgerAudit>
where
    C: ConnectionTrait,
{
    let mut audit = LedgerAudit::default();

    for transaction in list_transactions(db, event_id).await? {
        audit.transactions_checked += 1;
        let net: i64 = entries_for_transaction(db, transaction.id)
            .await?
            .iter()
            .map(ledger_entry::Model::signed_amount)
            .sum();
        if net != 0 {
            audit.unbalanced_transactions.push(transaction.id);
        }
    }

    let rows = Account::find()
        .filter(account::Column::EventId.eq(event_id))
        .order_by_asc(account::Column::Id)
        .find_also_related(BalanceCache)
        .all(db)
        .await?;
    for (account, cache) in rows {
        let cached = cache.map_or(0, |c| c.balance);
        if derived_balance(db, account.id).await?.cents() != cached {
            audit.drifted_accounts.push(account.id);
        }
    }

    Ok(audit)
}
