//! Shared test utilities for the UCoin ledger.
//!
//! This module provides common helper functions for setting up test databases
//! and creating test events, wallets, stalls and products with sensible defaults.

use crate::{
    config::ledger::LedgerSettings,
    core::{
        catalog::{self, NewProduct, Stock},
        checkout::{self, CartItem, CheckoutReceipt},
        event::{self, NewEvent},
        ledger::{self, EntryRequest, PostingRequest},
        account,
        money::Ucoin,
        roles::{self, Role},
    },
    entities::{self, TransactionKind},
    errors::Result,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration as StdDuration;

/// Staff user that test helpers act as.
pub const TEST_STAFF: &str = "test_staff";

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
///
/// The pool holds a single connection: every connection to `sqlite::memory:`
/// is its own database, and concurrent tests must queue on the same one.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// Creates a file-backed `SQLite` database in a fresh temporary directory,
/// served by a pool of `max_connections`.
///
/// Unlike [`setup_test_db`] the connections really run concurrently, so lock
/// conflicts and retries happen for real. Keep the returned directory alive
/// for as long as the database is used.
pub async fn setup_file_test_db(
    max_connections: u32,
) -> Result<(tempfile::TempDir, DatabaseConnection)> {
    let dir = tempfile::tempdir().map_err(|e| crate::errors::Error::Config {
        message: format!("Failed to create temp dir: {e}"),
    })?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.sqlite").display());
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(max_connections)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok((dir, db))
}

/// Returns another handle onto the same connection pool.
///
/// `DatabaseConnection` is not `Clone` while sea-orm's `mock` feature is
/// enabled (as it is for tests), so share the underlying sqlx pool instead.
#[must_use]
pub fn share_connection(db: &DatabaseConnection) -> DatabaseConnection {
    sea_orm::SqlxSqliteConnector::from_sqlx_sqlite_pool(db.get_sqlite_connection_pool().clone())
}

/// Retry settings for tests where several connections fight over the same rows.
#[must_use]
pub const fn contended_retry_settings() -> LedgerSettings {
    LedgerSettings {
        max_retries: 20,
        retry_backoff: StdDuration::from_millis(5),
    }
}

/// Retry settings with a 1ms backoff so conflict paths stay fast.
#[must_use]
pub const fn fast_retry_settings() -> LedgerSettings {
    LedgerSettings {
        max_retries: 3,
        retry_backoff: StdDuration::from_millis(1),
    }
}

/// Routes `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ucoin_ledger=debug")
        .with_test_writer()
        .try_init();
}

/// Creates a draft event running from one hour ago to eight hours from now.
pub async fn create_draft_event(
    db: &DatabaseConnection,
    code: &str,
) -> Result<entities::event::Model> {
    let now = Utc::now();
    event::create_event(
        db,
        NewEvent {
            code: code.to_string(),
            name: format!("Test event {code}"),
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::hours(8),
            public_starts_at: None,
            public_ends_at: None,
        },
    )
    .await
}

/// Creates an active event whose public window contains now, with
/// [`TEST_STAFF`] as staff.
pub async fn create_active_event(
    db: &DatabaseConnection,
    code: &str,
) -> Result<entities::event::Model> {
    let draft = create_draft_event(db, code).await?;
    let active = event::activate_event(db, draft.id).await?;
    roles::assign_role(db, active.id, TEST_STAFF, Role::Staff).await?;
    Ok(active)
}

/// Creates an active event with a custom public window inside a wide campaign window.
pub async fn create_event_with_public_window(
    db: &DatabaseConnection,
    code: &str,
    public_starts_at: DateTime<Utc>,
    public_ends_at: DateTime<Utc>,
) -> Result<entities::event::Model> {
    let now = Utc::now();
    let draft = event::create_event(
        db,
        NewEvent {
            code: code.to_string(),
            name: format!("Test event {code}"),
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
            public_starts_at: Some(public_starts_at),
            public_ends_at: Some(public_ends_at),
        },
    )
    .await?;
    let active = event::activate_event(db, draft.id).await?;
    roles::assign_role(db, active.id, TEST_STAFF, Role::Staff).await?;
    Ok(active)
}

/// Closes the event, expiring every funded wallet.
pub async fn close_test_event(db: &DatabaseConnection, event_id: i64) -> Result<()> {
    event::close_event(db, &fast_retry_settings(), event_id).await?;
    Ok(())
}

/// Fresh database plus one active event coded `"TEST"`.
pub async fn setup_with_active_event() -> Result<(DatabaseConnection, entities::event::Model)> {
    init_test_tracing();
    let db = setup_test_db().await?;
    let event = create_active_event(&db, "TEST").await?;
    Ok((db, event))
}

/// Makes `user` a client of the event and credits their wallet with `cents`
/// from platform cash. Returns the wallet account.
pub async fn fund_wallet(
    db: &DatabaseConnection,
    event_id: i64,
    user: &str,
    cents: i64,
) -> Result<entities::account::Model> {
    roles::ensure_client_membership(db, event_id, user).await?;
    let wallet = account::ensure_user_wallet(db, event_id, user).await?;
    let cash = account::ensure_platform_accounts(db, event_id).await?.cash;
    let amount = Ucoin::from_cents(cents);

    let request = PostingRequest::new(
        TransactionKind::Topup,
        vec![
            EntryRequest::credit(wallet.id, amount, "Test funding"),
            EntryRequest::debit(cash.id, amount, "Test funding"),
        ],
    );
    ledger::post_transaction(db, &fast_retry_settings(), event_id, &request).await?;
    Ok(wallet)
}

/// Creates a stall run by `vendor` with one product priced `price_cents`.
///
/// # Defaults
/// * stall code: `"STALL-<vendor>"`
/// * product name: `"Item of <vendor>"`
/// * stock: unlimited when `stock` is `None`, otherwise finite without threshold
pub async fn create_stall_with_product(
    db: &DatabaseConnection,
    event_id: i64,
    vendor: &str,
    price_cents: i64,
    stock: Option<i64>,
) -> Result<(entities::stall::Model, entities::stall_product::Model)> {
    let stall = catalog::create_stall(
        db,
        event_id,
        TEST_STAFF,
        &format!("STALL-{vendor}"),
        &format!("Stall of {vendor}"),
        vendor,
    )
    .await?;
    let stock = stock.map_or(Stock::Unlimited, |quantity| Stock::Finite {
        quantity,
        low_stock_threshold: None,
    });
    let product = catalog::create_stall_product(
        db,
        stall.id,
        vendor,
        NewProduct {
            name: format!("Item of {vendor}"),
            price: Ucoin::from_cents(price_cents),
            stock,
        },
    )
    .await?;
    Ok((stall, product))
}

/// Buys `quantity` units of one product as `buyer`.
pub async fn checkout_one(
    db: &DatabaseConnection,
    event_id: i64,
    buyer: &str,
    product_id: i64,
    quantity: i64,
) -> Result<CheckoutReceipt> {
    checkout::checkout(
        db,
        &fast_retry_settings(),
        event_id,
        buyer,
        &[CartItem {
            stall_product_id: product_id,
            quantity,
        }],
    )
    .await
}
