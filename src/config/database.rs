//! Database configuration module.
//!
//! This module handles the database connection and table creation using `SeaORM`.
//! Tables are generated from the entity definitions with `Schema::create_table_from_entity`,
//! so the schema always matches the Rust structs. Composite uniqueness rules that
//! `SeaORM` attributes cannot express are added as separate indexes.

use crate::entities::{
    Account, BalanceCache, DeliveryLog, Event, EventRole, LedgerEntry, LedgerTransaction, MapSpot,
    PickupToken, SalesOrder, SalesOrderItem, StaffAuditLog, Stall, StallAssignment, StallProduct,
    StockMovement, TopupRecord, account, event_role, ledger_entry, map_spot, pickup_token,
    sales_order, stall, stall_assignment, topup_record,
};
use crate::errors::Result;
use sea_orm::sea_query::{Index, IndexCreateStatement, IntoTableRef};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "sqlite://data/ucoin_ledger.sqlite?mode=rwc";

/// Gets the database URL from environment variable or returns default `SQLite` path.
///
/// This function looks for `DATABASE_URL` in the environment and falls back to
/// a default local `SQLite` file if not found.
#[must_use]
pub fn get_database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database named by `DATABASE_URL`.
///
/// Falls back to a default local `SQLite` file if no environment variable is set.
pub async fn create_connection() -> Result<DatabaseConnection> {
    let database_url = get_database_url();
    debug!("Connecting to database at {database_url}");
    Database::connect(&database_url).await.map_err(Into::into)
}

async fn create_table<E, C>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

fn unique_index(name: &str, table: impl IntoTableRef) -> IndexCreateStatement {
    let mut index = Index::create();
    index.name(name).table(table).unique().if_not_exists();
    index
}

/// Creates all ledger tables if they do not exist yet.
///
/// Besides one table per entity this adds the composite unique indexes:
/// one account code per event, one order number per event, one role grant per
/// (event, user, role), one stall code per event, one spot label per event,
/// one assignment per vendor, stall and spot within an event, and one top-up
/// source reference per event (absent references are `NULL` and never collide).
pub async fn create_tables<C: ConnectionTrait>(db: &C) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    create_table(db, &schema, Event).await?;
    create_table(db, &schema, Account).await?;
    create_table(db, &schema, LedgerTransaction).await?;
    create_table(db, &schema, LedgerEntry).await?;
    create_table(db, &schema, BalanceCache).await?;
    create_table(db, &schema, Stall).await?;
    create_table(db, &schema, StallProduct).await?;
    create_table(db, &schema, StockMovement).await?;
    create_table(db, &schema, SalesOrder).await?;
    create_table(db, &schema, SalesOrderItem).await?;
    create_table(db, &schema, TopupRecord).await?;
    create_table(db, &schema, EventRole).await?;
    create_table(db, &schema, StaffAuditLog).await?;
    create_table(db, &schema, MapSpot).await?;
    create_table(db, &schema, StallAssignment).await?;
    create_table(db, &schema, PickupToken).await?;
    create_table(db, &schema, DeliveryLog).await?;

    let indexes = [
        unique_index("uniq_account_code_by_event", Account)
            .col(account::Column::EventId)
            .col(account::Column::Code)
            .to_owned(),
        unique_index("uniq_order_number_by_event", SalesOrder)
            .col(sales_order::Column::EventId)
            .col(sales_order::Column::OrderNumber)
            .to_owned(),
        unique_index("uniq_event_role", EventRole)
            .col(event_role::Column::EventId)
            .col(event_role::Column::UserId)
            .col(event_role::Column::Role)
            .to_owned(),
        unique_index("uniq_stall_code_by_event", Stall)
            .col(stall::Column::EventId)
            .col(stall::Column::Code)
            .to_owned(),
        unique_index("uniq_topup_source_reference_by_event", TopupRecord)
            .col(topup_record::Column::EventId)
            .col(topup_record::Column::SourceReference)
            .to_owned(),
        unique_index("uniq_spot_label_by_event", MapSpot)
            .col(map_spot::Column::EventId)
            .col(map_spot::Column::Label)
            .to_owned(),
        unique_index("uniq_vendor_assignment_by_event", StallAssignment)
            .col(stall_assignment::Column::EventId)
            .col(stall_assignment::Column::VendorUserId)
            .to_owned(),
        unique_index("uniq_stall_assignment_by_event", StallAssignment)
            .col(stall_assignment::Column::EventId)
            .col(stall_assignment::Column::StallId)
            .to_owned(),
        unique_index("uniq_spot_assignment_by_event", StallAssignment)
            .col(stall_assignment::Column::EventId)
            .col(stall_assignment::Column::SpotId)
            .to_owned(),
    ];
    for index in &indexes {
        db.execute(builder.build(index)).await?;
    }

    let entry_lookup = Index::create()
        .name("idx_ledger_entries_account")
        .table(LedgerEntry)
        .col(ledger_entry::Column::AccountId)
        .col(ledger_entry::Column::Id)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&entry_lookup)).await?;

    let token_lookup = Index::create()
        .name("idx_pickup_tokens_order")
        .table(PickupToken)
        .col(pickup_token::Column::OrderId)
        .col(pickup_token::Column::IsActive)
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&token_lookup)).await?;

    info!("Ledger tables ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{AccountModel, EventModel, LedgerEntryModel, TopupRecordModel};
    use sea_orm::QuerySelect;

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;

        // Test that tables exist by querying them
        let _: Vec<EventModel> = Event::find().limit(1).all(&db).await?;
        let _: Vec<AccountModel> = Account::find().limit(1).all(&db).await?;
        let _: Vec<LedgerEntryModel> = LedgerEntry::find().limit(1).all(&db).await?;
        let _: Vec<TopupRecordModel> = TopupRecord::find().limit(1).all(&db).await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_idempotent() -> Result<()> {
        let db = Database::connect("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }
}
