//! Wallet funding: online top-ups and staff cash grants.
//!
//! Both paths write a [`topup_record`] as the business record and post a
//! balanced transaction that credits the user's wallet and debits platform cash.

use crate::{
    config::ledger::LedgerSettings,
    core::{
        account::{ensure_platform_accounts, ensure_user_wallet, find_user_wallet},
        audit::record_staff_action,
        event::{assert_writable, require_event},
        ledger::{EntryRequest, PostingRequest, balance_of, post_within},
        money::Ucoin,
        retry::with_conflict_retry,
        roles::{Capability, require_capability},
    },
    entities::{TopupRecord, TransactionKind, topup_record},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Set, TransactionTrait, prelude::*};
use serde_json::json;
use tracing::{info, instrument};

/// Provider callback data for an online top-up.
#[derive(Debug, Clone)]
pub struct OnlineTopup {
    /// Paying user
    pub user_id: String,
    /// Amount paid
    pub amount: Ucoin,
    /// Payment provider name
    pub provider: String,
    /// Provider-side payment id
    pub provider_ref: String,
    /// Caller reference; a repeated reference replays the first top-up
    pub source_reference: Option<String>,
}

/// A recorded top-up and the transaction that booked it.
#[derive(Debug, Clone)]
pub struct TopupOutcome {
    /// The business record
    pub record: topup_record::Model,
    /// Ledger transaction id
    pub transaction_id: i64,
    /// True when an earlier top-up with the same source reference was returned
    pub replayed: bool,
}

async fn find_by_source_reference<C>(
    db: &C,
    event_id: i64,
    reference: &str,
) -> Result<Option<topup_record::Model>>
where
    C: ConnectionTrait,
{
    TopupRecord::find()
        .filter(topup_record::Column::EventId.eq(event_id))
        .filter(topup_record::Column::SourceReference.eq(reference))
        .one(db)
        .await
        .map_err(Into::into)
}

fn non_empty(reference: Option<&str>) -> Option<String> {
    reference
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

/// Records a completed online payment and credits the user's wallet.
#[instrument(skip(db, settings, topup), fields(user = %topup.user_id, amount = %topup.amount))]
pub async fn record_online_topup(
    db: &DatabaseConnection,
    settings: &LedgerSettings,
    event_id: i64,
    topup: &OnlineTopup,
) -> Result<TopupOutcome> {
    if !topup.amount.is_positive() {
        return Err(Error::InvalidAmount {
            amount: topup.amount,
        });
    }
    let source_reference = non_empty(topup.source_reference.as_deref());

    let outcome = with_conflict_retry(settings, "record_online_topup", || {
        let source_reference = source_reference.clone();
        async move {
            let txn = db.begin().await?;
            let event = require_event(&txn, event_id).await?;
            assert_writable(&event)?;

            if let Some(reference) = &source_reference
                && let Some(existing) = find_by_source_reference(&txn, event.id, reference).await?
            {
                let transaction_id = existing.ledger_transaction_id.ok_or_else(|| Error::InvalidEntry {
                    message: format!("top-up {} has no ledger transaction", existing.id),
                })?;
                return Ok(TopupOutcome {
                    record: existing,
                    transaction_id,
                    replayed: true,
                });
            }

            let wallet = ensure_user_wallet(&txn, event.id, &topup.user_id).await?;
            let cash = ensure_platform_accounts(&txn, event.id).await?.cash;

            let record = topup_record::ActiveModel {
                event_id: Set(event.id),
                user_id: Set(topup.user_id.clone()),
                channel: Set(topup_record::CHANNEL_ONLINE.to_string()),
                amount: Set(topup.amount.cents()),
                provider: Set(topup.provider.clone()),
                provider_ref: Set(topup.provider_ref.clone()),
                source_reference: Set(source_reference.clone()),
                staff_user_id: Set(None),
                ledger_transaction_id: Set(None),
                created_at: Set(Utc::now()),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            let request = PostingRequest::new(
                TransactionKind::Topup,
                vec![
                    EntryRequest::credit(wallet.id, topup.amount, "Online top-up"),
                    EntryRequest::debit(
                        cash.id,
                        topup.amount,
                        format!("{} payment {}", topup.provider, topup.provider_ref),
                    ),
                ],
            )
            .idempotency_key(format!("topup:{}", record.id))
            .reference("topup_record", record.id)
            .created_by(topup.user_id.clone());
            let posted = post_within(&txn, &event, &request).await?;

            let mut active: topup_record::ActiveModel = record.into();
            active.ledger_transaction_id = Set(Some(posted.transaction.id));
            let record = active.update(&txn).await?;

            txn.commit().await?;
            Ok(TopupOutcome {
                record,
                transaction_id: posted.transaction.id,
                replayed: false,
            })
        }
    })
    .await?;

    if !outcome.replayed {
        info!(
            topup_id = outcome.record.id,
            transaction_id = outcome.transaction_id,
            "online top-up booked"
        );
    }
    Ok(outcome)
}

/// Staff credits a client's wallet for cash handed over in person. Audited.
#[instrument(skip(db, settings))]
pub async fn grant_ucoins(
    db: &DatabaseConnection,
    settings: &LedgerSettings,
    event_id: i64,
    staff_user_id: &str,
    client_user_id: &str,
    amount: Ucoin,
    reason: &str,
) -> Result<TopupOutcome> {
    if !amount.is_positive() {
        return Err(Error::InvalidAmount { amount });
    }

    let outcome = with_conflict_retry(settings, "grant_ucoins", || async move {
        let txn = db.begin().await?;
        let event = require_event(&txn, event_id).await?;
        assert_writable(&event)?;
        require_capability(&txn, event.id, staff_user_id, Capability::GrantUcoins).await?;

        let wallet = ensure_user_wallet(&txn, event.id, client_user_id).await?;
        let cash = ensure_platform_accounts(&txn, event.id).await?.cash;

        let record = topup_record::ActiveModel {
            event_id: Set(event.id),
            user_id: Set(client_user_id.to_string()),
            channel: Set(topup_record::CHANNEL_CASH_STAFF.to_string()),
            amount: Set(amount.cents()),
            provider: Set("cash".to_string()),
            provider_ref: Set(String::new()),
            source_reference: Set(None),
            staff_user_id: Set(Some(staff_user_id.to_string())),
            ledger_transaction_id: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let request = PostingRequest::new(
            TransactionKind::Grant,
            vec![
                EntryRequest::credit(wallet.id, amount, reason),
                EntryRequest::debit(cash.id, amount, format!("Cash received by {staff_user_id}")),
            ],
        )
        .idempotency_key(format!("grant:{}", record.id))
        .reference("topup_record", record.id)
        .created_by(staff_user_id);
        let posted = post_within(&txn, &event, &request).await?;

        let mut active: topup_record::ActiveModel = record.into();
        active.ledger_transaction_id = Set(Some(posted.transaction.id));
        let record = active.update(&txn).await?;

        record_staff_action(
            &txn,
            event.id,
            staff_user_id,
            "grant_ucoins",
            ("topup_record", record.id.to_string()),
            &json!({
                "client": client_user_id,
                "amount": amount.to_string(),
                "reason": reason,
                "transaction_id": posted.transaction.id,
            }),
        )
        .await?;

        txn.commit().await?;
        Ok(TopupOutcome {
            record,
            transaction_id: posted.transaction.id,
            replayed: false,
        })
    })
    .await?;

    info!(
        topup_id = outcome.record.id,
        transaction_id = outcome.transaction_id,
        "staff grant booked"
    );
    Ok(outcome)
}

/// A user's wallet balance in an event; zero if they have no wallet yet.
pub async fn get_balance<C>(db: &C, event_id: i64, user_id: &str) -> Result<Ucoin>
where
    C: ConnectionTrait,
{
    match find_user_wallet(db, event_id, user_id).await? {
        Some(wallet) => balance_of(db, wallet.id).await,
        None => Ok(Ucoin::ZERO),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::audit::list_audit_log;
    use crate::core::ledger::get_transaction;
    use crate::core::roles::{Role, assign_role};
    use crate::test_utils::*;

    fn paypal(user: &str, cents: i64, reference: Option<&str>) -> OnlineTopup {
        OnlineTopup {
            user_id: user.to_string(),
            amount: Ucoin::from_cents(cents),
            provider: "PayPal".to_string(),
            provider_ref: "PAY-1".to_string(),
            source_reference: reference.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_online_topup_credits_wallet() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;

        let outcome =
            record_online_topup(&db, &fast_retry_settings(), event.id, &paypal("alice", 2_500, None))
                .await?;

        assert!(!outcome.replayed);
        assert_eq!(outcome.record.channel, topup_record::CHANNEL_ONLINE);
        assert_eq!(outcome.record.ledger_transaction_id, Some(outcome.transaction_id));
        assert_eq!(get_balance(&db, event.id, "alice").await?, Ucoin::from_cents(2_500));

        let posted = get_transaction(&db, outcome.transaction_id).await?.unwrap();
        assert_eq!(posted.transaction.kind, TransactionKind::Topup.as_str());
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_source_reference_replays() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let topup = paypal("alice", 1_000, Some("order-77"));

        let first = record_online_topup(&db, &fast_retry_settings(), event.id, &topup).await?;
        let second = record_online_topup(&db, &fast_retry_settings(), event.id, &topup).await?;

        assert!(second.replayed);
        assert_eq!(first.record.id, second.record.id);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(get_balance(&db, event.id, "alice").await?, Ucoin::from_cents(1_000));
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_source_reference_is_not_deduplicated() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let topup = paypal("alice", 1_000, Some("  "));

        record_online_topup(&db, &fast_retry_settings(), event.id, &topup).await?;
        let second = record_online_topup(&db, &fast_retry_settings(), event.id, &topup).await?;

        assert!(!second.replayed);
        assert_eq!(get_balance(&db, event.id, "alice").await?, Ucoin::from_cents(2_000));
        Ok(())
    }

    #[tokio::test]
    async fn test_topup_rejects_non_positive_amount() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        let result =
            record_online_topup(&db, &fast_retry_settings(), event.id, &paypal("alice", 0, None)).await;
        assert!(matches!(result, Err(Error::InvalidAmount { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_requires_staff() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        assign_role(&db, event.id, "vendor", Role::Vendor).await?;

        let result = grant_ucoins(
            &db,
            &fast_retry_settings(),
            event.id,
            "vendor",
            "alice",
            Ucoin::whole(10),
            "cash at booth",
        )
        .await;

        assert!(matches!(result, Err(Error::PermissionDenied { .. })));
        assert_eq!(get_balance(&db, event.id, "alice").await?, Ucoin::ZERO);
        Ok(())
    }

    #[tokio::test]
    async fn test_staff_grant_is_booked_and_audited() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        assign_role(&db, event.id, "root", Role::Staff).await?;

        let outcome = grant_ucoins(
            &db,
            &fast_retry_settings(),
            event.id,
            "root",
            "alice",
            Ucoin::whole(15),
            "cash at booth",
        )
        .await?;

        assert_eq!(outcome.record.channel, topup_record::CHANNEL_CASH_STAFF);
        assert_eq!(outcome.record.staff_user_id.as_deref(), Some("root"));
        assert_eq!(get_balance(&db, event.id, "alice").await?, Ucoin::whole(15));

        let log = list_audit_log(&db, event.id).await?;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action_type, "grant_ucoins");
        assert_eq!(log[0].target_id, outcome.record.id.to_string());
        Ok(())
    }

    #[tokio::test]
    async fn test_get_balance_without_wallet_is_zero() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        assert_eq!(get_balance(&db, event.id, "nobody").await?, Ucoin::ZERO);
        Ok(())
    }
}
