//! Event lifecycle business logic.
//!
//! Events move `draft -> active -> closed`. Only active events accept ledger
//! postings. Closing an event expires every positive user wallet into the
//! platform expiry account and then freezes the event, all in one transaction.

use crate::{
    config::{events::Config, ledger::LedgerSettings},
    core::{
        account::{ensure_platform_accounts, list_funded_wallets},
        ledger::{EntryRequest, PostingRequest, post_within},
        money::Ucoin,
        retry::with_conflict_retry,
        roles::{Role, assign_role},
    },
    entities::{Event, EventStatus, TransactionKind, event},
    errors::{Error, Result},
};
use chrono::{DateTime, Utc};
use sea_orm::{QuerySelect, Set, TransactionTrait, prelude::*};
use tracing::{info, instrument};

/// Attributes of a new event.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Unique operator-facing code
    pub code: String,
    /// Display name
    pub name: String,
    /// Campaign window start
    pub starts_at: DateTime<Utc>,
    /// Campaign window end
    pub ends_at: DateTime<Utc>,
    /// Public window start, defaults to `starts_at`
    pub public_starts_at: Option<DateTime<Utc>>,
    /// Public window end, defaults to `ends_at`
    pub public_ends_at: Option<DateTime<Utc>>,
}

impl NewEvent {
    /// Checks the campaign window is non-empty and the public window is a
    /// non-empty sub-range of it.
    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(Error::Config {
                message: "Event code must not be empty".to_string(),
            });
        }
        if self.starts_at >= self.ends_at {
            return Err(Error::Config {
                message: format!("Event '{}' must start before it ends", self.code),
            });
        }
        let public_start = self.public_starts_at.unwrap_or(self.starts_at);
        let public_end = self.public_ends_at.unwrap_or(self.ends_at);
        if public_start >= public_end {
            return Err(Error::Config {
                message: format!("Event '{}' has an empty public window", self.code),
            });
        }
        if public_start < self.starts_at || public_end > self.ends_at {
            return Err(Error::Config {
                message: format!(
                    "Event '{}' public window must lie inside the campaign window",
                    self.code
                ),
            });
        }
        Ok(())
    }
}

/// Summary of an event close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEventReport {
    /// The closed event
    pub event_id: i64,
    /// Number of wallets that had a positive balance
    pub wallets_expired: usize,
    /// Sum of expired balances
    pub total_expired: Ucoin,
    /// Expiry transaction ids, one per expired wallet
    pub transaction_ids: Vec<i64>,
}

/// Creates a draft event together with its platform accounts.
#[instrument(skip(db, new_event), fields(code = %new_event.code))]
pub async fn create_event<C>(db: &C, new_event: NewEvent) -> Result<event::Model>
where
    C: ConnectionTrait,
{
    new_event.validate()?;

    let now = Utc::now();
    let created = event::ActiveModel {
        code: Set(new_event.code),
        name: Set(new_event.name),
        starts_at: Set(new_event.starts_at),
        ends_at: Set(new_event.ends_at),
        public_starts_at: Set(new_event.public_starts_at),
        public_ends_at: Set(new_event.public_ends_at),
        status: Set(EventStatus::Draft.as_str().to_string()),
        created_at: Set(now),
        closed_at: Set(None),
        ..Default::default()
    }
    .insert(db)
    .await?;

    ensure_platform_accounts(db, created.id).await?;
    info!(event_id = created.id, "created draft event");
    Ok(created)
}

/// Moves a draft event to active.
pub async fn activate_event<C>(db: &C, event_id: i64) -> Result<event::Model>
where
    C: ConnectionTrait,
{
    let event = require_event(db, event_id).await?;
    let status = event.event_status()?;
    if status != EventStatus::Draft {
        return Err(Error::InvalidTransition {
            entity: "event",
            from: status.to_string(),
            to: EventStatus::Active.to_string(),
        });
    }

    let mut active: event::ActiveModel = event.into();
    active.status = Set(EventStatus::Active.as_str().to_string());
    let updated = active.update(db).await?;
    info!(event_id, code = %updated.code, "event activated");
    Ok(updated)
}

/// Gets an event by id.
pub async fn get_event_by_id<C>(db: &C, event_id: i64) -> Result<Option<event::Model>>
where
    C: ConnectionTrait,
{
    Event::find_by_id(event_id).one(db).await.map_err(Into::into)
}

/// Gets an event by its code.
pub async fn get_event_by_code<C>(db: &C, code: &str) -> Result<Option<event::Model>>
where
    C: ConnectionTrait,
{
    Event::find()
        .filter(event::Column::Code.eq(code))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Gets an event by id or fails with [`Error::EventNotFound`].
pub async fn require_event<C>(db: &C, event_id: i64) -> Result<event::Model>
where
    C: ConnectionTrait,
{
    get_event_by_id(db, event_id)
        .await?
        .ok_or_else(|| Error::EventNotFound {
            code: event_id.to_string(),
        })
}

/// Like [`require_event`] but takes an exclusive row lock on the event.
pub async fn require_event_for_update<C>(db: &C, event_id: i64) -> Result<event::Model>
where
    C: ConnectionTrait,
{
    Event::find_by_id(event_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or_else(|| Error::EventNotFound {
            code: event_id.to_string(),
        })
}

/// Fails with [`Error::EventWindowClosed`] unless the event is active.
pub fn assert_writable(event: &event::Model) -> Result<()> {
    match event.event_status()? {
        EventStatus::Active => Ok(()),
        EventStatus::Draft => Err(Error::EventWindowClosed {
            code: event.code.clone(),
            reason: "event has not been activated".to_string(),
        }),
        EventStatus::Closed => Err(Error::EventWindowClosed {
            code: event.code.clone(),
            reason: "event is closed".to_string(),
        }),
    }
}

/// Fails with [`Error::EventAlreadyClosed`] once the event is closed.
///
/// Staff and catalog changes go through this check; draft events accept them
/// so stalls and roles can be prepared before opening.
pub fn assert_not_closed(event: &event::Model) -> Result<()> {
    if event.event_status()? == EventStatus::Closed {
        return Err(Error::EventAlreadyClosed {
            code: event.code.clone(),
        });
    }
    Ok(())
}

/// Fails with [`Error::EventWindowClosed`] unless the event is active and `now`
/// lies inside its public window.
pub fn assert_public_window(event: &event::Model, now: DateTime<Utc>) -> Result<()> {
    assert_writable(event)?;
    let (start, end) = event.public_window();
    if now < start {
        return Err(Error::EventWindowClosed {
            code: event.code.clone(),
            reason: format!("public window opens at {start}"),
        });
    }
    if now >= end {
        return Err(Error::EventWindowClosed {
            code: event.code.clone(),
            reason: format!("public window ended at {end}"),
        });
    }
    Ok(())
}

/// Closes an active event.
///
/// Every user wallet with a positive balance gets one expiry transaction that
/// debits the wallet and credits the expiry account, leaving it at zero. The
/// event is then marked closed and its windows are clamped to now. Stall and
/// system accounts keep their balances.
#[instrument(skip(db, settings))]
pub async fn close_event(
    db: &DatabaseConnection,
    settings: &LedgerSettings,
    event_id: i64,
) -> Result<CloseEventReport> {
    let report = with_conflict_retry(settings, "close_event", || async move {
        let txn = db.begin().await?;
        let event = require_event_for_update(&txn, event_id).await?;
        match event.event_status()? {
            EventStatus::Active => {}
            EventStatus::Closed => {
                return Err(Error::EventAlreadyClosed {
                    code: event.code.clone(),
                });
            }
            EventStatus::Draft => {
                return Err(Error::InvalidTransition {
                    entity: "event",
                    from: EventStatus::Draft.to_string(),
                    to: EventStatus::Closed.to_string(),
                });
            }
        }

        let expiry = ensure_platform_accounts(&txn, event.id).await?.expiry;
        let mut report = CloseEventReport {
            event_id: event.id,
            wallets_expired: 0,
            total_expired: Ucoin::ZERO,
            transaction_ids: Vec::new(),
        };

        for (wallet, cache) in list_funded_wallets(&txn, event.id).await? {
            let amount = Ucoin::from_cents(cache.balance);
            let request = PostingRequest::new(
                TransactionKind::Expiry,
                vec![
                    EntryRequest::debit(wallet.id, amount, "Balance expired at event close"),
                    EntryRequest::credit(expiry.id, amount, format!("Expired {}", wallet.code)),
                ],
            )
            .idempotency_key(format!("expiry:{}:{}", event.id, wallet.id))
            .reference("account", wallet.id);
            let posted = post_within(&txn, &event, &request).await?;

            report.wallets_expired += 1;
            report.total_expired = report.total_expired.checked_add(amount)?;
            report.transaction_ids.push(posted.transaction.id);
        }

        let now = Utc::now();
        let (_, public_end) = event.public_window();
        let clamped_end = event.ends_at.min(now);
        let clamped_public_end = public_end.min(clamped_end);
        let mut active: event::ActiveModel = event.into();
        active.status = Set(EventStatus::Closed.as_str().to_string());
        active.closed_at = Set(Some(now));
        active.ends_at = Set(clamped_end);
        active.public_ends_at = Set(Some(clamped_public_end));
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(report)
    })
    .await?;

    info!(
        event_id,
        wallets = report.wallets_expired,
        total = %report.total_expired,
        "event closed"
    );
    Ok(report)
}

/// Creates the events declared in configuration.
///
/// Idempotent by event code: existing events are left as they are, except that
/// configured staff roles are (re)granted. Returns the events in config order.
pub async fn seed_events<C>(db: &C, config: &Config) -> Result<Vec<event::Model>>
where
    C: ConnectionTrait,
{
    let mut seeded = Vec::with_capacity(config.events.len());
    for event_config in &config.events {
        let mut event = match get_event_by_code(db, &event_config.code).await? {
            Some(existing) => existing,
            None => {
                create_event(
                    db,
                    NewEvent {
                        code: event_config.code.clone(),
                        name: event_config.name.clone(),
                        starts_at: event_config.starts_at,
                        ends_at: event_config.ends_at,
                        public_starts_at: event_config.public_starts_at,
                        public_ends_at: event_config.public_ends_at,
                    },
                )
                .await?
            }
        };

        if event_config.activate && event.event_status()? == EventStatus::Draft {
            event = activate_event(db, event.id).await?;
        }
        for staff_user in &event_config.staff {
            assign_role(db, event.id, staff_user, Role::Staff).await?;
        }
        seeded.push(event);
    }

    info!("Seeded {} event(s) from configuration", seeded.len());
    Ok(seeded)
}
