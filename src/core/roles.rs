//! Role and permission gate.
//!
//! Roles are granted per event. Each role unlocks a fixed set of capabilities;
//! a user's capabilities in an event are the union over their roles.

use crate::{
    core::{
        account::ensure_user_wallet,
        audit::record_staff_action,
        event::{assert_not_closed, require_event_for_update},
    },
    entities::{EventRole, event_role},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Set, SqlErr, TransactionTrait, prelude::*};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{info, instrument};

/// A role a user can hold within an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Buys with a wallet
    Client,
    /// Runs a stall
    Vendor,
    /// Operates the event
    Staff,
}

impl Role {
    /// Value stored in the `role` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Vendor => "vendor",
            Self::Staff => "staff",
        }
    }

    /// Capabilities unlocked by this role.
    #[must_use]
    pub const fn capabilities(self) -> &'static [Capability] {
        match self {
            Self::Client => &[Capability::AccessClientPortal, Capability::Checkout],
            Self::Vendor => &[
                Capability::AccessVendorPortal,
                Capability::ManageProducts,
                Capability::VerifyOrders,
            ],
            Self::Staff => &[
                Capability::AccessStaffPanel,
                Capability::ManageRoles,
                Capability::AssignStalls,
                Capability::GrantUcoins,
            ],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "client" => Ok(Self::Client),
            "vendor" => Ok(Self::Vendor),
            "staff" => Ok(Self::Staff),
            other => Err(Error::Config {
                message: format!("Unknown role '{other}'"),
            }),
        }
    }
}

/// Something a user may do in an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Open the client portal
    AccessClientPortal,
    /// Pay for a cart
    Checkout,
    /// Open the vendor portal
    AccessVendorPortal,
    /// Create products and adjust stock
    ManageProducts,
    /// Advance orders and redeem pickup tokens
    VerifyOrders,
    /// Open the staff panel
    AccessStaffPanel,
    /// Grant and revoke vendor/staff roles
    ManageRoles,
    /// Create stalls and assign vendors
    AssignStalls,
    /// Credit wallets for cash received
    GrantUcoins,
}

/// Roles the user holds in the event. Unknown role strings are skipped.
pub async fn roles_of<C>(db: &C, event_id: i64, user_id: &str) -> Result<BTreeSet<Role>>
where
    C: ConnectionTrait,
{
    let rows = EventRole::find()
        .filter(event_role::Column::EventId.eq(event_id))
        .filter(event_role::Column::UserId.eq(user_id))
        .all(db)
        .await?;
    Ok(rows.iter().filter_map(|r| r.role.parse().ok()).collect())
}

/// Union of the capabilities of every role the user holds in the event.
pub async fn capabilities<C>(db: &C, event_id: i64, user_id: &str) -> Result<BTreeSet<Capability>>
where
    C: ConnectionTrait,
{
    Ok(roles_of(db, event_id, user_id)
        .await?
        .into_iter()
        .flat_map(|role| role.capabilities().iter().copied())
        .collect())
}

/// Fails with [`Error::PermissionDenied`] unless the user has `capability`.
pub async fn require_capability<C>(
    db: &C,
    event_id: i64,
    user_id: &str,
    capability: Capability,
) -> Result<()>
where
    C: ConnectionTrait,
{
    if capabilities(db, event_id, user_id).await?.contains(&capability) {
        Ok(())
    } else {
        Err(Error::PermissionDenied {
            message: format!("user '{user_id}' lacks {capability:?} in event {event_id}"),
        })
    }
}

/// Grants a role without any permission check. Returns `true` if the role was new.
pub async fn assign_role<C>(db: &C, event_id: i64, user_id: &str, role: Role) -> Result<bool>
where
    C: ConnectionTrait,
{
    let existing = EventRole::find()
        .filter(event_role::Column::EventId.eq(event_id))
        .filter(event_role::Column::UserId.eq(user_id))
        .filter(event_role::Column::Role.eq(role.as_str()))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(false);
    }

    let inserted = event_role::ActiveModel {
        event_id: Set(event_id),
        user_id: Set(user_id.to_string()),
        role: Set(role.as_str().to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await;

    match inserted {
        Ok(_) => Ok(true),
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Makes the user a client of the event and opens their wallet. Idempotent.
pub async fn ensure_client_membership<C>(db: &C, event_id: i64, user_id: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    assign_role(db, event_id, user_id, Role::Client).await?;
    ensure_user_wallet(db, event_id, user_id).await?;
    Ok(())
}

fn ensure_manageable(role: Role) -> Result<()> {
    if role == Role::Client {
        return Err(Error::PermissionDenied {
            message: "client membership is not managed by staff".to_string(),
        });
    }
    Ok(())
}

/// Staff grants a vendor or staff role to a user. Audited.
#[instrument(skip(db))]
pub async fn grant_role(
    db: &DatabaseConnection,
    event_id: i64,
    staff_user_id: &str,
    target_user_id: &str,
    role: Role,
) -> Result<bool> {
    ensure_manageable(role)?;

    let txn = db.begin().await?;
    assert_not_closed(&require_event_for_update(&txn, event_id).await?)?;
    require_capability(&txn, event_id, staff_user_id, Capability::ManageRoles).await?;
    let created = assign_role(&txn, event_id, target_user_id, role).await?;
    record_staff_action(
        &txn,
        event_id,
        staff_user_id,
        "grant_role",
        ("event_role", target_user_id.to_string()),
        &json!({ "role": role.as_str(), "created": created }),
    )
    .await?;
    txn.commit().await?;

    info!(event_id, staff = staff_user_id, user = target_user_id, %role, "role granted");
    Ok(created)
}

/// Staff revokes a vendor or staff role. Staff cannot revoke their own staff role.
/// Returns `true` if a role was removed. Audited.
#[instrument(skip(db))]
pub async fn revoke_role(
    db: &DatabaseConnection,
    event_id: i64,
    staff_user_id: &str,
    target_user_id: &str,
    role: Role,
) -> Result<bool> {
    ensure_manageable(role)?;
    if role == Role::Staff && staff_user_id == target_user_id {
        return Err(Error::PermissionDenied {
            message: "staff cannot revoke their own staff role".to_string(),
        });
    }

    let txn = db.begin().await?;
    assert_not_closed(&require_event_for_update(&txn, event_id).await?)?;
    require_capability(&txn, event_id, staff_user_id, Capability::ManageRoles).await?;
    let deleted = EventRole::delete_many()
        .filter(event_role::Column::EventId.eq(event_id))
        .filter(event_role::Column::UserId.eq(target_user_id))
        .filter(event_role::Column::Role.eq(role.as_str()))
        .exec(&txn)
        .await?;
    let removed = deleted.rows_affected > 0;
    record_staff_action(
        &txn,
        event_id,
        staff_user_id,
        "revoke_role",
        ("event_role", target_user_id.to_string()),
        &json!({ "role": role.as_str(), "removed": removed }),
    )
    .await?;
    txn.commit().await?;

    info!(event_id, staff = staff_user_id, user = target_user_id, %role, removed, "role revoked");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::account::find_user_wallet;
    use crate::core::audit::list_audit_log;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_capabilities_are_union_of_roles() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        assign_role(&db, event.id, "alice", Role::Client).await?;
        assign_role(&db, event.id, "alice", Role::Vendor).await?;

        let caps = capabilities(&db, event.id, "alice").await?;

        assert!(caps.contains(&Capability::Checkout));
        assert!(caps.contains(&Capability::VerifyOrders));
        assert!(!caps.contains(&Capability::GrantUcoins));
        assert_eq!(caps.len(), 5);
        Ok(())
    }

    #[tokio::test]
    async fn test_roles_are_scoped_to_event() -> Result<()> {
        let db = setup_test_db().await?;
        let first = create_active_event(&db, "ONE").await?;
        let second = create_active_event(&db, "TWO").await?;
        assign_role(&db, first.id, "root", Role::Staff).await?;

        assert!(capabilities(&db, second.id, "root").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_client_membership_is_idempotent() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;

        ensure_client_membership(&db, event.id, "alice").await?;
        ensure_client_membership(&db, event.id, "alice").await?;

        assert_eq!(roles_of(&db, event.id, "alice").await?.len(), 1);
        assert!(find_user_wallet(&db, event.id, "alice").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_only_staff_can_grant_roles() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        assign_role(&db, event.id, "mallory", Role::Vendor).await?;

        let result = grant_role(&db, event.id, "mallory", "bob", Role::Vendor).await;

        assert!(matches!(result, Err(Error::PermissionDenied { .. })));
        assert!(roles_of(&db, event.id, "bob").await?.is_empty());
        assert!(list_audit_log(&db, event.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_grant_and_revoke_are_audited() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        assign_role(&db, event.id, "root", Role::Staff).await?;

        assert!(grant_role(&db, event.id, "root", "bob", Role::Vendor).await?);
        assert!(!grant_role(&db, event.id, "root", "bob", Role::Vendor).await?);
        assert!(revoke_role(&db, event.id, "root", "bob", Role::Vendor).await?);

        let log = list_audit_log(&db, event.id).await?;
        let actions: Vec<_> = log.iter().map(|r| r.action_type.as_str()).collect();
        assert_eq!(actions, vec!["grant_role", "grant_role", "revoke_role"]);
        assert!(roles_of(&db, event.id, "bob").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_staff_cannot_revoke_own_staff_role() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        assign_role(&db, event.id, "root", Role::Staff).await?;

        let result = revoke_role(&db, event.id, "root", "root", Role::Staff).await;

        assert!(matches!(result, Err(Error::PermissionDenied { .. })));
        assert!(roles_of(&db, event.id, "root").await?.contains(&Role::Staff));
        Ok(())
    }

    #[tokio::test]
    async fn test_client_role_is_not_staff_managed() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        assign_role(&db, event.id, "root", Role::Staff).await?;

        let result = grant_role(&db, event.id, "root", "bob", Role::Client).await;
        assert!(matches!(result, Err(Error::PermissionDenied { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_event_roles_are_frozen() -> Result<()> {
        let (db, event) = setup_with_active_event().await?;
        grant_role(&db, event.id, TEST_STAFF, "vera", Role::Vendor).await?;
        close_test_event(&db, event.id).await?;

        let granted = grant_role(&db, event.id, TEST_STAFF, "bob", Role::Vendor).await;
        let revoked = revoke_role(&db, event.id, TEST_STAFF, "vera", Role::Vendor).await;

        assert!(matches!(granted, Err(Error::EventAlreadyClosed { .. })));
        assert!(matches!(revoked, Err(Error::EventAlreadyClosed { .. })));
        assert!(roles_of(&db, event.id, "bob").await?.is_empty());
        assert!(roles_of(&db, event.id, "vera").await?.contains(&Role::Vendor));
        assert_eq!(list_audit_log(&db, event.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_roles_can_be_prepared_on_draft_event() -> Result<()> {
        let db = setup_test_db().await?;
        let draft = create_draft_event(&db, "DRAFT").await?;
        assign_role(&db, draft.id, TEST_STAFF, Role::Staff).await?;

        assert!(grant_role(&db, draft.id, TEST_STAFF, "vera", Role::Vendor).await?);
        Ok(())
    }
}
