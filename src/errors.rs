//! Unified error types and result handling.
//!
//! Every ledger operation returns [`Result`]. Any error raised inside an operation
//! drops the open database transaction, which rolls back all writes made so far.

use crate::core::money::Ucoin;
use sea_orm::DbErr;
use thiserror::Error;

/// All failures surfaced by the ledger core.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration or invalid input that is not an amount.
    #[error("Configuration error: {message}")]
    Config {
        /// Human-readable explanation
        message: String,
    },

    /// Underlying database failure that is not a lock conflict.
    #[error("Database error: {0}")]
    Database(DbErr),

    /// Amount is zero, negative, or overflowed.
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The rejected amount
        amount: Ucoin,
    },

    /// A ledger entry is malformed (unknown account, wrong event, too few entries).
    #[error("Invalid ledger entry: {message}")]
    InvalidEntry {
        /// Human-readable explanation
        message: String,
    },

    /// Total debits differ from total credits.
    #[error("Ledger transaction is not balanced: debits {debits}, credits {credits}")]
    ImbalancedTransaction {
        /// Sum of debit entries
        debits: Ucoin,
        /// Sum of credit entries
        credits: Ucoin,
    },

    /// A user wallet would go negative.
    #[error("Insufficient balance on account {account_id}: available {available}, required {required}")]
    InsufficientBalance {
        /// Wallet account that would be overdrawn
        account_id: i64,
        /// Current cached balance
        available: Ucoin,
        /// Amount the operation needs
        required: Ucoin,
    },

    /// A finite-inventory product lacks quantity.
    #[error("Out of stock for '{product}': available {available}, requested {requested}")]
    OutOfStock {
        /// Product display name
        product: String,
        /// Units left
        available: i64,
        /// Units requested
        requested: i64,
    },

    /// The event does not accept transactions right now.
    #[error("Event '{code}' is not accepting transactions: {reason}")]
    EventWindowClosed {
        /// Event code
        code: String,
        /// Why the window is closed
        reason: String,
    },

    /// The event was already closed.
    #[error("Event '{code}' is already closed")]
    EventAlreadyClosed {
        /// Event code
        code: String,
    },

    /// Lock timeout or serialization failure that outlived the retry budget.
    #[error("Concurrency conflict after {attempts} attempt(s): {message}")]
    ConcurrencyConflict {
        /// How many attempts were made
        attempts: u32,
        /// Database message of the last conflict
        message: String,
    },

    /// Event not found by code or id.
    #[error("Event not found: {code}")]
    EventNotFound {
        /// Code or id that was looked up
        code: String,
    },

    /// Ledger account not found.
    #[error("Account not found: {account}")]
    AccountNotFound {
        /// Account id or code
        account: String,
    },

    /// Stall not found.
    #[error("Stall not found: {id}")]
    StallNotFound {
        /// Stall id
        id: i64,
    },

    /// Stall product not found or inactive.
    #[error("Product not found: {id}")]
    ProductNotFound {
        /// Stall product id
        id: i64,
    },

    /// The stall is not selling right now.
    #[error("Stall '{code}' is not open (status '{status}')")]
    StallNotOpen {
        /// Stall code
        code: String,
        /// Current stall status
        status: String,
    },

    /// Map spot not found.
    #[error("Map spot not found: {id}")]
    SpotNotFound {
        /// Spot id
        id: i64,
    },

    /// The spot is blocked or held by another stall.
    #[error("Map spot '{label}' is {status}")]
    SpotUnavailable {
        /// Spot label
        label: String,
        /// Current spot status
        status: String,
    },

    /// A pickup token was wrong, expired or already redeemed.
    #[error("Invalid or expired pickup token for order {order_id}")]
    InvalidPickupToken {
        /// Order the token was presented for
        order_id: i64,
    },

    /// Order not found.
    #[error("Order not found: {id}")]
    OrderNotFound {
        /// Order id
        id: i64,
    },

    /// A state machine was asked for a transition it does not allow.
    #[error("Invalid {entity} transition from '{from}' to '{to}'")]
    InvalidTransition {
        /// Which state machine
        entity: &'static str,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Actor lacks the role required for the operation.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Human-readable explanation
        message: String,
    },
}

impl Error {
    /// Whether the operation may succeed if retried from scratch.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<DbErr> for Error {
    fn from(err: DbErr) -> Self {
        if is_lock_conflict(&err) {
            Self::ConcurrencyConflict {
                attempts: 1,
                message: err.to_string(),
            }
        } else {
            Self::Database(err)
        }
    }
}

/// Busy/locked on `SQLite`, serialization failure or deadlock on Postgres,
/// or a pool that could not hand out a connection in time.
fn is_lock_conflict(err: &DbErr) -> bool {
    if matches!(err, DbErr::ConnectionAcquire(_)) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    [
        "database is locked",
        "database table is locked",
        "could not serialize access",
        "deadlock detected",
        "lock timeout",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locked_database_is_retryable() {
        let err: Error = DbErr::Custom("database is locked".to_string()).into();
        assert!(err.is_retryable());
        assert!(matches!(err, Error::ConcurrencyConflict { attempts: 1, .. }));
    }

    #[test]
    fn test_other_database_errors_are_not_retryable() {
        let err: Error = DbErr::RecordNotFound("accounts".to_string()).into();
        assert!(!err.is_retryable());
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn test_insufficient_balance_message_formats_amounts() {
        let err = Error::InsufficientBalance {
            account_id: 7,
            available: Ucoin::from_cents(4_000),
            required: Ucoin::from_cents(6_050),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance on account 7: available 40.00, required 60.50"
        );
    }
}
