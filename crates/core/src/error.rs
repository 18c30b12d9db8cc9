//! Ledger error model.

use thiserror::Error;

use crate::id::{InvoiceId, LineItemId, PaymentId};

/// Result type used across the ledger domain layer.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Domain-level ledger error.
///
/// Keep this focused on deterministic business failures (validation,
/// allocation rules). Infrastructure concerns belong elsewhere. None of these
/// variants implies any mutation took place: every failure path fails closed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A request was malformed or internally inconsistent
    /// (e.g. line-item splits that do not sum to the invoice-level amount).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested total exceeds the payment's unapplied amount.
    #[error("insufficient funds: requested {requested}, unapplied {unapplied}")]
    InsufficientFunds { requested: i64, unapplied: i64 },

    /// A request exceeds the target invoice's or line item's open amount.
    #[error("over-allocation: requested {requested}, available {available}")]
    OverAllocation { requested: i64, available: i64 },

    /// The payment is on hold or deleted and cannot move money.
    #[error("payment {0} is locked")]
    PaymentLocked(PaymentId),

    /// A target invoice was not found (or not loadable for this operation).
    #[error("invoice {0} not found")]
    InvoiceNotFound(InvoiceId),

    /// A split referenced a line item that does not belong to the invoice.
    #[error("line item {0} not found")]
    LineItemNotFound(LineItemId),

    /// No allocation exists for the (payment, invoice) pair.
    ///
    /// Reversal is not idempotent by design: a double-unapply surfaces here
    /// as a logic/race signal instead of being silently ignored.
    #[error("allocation not found")]
    AllocationNotFound,

    /// An identifier was invalid (parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn insufficient_funds(requested: i64, unapplied: i64) -> Self {
        Self::InsufficientFunds {
            requested,
            unapplied,
        }
    }

    pub fn over_allocation(requested: i64, available: i64) -> Self {
        Self::OverAllocation {
            requested,
            available,
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
