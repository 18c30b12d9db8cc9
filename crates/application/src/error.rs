use thiserror::Error;

use labbill_core::LedgerError;
use labbill_infra::StoreError;

/// Service-level failure kinds callers branch on.
///
/// Domain rejections keep their original [`LedgerError`] so the presentation
/// layer can surface the offending amounts verbatim. Store failures stay
/// separate; the service never auto-retries them (resubmission is cheap and
/// re-validation is required anyway).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] LedgerError),

    /// A row version moved between read and commit. Nothing was applied;
    /// the operation is safe to resubmit.
    #[error("concurrent update: {0}")]
    Conflict(String),

    #[error("referenced row not found: {0}")]
    NotFound(String),

    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => ServiceError::NotFound(msg),
            StoreError::Conflict(msg) => ServiceError::Conflict(msg),
            StoreError::Unavailable(msg) => ServiceError::StoreUnavailable(msg),
        }
    }
}
