//! The operator-facing Manual Application Service.
//!
//! Orchestrates read, compute, commit, notify for manual money movement:
//! loads current rows from the Ledger Store, asks the allocation engine for
//! a transaction plan, commits it atomically, and only then emits
//! notifications. A failed validation or a stale-version commit leaves the
//! ledger untouched.

mod error;
mod service;

pub use error::ServiceError;
pub use service::{ApplicationOutcome, ApplicationService};
