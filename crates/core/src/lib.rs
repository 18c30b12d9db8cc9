//! Ledger foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers and the ledger error taxonomy.

pub mod error;
pub mod id;

pub use error::{LedgerError, LedgerResult};
pub use id::{AllocationId, ClientId, InvoiceId, LineItemId, PaymentId};
