//! The processor-facing Settlement Reconciler.
//!
//! Each inbound webhook delivery walks a fixed pipeline:
//! received, signature verified, deduplicated, applied, acknowledged, with
//! rejection possible at any step. The idempotency marker and the ledger
//! effects commit in one transaction, so redelivery after a crash can never
//! double-apply and a marker can never outlive a lost effect.

mod event;
mod reconciler;
pub mod signature;

pub use event::{SettlementEvent, SettlementEventKind, SettlementMetadata};
pub use reconciler::{ReconcileError, ReconcileOutcome, SettlementReconciler};
