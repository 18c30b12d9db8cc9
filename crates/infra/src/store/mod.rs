//! Ledger Store abstraction.
//!
//! The store is the single source of truth: services re-read rows at
//! operation time and commit a [`TransactionPlan`] atomically. Every planned
//! update names the row version it was computed against; a stale version
//! fails the whole commit with [`StoreError::Conflict`] so that concurrent
//! operations against the same payment or invoice serialize instead of both
//! passing validation on a stale read.

use async_trait::async_trait;
use thiserror::Error;

use labbill_core::{ClientId, InvoiceId, PaymentId};
use labbill_ledger::{Allocation, Invoice, LineItem, Payment, ProcessedEvent, SubscriptionStatus, TransactionPlan};

mod in_memory;
mod postgres;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

/// Store operation error.
///
/// Infrastructure failures only; domain failures never reach the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An expected row version was stale (concurrent commit won the race).
    /// Safe to re-read and re-validate; the plan was not applied.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transient store failure. The webhook transport retries these;
    /// the manual service surfaces them for operator resubmission.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Outcome of a settlement commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementCommit {
    /// Plan and idempotency marker were written together.
    Applied,
    /// The event id was already marked processed; nothing was applied.
    AlreadyProcessed,
}

/// Transactional persistence for ledger rows.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn payment(&self, id: PaymentId) -> Result<Payment, StoreError>;

    async fn invoice(&self, id: InvoiceId) -> Result<Invoice, StoreError>;

    async fn line_items(&self, invoice_id: InvoiceId) -> Result<Vec<LineItem>, StoreError>;

    /// Open invoices for a client, ordered by issue date then id (FIFO order).
    async fn open_invoices(&self, client_id: ClientId) -> Result<Vec<Invoice>, StoreError>;

    async fn allocations_between(
        &self,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<Allocation>, StoreError>;

    async fn allocations_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<Allocation>, StoreError>;

    /// Fast-path dedup check. The durable guarantee is `commit_settlement`;
    /// this exists so redeliveries can acknowledge without loading rows.
    async fn is_event_processed(&self, event_id: &str) -> Result<bool, StoreError>;

    /// Apply a plan atomically: all mutations or none.
    async fn commit(&self, plan: &TransactionPlan) -> Result<(), StoreError>;

    /// Apply a plan and the event's idempotency marker in one transaction.
    ///
    /// An effect without its marker would be reapplied on redelivery; a
    /// marker without its effect would silently drop money. Neither can
    /// happen here.
    async fn commit_settlement(
        &self,
        event: &ProcessedEvent,
        plan: &TransactionPlan,
    ) -> Result<SettlementCommit, StoreError>;

    /// Current subscription standing for a client, if any event set one.
    async fn subscription_status(
        &self,
        client_id: ClientId,
    ) -> Result<Option<SubscriptionStatus>, StoreError>;
}
