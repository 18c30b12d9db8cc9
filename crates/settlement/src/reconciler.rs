use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use labbill_core::{LedgerError, PaymentId};
use labbill_infra::{
    LedgerStore, NotificationKind, NotificationSink, SettlementCommit, StoreError,
};
use labbill_ledger::{
    compute_refund, compute_settlement, ClientStatusUpdate, Payment, ProcessedEvent,
    SubscriptionStatus, TransactionPlan,
};

use crate::event::{SettlementEvent, SettlementEventKind};
use crate::signature;

/// Why a delivery was rejected or could not be settled.
///
/// `Store` is the only retryable variant: nothing was marked processed, so
/// redelivery is wanted. Everything else is terminal for this payload.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("signature rejected: {0}")]
    SignatureInvalid(&'static str),

    #[error("malformed event payload: {0}")]
    Malformed(String),

    /// Domain-level hard reject (bad amounts, missing references). Left
    /// unprocessed on purpose; the processor will resend and an operator
    /// must remediate.
    #[error(transparent)]
    Rejected(#[from] LedgerError),

    #[error("unknown reference: {0}")]
    UnknownReference(String),

    #[error("ledger store failure: {0}")]
    Store(String),
}

impl From<StoreError> for ReconcileError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => ReconcileError::UnknownReference(msg),
            StoreError::Conflict(msg) | StoreError::Unavailable(msg) => ReconcileError::Store(msg),
        }
    }
}

/// Terminal state of an accepted delivery. Both acknowledge with 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    AlreadyProcessed,
}

/// Event-driven entry point: consumes signed processor notifications and
/// drives the allocation engine under the durable idempotency table.
pub struct SettlementReconciler {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn NotificationSink>,
    secret: String,
}

impl SettlementReconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn NotificationSink>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            secret: secret.into(),
        }
    }

    /// Run one delivery through the pipeline.
    ///
    /// Verification and parsing happen before any store access; dedup is
    /// checked both up front (cheap short-circuit on redelivery) and again
    /// inside the commit, which is the durable source of truth.
    pub async fn process(
        &self,
        body: &[u8],
        sig_header: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        signature::verify(body, sig_header, &self.secret)
            .map_err(ReconcileError::SignatureInvalid)?;

        let event: SettlementEvent =
            serde_json::from_slice(body).map_err(|e| ReconcileError::Malformed(e.to_string()))?;
        tracing::info!(event_id = %event.id, kind = event.kind.as_str(), "settlement event received");

        if self.store.is_event_processed(&event.id).await? {
            tracing::info!(event_id = %event.id, "duplicate settlement event, acknowledging");
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let plan = self.plan_for(&event).await?;
        let marker = ProcessedEvent {
            event_id: event.id.clone(),
            kind: event.kind.as_str().to_string(),
            processed_at: Utc::now(),
        };
        let committed = self.store.commit_settlement(&marker, &plan).await?;
        if committed == SettlementCommit::AlreadyProcessed {
            // Lost the race against a concurrent delivery of the same event.
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        self.notify_applied(&event);
        Ok(ReconcileOutcome::Applied)
    }

    async fn plan_for(&self, event: &SettlementEvent) -> Result<TransactionPlan, ReconcileError> {
        match event.kind {
            SettlementEventKind::Succeeded => {
                let invoice_id = event.metadata.invoice_id.ok_or_else(|| {
                    LedgerError::validation("settlement succeeded event without invoice_id")
                })?;
                let invoice = self.store.invoice(invoice_id).await?;
                let plan = compute_settlement(
                    PaymentId::new(),
                    event.amount,
                    &event.id,
                    &invoice,
                    Utc::now(),
                )?;
                Ok(plan)
            }
            SettlementEventKind::Failed => {
                // No ledger mutation; the marker alone is committed.
                Ok(TransactionPlan::empty())
            }
            SettlementEventKind::Refunded => {
                let invoice_id = event.metadata.invoice_id.ok_or_else(|| {
                    LedgerError::validation("refund event without invoice_id")
                })?;
                let invoice = self.store.invoice(invoice_id).await?;
                let allocations = self.store.allocations_for_invoice(invoice_id).await?;
                let payments = self.payments_behind(&allocations).await?;
                let plan = compute_refund(
                    &invoice,
                    &allocations,
                    &payments,
                    event.amount,
                    PaymentId::new(),
                    &event.id,
                )?;
                Ok(plan)
            }
            SettlementEventKind::SubscriptionChanged => {
                let client_id = event.metadata.client_id.ok_or_else(|| {
                    LedgerError::validation("subscription event without client_id")
                })?;
                let raw = event.metadata.subscription_status.as_deref().ok_or_else(|| {
                    LedgerError::validation("subscription event without subscription_status")
                })?;
                let status = SubscriptionStatus::parse(raw).ok_or_else(|| {
                    LedgerError::validation(format!("unknown subscription status '{raw}'"))
                })?;
                let mut plan = TransactionPlan::empty();
                plan.client_status_update = Some(ClientStatusUpdate { client_id, status });
                Ok(plan)
            }
        }
    }

    async fn payments_behind(
        &self,
        allocations: &[labbill_ledger::Allocation],
    ) -> Result<Vec<Payment>, ReconcileError> {
        let mut ids = BTreeSet::new();
        for allocation in allocations {
            ids.insert(allocation.payment_id);
        }
        let mut payments = Vec::with_capacity(ids.len());
        for id in ids {
            payments.push(self.store.payment(id).await?);
        }
        Ok(payments)
    }

    /// Post-commit, fire-and-forget. A sink failure cannot reach the ledger.
    fn notify_applied(&self, event: &SettlementEvent) {
        let payload = json!({
            "event_id": event.id,
            "amount": event.amount,
            "invoice_id": event.metadata.invoice_id,
            "client_id": event.metadata.client_id,
        });
        match event.kind {
            SettlementEventKind::Succeeded => {
                self.notifier.notify(NotificationKind::PaymentApplied, payload);
            }
            SettlementEventKind::Failed => {
                self.notifier.notify(NotificationKind::PaymentFailed, payload);
            }
            SettlementEventKind::Refunded => {
                self.notifier.notify(NotificationKind::RefundIssued, payload);
            }
            SettlementEventKind::SubscriptionChanged => {}
        }
    }
}
