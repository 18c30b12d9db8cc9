use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use labbill_core::{ClientId, InvoiceId, LedgerError, PaymentId};
use labbill_infra::{LedgerStore, NotificationKind, NotificationSink};
use labbill_ledger::{
    compute_application, compute_auto_application, compute_reversal, ApplicationRequest, Invoice,
    LineItem, Payment,
};

use crate::error::ServiceError;

/// Rows as they stand after a committed operation, re-read from the store.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationOutcome {
    pub payment: Payment,
    pub invoices: Vec<Invoice>,
}

/// Operator-driven entry point for applying and reversing allocations.
///
/// Each call is one unit of work: re-read rows, compute a plan, commit it
/// atomically, notify. Validation failures return before any store write.
pub struct ApplicationService {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn NotificationSink>,
}

impl ApplicationService {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { store, notifier }
    }

    /// Apply a payment against one or more invoices per the given requests.
    ///
    /// Loads the payment and every targeted invoice (with its line items,
    /// when splits are requested), computes the full transaction plan, and
    /// commits it. On any rejection nothing is mutated and the failure kind
    /// is surfaced to the caller.
    pub async fn apply_payment(
        &self,
        payment_id: PaymentId,
        requests: &[ApplicationRequest],
    ) -> Result<ApplicationOutcome, ServiceError> {
        let payment = self.store.payment(payment_id).await?;
        let (invoices, line_items) = self.load_targets(requests).await?;

        let plan = match compute_application(&payment, requests, &invoices, &line_items, Utc::now())
        {
            Ok(plan) => plan,
            Err(err) => {
                tracing::warn!(%payment_id, error = %err, "payment application rejected");
                self.notifier.notify(
                    NotificationKind::PaymentFailed,
                    json!({
                        "payment_id": payment_id,
                        "reason": err.to_string(),
                    }),
                );
                return Err(err.into());
            }
        };
        self.store.commit(&plan).await?;

        let outcome = self.reread(payment_id, &invoices).await?;
        let total: i64 = requests.iter().map(|r| r.amount).sum();
        tracing::info!(%payment_id, total_applied = total, "payment applied");
        self.notifier.notify(
            NotificationKind::PaymentApplied,
            json!({
                "payment_id": payment_id,
                "invoice_ids": outcome.invoices.iter().map(|i| i.id).collect::<Vec<_>>(),
                "total_applied": total,
            }),
        );
        Ok(outcome)
    }

    /// Reverse every allocation between a payment and an invoice, restoring
    /// both rows to their pre-application values.
    ///
    /// Fails with `AllocationNotFound` when no allocation exists for the
    /// pair; that signals a double-unapply or a race, never to be suppressed.
    pub async fn unapply_payment(
        &self,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
    ) -> Result<ApplicationOutcome, ServiceError> {
        let payment = self.store.payment(payment_id).await?;
        let invoice = self.store.invoice(invoice_id).await?;
        let allocations = self.store.allocations_between(payment_id, invoice_id).await?;
        if allocations.is_empty() {
            return Err(LedgerError::AllocationNotFound.into());
        }
        let line_items = self.store.line_items(invoice_id).await?;

        let plan = compute_reversal(&payment, &invoice, &allocations, &line_items)?;
        self.store.commit(&plan).await?;

        let reversed: i64 = allocations.iter().map(|a| a.amount_allocated).sum();
        let outcome = self.reread(payment_id, std::slice::from_ref(&invoice)).await?;
        tracing::info!(%payment_id, %invoice_id, total_reversed = reversed, "payment unapplied");
        self.notifier.notify(
            NotificationKind::PaymentUnapplied,
            json!({
                "payment_id": payment_id,
                "invoice_id": invoice_id,
                "total_reversed": reversed,
            }),
        );
        Ok(outcome)
    }

    /// Propose a FIFO distribution of the payment's unapplied amount across
    /// the client's open invoices. Read-only; committing the proposal is a
    /// separate `apply_payment` call, so the operator can review it first.
    pub async fn suggest_auto_application(
        &self,
        payment_id: PaymentId,
        client_id: ClientId,
    ) -> Result<Vec<ApplicationRequest>, ServiceError> {
        let payment = self.store.payment(payment_id).await?;
        let open = self.store.open_invoices(client_id).await?;
        let requests = compute_auto_application(payment.unapplied_amount, &open);

        let total: i64 = requests.iter().map(|r| r.amount).sum();
        self.notifier.notify(
            NotificationKind::AutoSuggestionComputed,
            json!({
                "payment_id": payment_id,
                "client_id": client_id,
                "request_count": requests.len(),
                "total_suggested": total,
            }),
        );
        Ok(requests)
    }

    async fn load_targets(
        &self,
        requests: &[ApplicationRequest],
    ) -> Result<(Vec<Invoice>, Vec<LineItem>), ServiceError> {
        let mut targets = BTreeSet::new();
        for req in requests {
            targets.insert(req.invoice_id);
        }
        let mut invoices = Vec::with_capacity(targets.len());
        let mut line_items = Vec::new();
        for invoice_id in targets {
            invoices.push(self.store.invoice(invoice_id).await?);
            line_items.extend(self.store.line_items(invoice_id).await?);
        }
        Ok((invoices, line_items))
    }

    async fn reread(
        &self,
        payment_id: PaymentId,
        invoices: &[Invoice],
    ) -> Result<ApplicationOutcome, ServiceError> {
        let payment = self.store.payment(payment_id).await?;
        let mut current = Vec::with_capacity(invoices.len());
        for invoice in invoices {
            current.push(self.store.invoice(invoice.id).await?);
        }
        Ok(ApplicationOutcome {
            payment,
            invoices: current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use labbill_infra::{InMemoryLedgerStore, RecordingNotificationSink};
    use labbill_ledger::{InvoiceStatus, PaymentSource, PaymentStatus};

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        sink: Arc<RecordingNotificationSink>,
        service: ApplicationService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLedgerStore::new());
        let sink = Arc::new(RecordingNotificationSink::new());
        let service = ApplicationService::new(store.clone(), sink.clone());
        Fixture {
            store,
            sink,
            service,
        }
    }

    fn invoice(client_id: ClientId, total: i64) -> Invoice {
        Invoice {
            id: InvoiceId::new(),
            client_id,
            total_amount: total,
            balance: total,
            status: InvoiceStatus::Pending,
            issue_date: Utc::now(),
            version: 0,
        }
    }

    #[tokio::test]
    async fn apply_commits_and_notifies_after_the_fact() {
        let fx = fixture();
        let client = ClientId::new();
        let inv = invoice(client, 800);
        let payment = Payment::new_unposted(PaymentId::new(), 500, PaymentSource::Manual);
        fx.store.seed_invoice(inv.clone());
        fx.store.seed_payment(payment.clone());

        let outcome = fx
            .service
            .apply_payment(
                payment.id,
                &[ApplicationRequest {
                    invoice_id: inv.id,
                    amount: 500,
                    splits: Vec::new(),
                }],
            )
            .await
            .expect("apply");

        assert_eq!(outcome.payment.applied_amount, 500);
        assert_eq!(outcome.payment.status, PaymentStatus::Posted);
        assert_eq!(outcome.invoices[0].balance, 300);
        assert_eq!(fx.sink.kinds(), vec![NotificationKind::PaymentApplied]);
    }

    #[tokio::test]
    async fn rejected_apply_mutates_nothing_and_reports_failure() {
        let fx = fixture();
        let client = ClientId::new();
        let inv = invoice(client, 100);
        let payment = Payment::new_unposted(PaymentId::new(), 500, PaymentSource::Manual);
        fx.store.seed_invoice(inv.clone());
        fx.store.seed_payment(payment.clone());

        let err = fx
            .service
            .apply_payment(
                payment.id,
                &[ApplicationRequest {
                    invoice_id: inv.id,
                    amount: 150,
                    splits: Vec::new(),
                }],
            )
            .await
            .expect_err("over-allocation");
        assert!(matches!(
            err,
            ServiceError::Domain(LedgerError::OverAllocation { .. })
        ));

        let untouched = fx.store.invoice(inv.id).await.expect("invoice");
        assert_eq!(untouched.balance, 100);
        assert_eq!(fx.sink.kinds(), vec![NotificationKind::PaymentFailed]);
    }

    #[tokio::test]
    async fn rejection_on_the_last_request_leaves_every_invoice_untouched() {
        let fx = fixture();
        let client = ClientId::new();
        let first = invoice(client, 200);
        let second = invoice(client, 300);
        let third = invoice(client, 50);
        let payment = Payment::new_unposted(PaymentId::new(), 1_000, PaymentSource::Manual);
        fx.store.seed_invoice(first.clone());
        fx.store.seed_invoice(second.clone());
        fx.store.seed_invoice(third.clone());
        fx.store.seed_payment(payment.clone());

        // First two requests are valid; the third over-allocates.
        let err = fx
            .service
            .apply_payment(
                payment.id,
                &[
                    ApplicationRequest {
                        invoice_id: first.id,
                        amount: 200,
                        splits: Vec::new(),
                    },
                    ApplicationRequest {
                        invoice_id: second.id,
                        amount: 300,
                        splits: Vec::new(),
                    },
                    ApplicationRequest {
                        invoice_id: third.id,
                        amount: 75,
                        splits: Vec::new(),
                    },
                ],
            )
            .await
            .expect_err("over-allocation on the last request");
        assert!(matches!(
            err,
            ServiceError::Domain(LedgerError::OverAllocation { .. })
        ));

        for inv in [&first, &second, &third] {
            let after = fx.store.invoice(inv.id).await.expect("invoice");
            assert_eq!(after.balance, inv.balance);
            assert_eq!(after.version, 0);
        }
        let after = fx.store.payment(payment.id).await.expect("payment");
        assert_eq!(after.applied_amount, 0);
        assert_eq!(after.unapplied_amount, 1_000);
        assert_eq!(fx.sink.kinds(), vec![NotificationKind::PaymentFailed]);
    }

    #[tokio::test]
    async fn unapply_without_allocation_surfaces_not_found() {
        let fx = fixture();
        let client = ClientId::new();
        let inv = invoice(client, 100);
        let payment = Payment::new_unposted(PaymentId::new(), 100, PaymentSource::Manual);
        fx.store.seed_invoice(inv.clone());
        fx.store.seed_payment(payment.clone());

        let err = fx
            .service
            .unapply_payment(payment.id, inv.id)
            .await
            .expect_err("nothing to reverse");
        assert!(matches!(
            err,
            ServiceError::Domain(LedgerError::AllocationNotFound)
        ));
    }

    #[tokio::test]
    async fn apply_then_unapply_restores_both_rows() {
        let fx = fixture();
        let client = ClientId::new();
        let inv = invoice(client, 1_000);
        let payment = Payment::new_unposted(PaymentId::new(), 400, PaymentSource::Portal);
        fx.store.seed_invoice(inv.clone());
        fx.store.seed_payment(payment.clone());

        fx.service
            .apply_payment(
                payment.id,
                &[ApplicationRequest {
                    invoice_id: inv.id,
                    amount: 400,
                    splits: Vec::new(),
                }],
            )
            .await
            .expect("apply");
        let outcome = fx
            .service
            .unapply_payment(payment.id, inv.id)
            .await
            .expect("unapply");

        assert_eq!(outcome.payment.applied_amount, 0);
        assert_eq!(outcome.payment.unapplied_amount, 400);
        assert_eq!(outcome.invoices[0].balance, 1_000);
        assert_eq!(outcome.invoices[0].status, InvoiceStatus::Pending);
        assert_eq!(
            fx.sink.kinds(),
            vec![
                NotificationKind::PaymentApplied,
                NotificationKind::PaymentUnapplied
            ]
        );
    }

    #[tokio::test]
    async fn suggestion_is_read_only_and_fifo_ordered() {
        let fx = fixture();
        let client = ClientId::new();
        let mut older = invoice(client, 50);
        older.issue_date = Utc::now() - chrono::Duration::days(2);
        let newer = invoice(client, 100);
        let payment = Payment::new_unposted(PaymentId::new(), 120, PaymentSource::Manual);
        fx.store.seed_invoice(older.clone());
        fx.store.seed_invoice(newer.clone());
        fx.store.seed_payment(payment.clone());

        let requests = fx
            .service
            .suggest_auto_application(payment.id, client)
            .await
            .expect("suggestion");

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].invoice_id, older.id);
        assert_eq!(requests[0].amount, 50);
        assert_eq!(requests[1].invoice_id, newer.id);
        assert_eq!(requests[1].amount, 70);

        // Proposal only; nothing committed.
        let after = fx.store.invoice(older.id).await.expect("invoice");
        assert_eq!(after.balance, 50);
        assert_eq!(fx.sink.kinds(), vec![NotificationKind::AutoSuggestionComputed]);
    }
}
