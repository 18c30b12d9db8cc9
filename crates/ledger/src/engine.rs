//! The allocation engine: pure validation + planning for every money movement.
//!
//! Each operation takes the current row state, validates the request in the
//! order the ledger rules demand, and returns a [`TransactionPlan`] or a
//! [`LedgerError`]. No partial plans: a failure mutates nothing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labbill_core::{AllocationId, InvoiceId, LedgerError, LedgerResult, PaymentId};

use crate::allocation::Allocation;
use crate::invoice::{Invoice, LineItem, LineItemStatus};
use crate::payment::{Payment, PaymentSource, PaymentStatus};
use crate::plan::{
    AllocationReduction, InvoiceUpdate, LineItemUpdate, PaymentUpdate, TransactionPlan,
};

/// Requested split of an invoice-level amount across line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemSplit {
    pub line_item_id: labbill_core::LineItemId,
    pub amount: i64,
    /// Marks the line item disputed instead of paid.
    pub dispute_reason: Option<String>,
}

/// One invoice-level application request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRequest {
    pub invoice_id: InvoiceId,
    pub amount: i64,
    /// When non-empty, split amounts must sum to `amount` exactly.
    #[serde(default)]
    pub splits: Vec<LineItemSplit>,
}

/// Validate and plan the application of `payment` across `requests`.
///
/// Validation order: payment lock, requested total vs. unapplied amount,
/// per-invoice amounts vs. balances, split consistency. Requests may target
/// the same invoice more than once; balances are tracked across requests.
pub fn compute_application(
    payment: &Payment,
    requests: &[ApplicationRequest],
    invoices: &[Invoice],
    line_items: &[LineItem],
    now: DateTime<Utc>,
) -> LedgerResult<TransactionPlan> {
    if payment.is_locked() {
        return Err(LedgerError::PaymentLocked(payment.id));
    }
    if requests.is_empty() {
        return Err(LedgerError::validation("no application requests"));
    }

    let mut total: i64 = 0;
    for req in requests {
        if req.amount <= 0 {
            return Err(LedgerError::validation(format!(
                "application amount must be positive, got {}",
                req.amount
            )));
        }
        total = total
            .checked_add(req.amount)
            .ok_or_else(|| LedgerError::validation("requested total overflows"))?;
    }
    if total > payment.unapplied_amount {
        return Err(LedgerError::insufficient_funds(
            total,
            payment.unapplied_amount,
        ));
    }

    // Working balances per invoice and outstanding per line item, so repeated
    // targets within one call are checked against the running state.
    let mut balances: HashMap<InvoiceId, i64> = HashMap::new();
    let mut outstanding: HashMap<labbill_core::LineItemId, i64> = HashMap::new();
    let mut touched_invoices: Vec<InvoiceId> = Vec::new();

    let mut plan = TransactionPlan::empty();

    for req in requests {
        let invoice = invoices
            .iter()
            .find(|i| i.id == req.invoice_id)
            .ok_or(LedgerError::InvoiceNotFound(req.invoice_id))?;
        if !invoice.can_receive_allocation() {
            return Err(LedgerError::validation(format!(
                "invoice {} cannot receive allocations (status {:?}, balance {})",
                invoice.id, invoice.status, invoice.balance
            )));
        }

        let balance = balances.entry(invoice.id).or_insert(invoice.balance);
        if req.amount > *balance {
            return Err(LedgerError::over_allocation(req.amount, *balance));
        }
        if !touched_invoices.contains(&invoice.id) {
            touched_invoices.push(invoice.id);
        }
        *balance -= req.amount;

        if req.splits.is_empty() {
            plan.allocation_inserts.push(Allocation {
                id: AllocationId::new(),
                payment_id: payment.id,
                invoice_id: invoice.id,
                line_item_id: None,
                amount_allocated: req.amount,
                created_at: now,
                dispute_reason: None,
            });
            continue;
        }

        let mut split_total: i64 = 0;
        for split in &req.splits {
            if split.amount <= 0 {
                return Err(LedgerError::validation(format!(
                    "split amount must be positive, got {}",
                    split.amount
                )));
            }
            split_total = split_total
                .checked_add(split.amount)
                .ok_or_else(|| LedgerError::validation("split total overflows"))?;

            let item = line_items
                .iter()
                .find(|li| li.id == split.line_item_id && li.invoice_id == invoice.id)
                .ok_or(LedgerError::LineItemNotFound(split.line_item_id))?;

            if item.status == LineItemStatus::Disputed && split.dispute_reason.is_none() {
                return Err(LedgerError::validation(format!(
                    "line item {} is disputed; allocating to it requires a dispute reason",
                    item.id
                )));
            }

            let open = outstanding.entry(item.id).or_insert_with(|| item.outstanding());
            if split.amount > *open {
                return Err(LedgerError::over_allocation(split.amount, *open));
            }
            *open -= split.amount;

            plan.allocation_inserts.push(Allocation {
                id: AllocationId::new(),
                payment_id: payment.id,
                invoice_id: invoice.id,
                line_item_id: Some(item.id),
                amount_allocated: split.amount,
                created_at: now,
                dispute_reason: split.dispute_reason.clone(),
            });
            plan.line_item_updates.push(LineItemUpdate {
                line_item_id: item.id,
                status: if split.dispute_reason.is_some() {
                    LineItemStatus::Disputed
                } else {
                    LineItemStatus::Paid
                },
            });
        }
        if split_total != req.amount {
            return Err(LedgerError::validation(format!(
                "splits sum to {split_total}, expected {}",
                req.amount
            )));
        }
    }

    for invoice_id in touched_invoices {
        // Both maps were populated above for every touched invoice.
        let invoice = invoices
            .iter()
            .find(|i| i.id == invoice_id)
            .ok_or(LedgerError::InvoiceNotFound(invoice_id))?;
        let new_balance = balances[&invoice_id];
        plan.invoice_updates.push(InvoiceUpdate {
            invoice_id,
            expected_version: invoice.version,
            balance: new_balance,
            status: invoice.status_for_balance(new_balance),
        });
    }

    plan.payment_updates.push(PaymentUpdate {
        payment_id: payment.id,
        expected_version: payment.version,
        applied_amount: payment.applied_amount + total,
        unapplied_amount: payment.unapplied_amount - total,
        status: match payment.status {
            PaymentStatus::Unposted => PaymentStatus::Posted,
            other => other,
        },
    });

    Ok(plan)
}

/// Plan the full reversal of every allocation between `payment` and `invoice`.
///
/// Reversal is deliberately not idempotent: an empty allocation set is
/// `AllocationNotFound`, never a silent no-op.
pub fn compute_reversal(
    payment: &Payment,
    invoice: &Invoice,
    allocations: &[Allocation],
    line_items: &[LineItem],
) -> LedgerResult<TransactionPlan> {
    if allocations.is_empty() {
        return Err(LedgerError::AllocationNotFound);
    }

    let mut total: i64 = 0;
    let mut plan = TransactionPlan::empty();
    for alloc in allocations {
        if alloc.payment_id != payment.id || alloc.invoice_id != invoice.id {
            return Err(LedgerError::validation(format!(
                "allocation {} does not join payment {} and invoice {}",
                alloc.id, payment.id, invoice.id
            )));
        }
        total += alloc.amount_allocated;
        plan.allocation_deletes.push(alloc.id);

        if let Some(item_id) = alloc.line_item_id {
            if !line_items.iter().any(|li| li.id == item_id) {
                return Err(LedgerError::LineItemNotFound(item_id));
            }
            plan.line_item_updates.push(LineItemUpdate {
                line_item_id: item_id,
                status: LineItemStatus::Pending,
            });
        }
    }

    let new_balance = invoice.balance + total;
    if new_balance > invoice.total_amount {
        return Err(LedgerError::validation(format!(
            "reversal of {total} would push invoice {} past its total",
            invoice.id
        )));
    }
    plan.invoice_updates.push(InvoiceUpdate {
        invoice_id: invoice.id,
        expected_version: invoice.version,
        balance: new_balance,
        status: invoice.status_for_balance(new_balance),
    });
    plan.payment_updates.push(PaymentUpdate {
        payment_id: payment.id,
        expected_version: payment.version,
        applied_amount: payment.applied_amount - total,
        unapplied_amount: payment.unapplied_amount + total,
        status: payment.status,
    });

    Ok(plan)
}

/// Deterministic FIFO suggestion: walk open invoices oldest-first (issue date,
/// then id ascending), allocating `min(remaining, balance)` until the amount
/// is exhausted. Greedy on purpose: oldest debts first, not fewest invoices.
pub fn compute_auto_application(
    payment_amount: i64,
    open_invoices: &[Invoice],
) -> Vec<ApplicationRequest> {
    let mut ordered: Vec<&Invoice> = open_invoices.iter().filter(|i| i.is_open()).collect();
    ordered.sort_by(|a, b| a.issue_date.cmp(&b.issue_date).then(a.id.cmp(&b.id)));

    let mut remaining = payment_amount.max(0);
    let mut requests = Vec::new();
    for invoice in ordered {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(invoice.balance);
        requests.push(ApplicationRequest {
            invoice_id: invoice.id,
            amount: take,
            splits: Vec::new(),
        });
        remaining -= take;
    }
    requests
}

/// Plan a processor settlement: a new posted payment allocated against the
/// referenced invoice in one step.
///
/// The allocation is capped at the invoice balance; any excess stays
/// unapplied on the payment so the money is recorded exactly once.
pub fn compute_settlement(
    payment_id: PaymentId,
    amount: i64,
    external_ref: &str,
    invoice: &Invoice,
    now: DateTime<Utc>,
) -> LedgerResult<TransactionPlan> {
    if amount <= 0 {
        return Err(LedgerError::validation(format!(
            "settlement amount must be positive, got {amount}"
        )));
    }
    if invoice.status == crate::invoice::InvoiceStatus::Draft {
        return Err(LedgerError::validation(format!(
            "invoice {} is draft and cannot settle",
            invoice.id
        )));
    }

    let allocated = amount.min(invoice.balance.max(0));
    let payment = Payment {
        id: payment_id,
        amount,
        applied_amount: allocated,
        unapplied_amount: amount - allocated,
        status: PaymentStatus::Posted,
        source: PaymentSource::Processor,
        external_ref: Some(external_ref.to_string()),
        version: 0,
    };

    let mut plan = TransactionPlan::empty();
    if allocated > 0 {
        let new_balance = invoice.balance - allocated;
        plan.allocation_inserts.push(Allocation {
            id: AllocationId::new(),
            payment_id,
            invoice_id: invoice.id,
            line_item_id: None,
            amount_allocated: allocated,
            created_at: now,
            dispute_reason: None,
        });
        plan.invoice_updates.push(InvoiceUpdate {
            invoice_id: invoice.id,
            expected_version: invoice.version,
            balance: new_balance,
            status: invoice.status_for_balance(new_balance),
        });
    }
    plan.payment_inserts.push(payment);
    Ok(plan)
}

/// Plan a processor refund against an invoice's allocations, newest-first.
///
/// A refund smaller than the allocation it lands on reduces that allocation
/// instead of deleting it. Every touched payment's applied/unapplied amounts
/// are restored, and a negative-amount audit payment records the outflow.
pub fn compute_refund(
    invoice: &Invoice,
    allocations: &[Allocation],
    payments: &[Payment],
    refund_amount: i64,
    refund_payment_id: PaymentId,
    external_ref: &str,
) -> LedgerResult<TransactionPlan> {
    if refund_amount <= 0 {
        return Err(LedgerError::validation(format!(
            "refund amount must be positive, got {refund_amount}"
        )));
    }
    let allocated_total: i64 = allocations
        .iter()
        .filter(|a| a.invoice_id == invoice.id)
        .map(|a| a.amount_allocated)
        .sum();
    if refund_amount > allocated_total {
        return Err(LedgerError::validation(format!(
            "refund of {refund_amount} exceeds allocated total {allocated_total} for invoice {}",
            invoice.id
        )));
    }

    let mut ordered: Vec<&Allocation> = allocations
        .iter()
        .filter(|a| a.invoice_id == invoice.id)
        .collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

    let mut plan = TransactionPlan::empty();
    let mut remaining = refund_amount;
    let mut reversed_per_payment: HashMap<PaymentId, i64> = HashMap::new();
    let mut payment_order: Vec<PaymentId> = Vec::new();

    for alloc in ordered {
        if remaining == 0 {
            break;
        }
        let reversed = if remaining >= alloc.amount_allocated {
            plan.allocation_deletes.push(alloc.id);
            if let Some(item_id) = alloc.line_item_id {
                plan.line_item_updates.push(LineItemUpdate {
                    line_item_id: item_id,
                    status: LineItemStatus::Pending,
                });
            }
            alloc.amount_allocated
        } else {
            plan.allocation_reductions.push(AllocationReduction {
                allocation_id: alloc.id,
                new_amount: alloc.amount_allocated - remaining,
            });
            remaining
        };
        remaining -= reversed;
        if !reversed_per_payment.contains_key(&alloc.payment_id) {
            payment_order.push(alloc.payment_id);
        }
        *reversed_per_payment.entry(alloc.payment_id).or_insert(0) += reversed;
    }

    for payment_id in payment_order {
        let payment = payments
            .iter()
            .find(|p| p.id == payment_id)
            .ok_or_else(|| {
                LedgerError::validation(format!("payment {payment_id} not loaded for refund"))
            })?;
        let reversed = reversed_per_payment[&payment_id];
        plan.payment_updates.push(PaymentUpdate {
            payment_id,
            expected_version: payment.version,
            applied_amount: payment.applied_amount - reversed,
            unapplied_amount: payment.unapplied_amount + reversed,
            status: payment.status,
        });
    }

    let new_balance = invoice.balance + refund_amount;
    plan.invoice_updates.push(InvoiceUpdate {
        invoice_id: invoice.id,
        expected_version: invoice.version,
        balance: new_balance,
        status: invoice.status_for_balance(new_balance),
    });

    // Negative audit payment: amount = -refund, nothing applied.
    plan.payment_inserts.push(Payment {
        id: refund_payment_id,
        amount: -refund_amount,
        applied_amount: 0,
        unapplied_amount: -refund_amount,
        status: PaymentStatus::Posted,
        source: PaymentSource::Processor,
        external_ref: Some(external_ref.to_string()),
        version: 0,
    });

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariants::check_invariants;
    use crate::invoice::InvoiceStatus;
    use labbill_core::{ClientId, LineItemId};
    use proptest::prelude::*;

    /// Test-side mirror of the store's atomic commit: applies a plan to
    /// in-memory rows, checking the same version pins the store checks.
    #[derive(Debug, Default, Clone)]
    struct State {
        invoices: Vec<Invoice>,
        line_items: Vec<LineItem>,
        payments: Vec<Payment>,
        allocations: Vec<Allocation>,
    }

    impl State {
        fn apply(&mut self, plan: &TransactionPlan) {
            for p in &plan.payment_inserts {
                self.payments.push(p.clone());
            }
            for u in &plan.payment_updates {
                let p = self
                    .payments
                    .iter_mut()
                    .find(|p| p.id == u.payment_id)
                    .expect("payment exists");
                assert_eq!(p.version, u.expected_version, "stale payment version");
                p.applied_amount = u.applied_amount;
                p.unapplied_amount = u.unapplied_amount;
                p.status = u.status;
                p.version += 1;
            }
            for u in &plan.invoice_updates {
                let i = self
                    .invoices
                    .iter_mut()
                    .find(|i| i.id == u.invoice_id)
                    .expect("invoice exists");
                assert_eq!(i.version, u.expected_version, "stale invoice version");
                i.balance = u.balance;
                i.status = u.status;
                i.version += 1;
            }
            for u in &plan.line_item_updates {
                let li = self
                    .line_items
                    .iter_mut()
                    .find(|li| li.id == u.line_item_id)
                    .expect("line item exists");
                li.status = u.status;
            }
            for a in &plan.allocation_inserts {
                self.allocations.push(a.clone());
            }
            for r in &plan.allocation_reductions {
                let a = self
                    .allocations
                    .iter_mut()
                    .find(|a| a.id == r.allocation_id)
                    .expect("allocation exists");
                a.amount_allocated = r.new_amount;
            }
            self.allocations
                .retain(|a| !plan.allocation_deletes.contains(&a.id));
        }

        fn check(&self) {
            check_invariants(&self.payments, &self.invoices, &self.allocations)
                .expect("ledger invariants hold");
        }
    }

    fn invoice(total: i64, day: i64) -> Invoice {
        Invoice {
            id: InvoiceId::new(),
            client_id: ClientId::new(),
            total_amount: total,
            balance: total,
            status: InvoiceStatus::Pending,
            issue_date: chrono::DateTime::from_timestamp(day * 86_400, 0).unwrap(),
            version: 0,
        }
    }

    fn payment(amount: i64) -> Payment {
        Payment::new_unposted(PaymentId::new(), amount, PaymentSource::Manual)
    }

    fn request(invoice_id: InvoiceId, amount: i64) -> ApplicationRequest {
        ApplicationRequest {
            invoice_id,
            amount,
            splits: Vec::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn fifo_allocates_oldest_first_with_tie_break_on_id() {
        let a = invoice(50, 1);
        let b = invoice(100, 2);
        let requests = compute_auto_application(120, &[b.clone(), a.clone()]);

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].invoice_id, a.id);
        assert_eq!(requests[0].amount, 50);
        assert_eq!(requests[1].invoice_id, b.id);
        assert_eq!(requests[1].amount, 70);
    }

    #[test]
    fn fifo_skips_disputed_and_drafts_and_stops_when_exhausted() {
        let mut disputed = invoice(40, 1);
        disputed.status = InvoiceStatus::Disputed;
        let mut draft = invoice(40, 1);
        draft.status = InvoiceStatus::Draft;
        let open = invoice(30, 2);

        let requests = compute_auto_application(500, &[disputed, draft, open.clone()]);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].invoice_id, open.id);
        assert_eq!(requests[0].amount, 30);
    }

    #[test]
    fn over_allocation_is_rejected() {
        let inv = invoice(100, 1);
        let pay = payment(200);
        let err =
            compute_application(&pay, &[request(inv.id, 150)], &[inv], &[], now()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::OverAllocation {
                requested: 150,
                available: 100
            }
        );
    }

    #[test]
    fn requested_total_above_unapplied_is_insufficient_funds() {
        let inv = invoice(500, 1);
        let pay = payment(100);
        let err =
            compute_application(&pay, &[request(inv.id, 150)], &[inv], &[], now()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                requested: 150,
                unapplied: 100
            }
        );
    }

    #[test]
    fn on_hold_payment_is_locked() {
        let inv = invoice(100, 1);
        let mut pay = payment(100);
        pay.status = PaymentStatus::OnHold;
        let err =
            compute_application(&pay, &[request(inv.id, 50)], &[inv], &[], now()).unwrap_err();
        assert_eq!(err, LedgerError::PaymentLocked(pay.id));
    }

    #[test]
    fn draft_invoice_rejects_application() {
        let mut inv = invoice(100, 1);
        inv.status = InvoiceStatus::Draft;
        let pay = payment(100);
        let err =
            compute_application(&pay, &[request(inv.id, 50)], &[inv], &[], now()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn repeated_requests_against_one_invoice_track_running_balance() {
        let inv = invoice(100, 1);
        let pay = payment(200);
        let reqs = [request(inv.id, 60), request(inv.id, 60)];
        let err = compute_application(&pay, &reqs, &[inv.clone()], &[], now()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::OverAllocation {
                requested: 60,
                available: 40
            }
        );

        let reqs = [request(inv.id, 60), request(inv.id, 40)];
        let plan = compute_application(&pay, &reqs, &[inv], &[], now()).unwrap();
        assert_eq!(plan.invoice_updates.len(), 1);
        assert_eq!(plan.invoice_updates[0].balance, 0);
        assert_eq!(plan.invoice_updates[0].status, InvoiceStatus::Paid);
    }

    #[test]
    fn splits_must_sum_to_invoice_level_amount() {
        let inv = invoice(100, 1);
        let item = LineItem {
            id: LineItemId::new(),
            invoice_id: inv.id,
            amount: 100,
            status: LineItemStatus::Pending,
        };
        let pay = payment(100);
        let req = ApplicationRequest {
            invoice_id: inv.id,
            amount: 80,
            splits: vec![LineItemSplit {
                line_item_id: item.id,
                amount: 50,
                dispute_reason: None,
            }],
        };
        let err = compute_application(&pay, &[req], &[inv], &[item], now()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn disputed_split_marks_line_item_disputed_and_keeps_reason() {
        let inv = invoice(100, 1);
        let item = LineItem {
            id: LineItemId::new(),
            invoice_id: inv.id,
            amount: 100,
            status: LineItemStatus::Disputed,
        };
        let pay = payment(100);
        let req = ApplicationRequest {
            invoice_id: inv.id,
            amount: 100,
            splits: vec![LineItemSplit {
                line_item_id: item.id,
                amount: 100,
                dispute_reason: Some("sample contaminated".to_string()),
            }],
        };
        let plan = compute_application(&pay, &[req], &[inv], &[item], now()).unwrap();
        assert_eq!(plan.line_item_updates[0].status, LineItemStatus::Disputed);
        assert_eq!(
            plan.allocation_inserts[0].dispute_reason.as_deref(),
            Some("sample contaminated")
        );
    }

    #[test]
    fn disputed_split_without_reason_is_rejected() {
        let inv = invoice(100, 1);
        let item = LineItem {
            id: LineItemId::new(),
            invoice_id: inv.id,
            amount: 100,
            status: LineItemStatus::Disputed,
        };
        let pay = payment(100);
        let req = ApplicationRequest {
            invoice_id: inv.id,
            amount: 100,
            splits: vec![LineItemSplit {
                line_item_id: item.id,
                amount: 100,
                dispute_reason: None,
            }],
        };
        let err = compute_application(&pay, &[req], &[inv], &[item], now()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn application_then_reversal_restores_rows_exactly() {
        let inv = invoice(100, 1);
        let pay = payment(100);
        let mut state = State {
            invoices: vec![inv.clone()],
            payments: vec![pay.clone()],
            ..State::default()
        };

        let plan = compute_application(&pay, &[request(inv.id, 60)], &[inv.clone()], &[], now())
            .unwrap();
        state.apply(&plan);
        state.check();
        assert_eq!(state.invoices[0].balance, 40);
        assert_eq!(state.invoices[0].status, InvoiceStatus::Partial);
        assert_eq!(state.payments[0].status, PaymentStatus::Posted);

        let allocs: Vec<Allocation> = state.allocations.clone();
        let plan =
            compute_reversal(&state.payments[0], &state.invoices[0], &allocs, &[]).unwrap();
        state.apply(&plan);
        state.check();

        assert_eq!(state.invoices[0].balance, inv.balance);
        assert_eq!(state.invoices[0].status, InvoiceStatus::Pending);
        assert_eq!(state.payments[0].applied_amount, 0);
        assert_eq!(state.payments[0].unapplied_amount, pay.amount);
        assert!(state.allocations.is_empty());
    }

    #[test]
    fn reversal_without_allocations_is_allocation_not_found() {
        let inv = invoice(100, 1);
        let pay = payment(100);
        let err = compute_reversal(&pay, &inv, &[], &[]).unwrap_err();
        assert_eq!(err, LedgerError::AllocationNotFound);
    }

    #[test]
    fn settlement_caps_allocation_at_invoice_balance() {
        let inv = invoice(100, 1);
        let plan = compute_settlement(PaymentId::new(), 120, "evt_1", &inv, now()).unwrap();

        let inserted = &plan.payment_inserts[0];
        assert_eq!(inserted.amount, 120);
        assert_eq!(inserted.applied_amount, 100);
        assert_eq!(inserted.unapplied_amount, 20);
        assert_eq!(inserted.source, PaymentSource::Processor);
        assert_eq!(plan.invoice_updates[0].balance, 0);
        assert_eq!(plan.invoice_updates[0].status, InvoiceStatus::Paid);
    }

    #[test]
    fn settlement_against_settled_invoice_leaves_payment_unapplied() {
        let mut inv = invoice(100, 1);
        inv.balance = 0;
        inv.status = InvoiceStatus::Paid;
        let plan = compute_settlement(PaymentId::new(), 50, "evt_2", &inv, now()).unwrap();
        assert!(plan.allocation_inserts.is_empty());
        assert!(plan.invoice_updates.is_empty());
        assert_eq!(plan.payment_inserts[0].unapplied_amount, 50);
    }

    #[test]
    fn partial_refund_reduces_allocation_and_records_negative_payment() {
        let inv = invoice(100, 1);
        let pay = payment(100);
        let mut state = State {
            invoices: vec![inv.clone()],
            payments: vec![pay.clone()],
            ..State::default()
        };
        let plan =
            compute_application(&pay, &[request(inv.id, 100)], &[inv], &[], now()).unwrap();
        state.apply(&plan);

        let refund_id = PaymentId::new();
        let plan = compute_refund(
            &state.invoices[0],
            &state.allocations,
            &state.payments,
            30,
            refund_id,
            "evt_refund",
        )
        .unwrap();
        state.apply(&plan);
        state.check();

        assert_eq!(state.allocations.len(), 1);
        assert_eq!(state.allocations[0].amount_allocated, 70);
        assert_eq!(state.invoices[0].balance, 30);
        assert_eq!(state.invoices[0].status, InvoiceStatus::Partial);
        let refund = state.payments.iter().find(|p| p.id == refund_id).unwrap();
        assert_eq!(refund.amount, -30);
        assert_eq!(refund.applied_amount, 0);
    }

    #[test]
    fn refund_spanning_allocations_reverses_newest_first() {
        let inv = invoice(100, 1);
        let pay_a = payment(60);
        let pay_b = payment(40);
        let mut state = State {
            invoices: vec![inv.clone()],
            payments: vec![pay_a.clone(), pay_b.clone()],
            ..State::default()
        };
        let t0 = now();
        let plan = compute_application(&pay_a, &[request(inv.id, 60)], &state.invoices, &[], t0)
            .unwrap();
        state.apply(&plan);
        let plan = compute_application(
            &state.payments[1].clone(),
            &[request(inv.id, 40)],
            &state.invoices,
            &[],
            t0 + chrono::Duration::seconds(1),
        )
        .unwrap();
        state.apply(&plan);

        // Refund 50: wipes the newer 40 allocation, trims 10 off the older.
        let plan = compute_refund(
            &state.invoices[0],
            &state.allocations,
            &state.payments,
            50,
            PaymentId::new(),
            "evt_refund",
        )
        .unwrap();
        state.apply(&plan);
        state.check();

        assert_eq!(state.allocations.len(), 1);
        assert_eq!(state.allocations[0].payment_id, pay_a.id);
        assert_eq!(state.allocations[0].amount_allocated, 50);
        assert_eq!(state.invoices[0].balance, 50);
        let a = state.payments.iter().find(|p| p.id == pay_a.id).unwrap();
        let b = state.payments.iter().find(|p| p.id == pay_b.id).unwrap();
        assert_eq!(a.applied_amount, 50);
        assert_eq!(b.applied_amount, 0);
    }

    #[test]
    fn refund_exceeding_allocated_total_is_rejected() {
        let inv = invoice(100, 1);
        let err = compute_refund(&inv, &[], &[], 30, PaymentId::new(), "evt").unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: any sequence of FIFO applications and reversals keeps
        /// every payment identity and invoice balance equation intact.
        #[test]
        fn random_apply_unapply_sequences_preserve_invariants(
            totals in prop::collection::vec(1i64..10_000, 1..6),
            amounts in prop::collection::vec(1i64..8_000, 1..6),
            unapply_choices in prop::collection::vec(any::<prop::sample::Index>(), 0..4),
        ) {
            let mut state = State::default();
            for (day, total) in totals.iter().enumerate() {
                state.invoices.push(invoice(*total, day as i64));
            }

            for amount in amounts {
                let pay = payment(amount);
                state.payments.push(pay.clone());
                let requests = compute_auto_application(amount, &state.invoices);
                if requests.is_empty() {
                    continue;
                }
                let plan = compute_application(
                    &pay,
                    &requests,
                    &state.invoices,
                    &[],
                    now(),
                )
                .expect("auto plan always validates");
                state.apply(&plan);
                state.check();
            }

            for choice in unapply_choices {
                if state.allocations.is_empty() {
                    break;
                }
                let alloc = state.allocations[choice.index(state.allocations.len())].clone();
                let pay = state
                    .payments
                    .iter()
                    .find(|p| p.id == alloc.payment_id)
                    .unwrap()
                    .clone();
                let inv = state
                    .invoices
                    .iter()
                    .find(|i| i.id == alloc.invoice_id)
                    .unwrap()
                    .clone();
                let pair: Vec<Allocation> = state
                    .allocations
                    .iter()
                    .filter(|a| a.payment_id == pay.id && a.invoice_id == inv.id)
                    .cloned()
                    .collect();
                let plan = compute_reversal(&pay, &inv, &pair, &[]).unwrap();
                state.apply(&plan);
                state.check();
            }
        }
    }
}
