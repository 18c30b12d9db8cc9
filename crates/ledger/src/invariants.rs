//! Cross-row invariant checks.
//!
//! Used by tests and by the in-memory store's debug assertions to verify that
//! every committed operation left the ledger consistent:
//! 1. `payment.applied_amount == Σ allocations(payment)` and
//!    `applied + unapplied == amount`.
//! 2. `invoice.balance == invoice.total_amount − Σ allocations(invoice)`.
//! 3. Every allocation amount is strictly positive.

use labbill_core::{LedgerError, LedgerResult};

use crate::allocation::Allocation;
use crate::invoice::Invoice;
use crate::payment::Payment;

pub fn check_invariants(
    payments: &[Payment],
    invoices: &[Invoice],
    allocations: &[Allocation],
) -> LedgerResult<()> {
    for alloc in allocations {
        if alloc.amount_allocated <= 0 {
            return Err(LedgerError::validation(format!(
                "allocation {} has non-positive amount {}",
                alloc.id, alloc.amount_allocated
            )));
        }
    }

    for payment in payments {
        if !payment.identity_holds() {
            return Err(LedgerError::validation(format!(
                "payment {} violates applied + unapplied == amount ({} + {} != {})",
                payment.id, payment.applied_amount, payment.unapplied_amount, payment.amount
            )));
        }
        let allocated: i64 = allocations
            .iter()
            .filter(|a| a.payment_id == payment.id)
            .map(|a| a.amount_allocated)
            .sum();
        if payment.applied_amount != allocated {
            return Err(LedgerError::validation(format!(
                "payment {} applied_amount {} != allocation sum {}",
                payment.id, payment.applied_amount, allocated
            )));
        }
    }

    for invoice in invoices {
        let allocated: i64 = allocations
            .iter()
            .filter(|a| a.invoice_id == invoice.id)
            .map(|a| a.amount_allocated)
            .sum();
        if invoice.balance != invoice.total_amount - allocated {
            return Err(LedgerError::validation(format!(
                "invoice {} balance {} != total {} - allocated {}",
                invoice.id, invoice.balance, invoice.total_amount, allocated
            )));
        }
    }

    Ok(())
}
