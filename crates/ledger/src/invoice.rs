use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labbill_core::{ClientId, InvoiceId, LineItemId};

/// Invoice status lifecycle.
///
/// The ledger only moves invoices between `Pending`/`Partial`/`Paid` (and back
/// on reversal). `Draft`, `Overdue` and `Disputed` are set by the billing
/// subsystem; the engine reads them as allocation preconditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Partial,
    Paid,
    Overdue,
    Disputed,
}

/// Invoice row as seen by the ledger.
///
/// `total_amount` is fixed at finalization; the ledger mutates only `balance`
/// and `status`. Amounts are minor currency units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub client_id: ClientId,
    pub total_amount: i64,
    pub balance: i64,
    pub status: InvoiceStatus,
    pub issue_date: DateTime<Utc>,
    /// Row version for optimistic concurrency; bumped by the store on commit.
    pub version: u64,
}

impl Invoice {
    /// Whether a manual allocation may target this invoice at all.
    ///
    /// Draft invoices have no finalized total; everything else may receive
    /// money as long as balance remains (a disputed invoice can still be paid
    /// manually, the operator is expected to know what they are doing).
    pub fn can_receive_allocation(&self) -> bool {
        self.status != InvoiceStatus::Draft && self.balance > 0
    }

    /// Whether auto-application may target this invoice.
    ///
    /// Stricter than manual: disputed invoices are excluded from FIFO
    /// targeting.
    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            InvoiceStatus::Pending | InvoiceStatus::Partial | InvoiceStatus::Overdue
        ) && self.balance > 0
    }

    /// Status implied by a balance after an allocation or reversal.
    ///
    /// Integer minor-unit comparison only, so a `Paid` invoice can never
    /// regress through rounding noise. A reversal that restores the full
    /// total moves the invoice back to `Pending`.
    pub fn status_for_balance(&self, new_balance: i64) -> InvoiceStatus {
        if new_balance <= 0 {
            InvoiceStatus::Paid
        } else if new_balance >= self.total_amount {
            InvoiceStatus::Pending
        } else {
            InvoiceStatus::Partial
        }
    }
}

/// Line item status; `Disputed` is set during application when the operator
/// flags a split, and cleared back to `Pending` on reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemStatus {
    Pending,
    Paid,
    Disputed,
}

/// Line item belonging to exactly one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub invoice_id: InvoiceId,
    /// Amount in minor currency units.
    pub amount: i64,
    pub status: LineItemStatus,
}

impl LineItem {
    /// Amount a split may still claim against this line item.
    pub fn outstanding(&self) -> i64 {
        match self.status {
            LineItemStatus::Paid => 0,
            LineItemStatus::Pending | LineItemStatus::Disputed => self.amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoice(status: InvoiceStatus, total: i64, balance: i64) -> Invoice {
        Invoice {
            id: InvoiceId::new(),
            client_id: ClientId::new(),
            total_amount: total,
            balance,
            status,
            issue_date: Utc::now(),
            version: 0,
        }
    }

    #[test]
    fn draft_invoices_cannot_receive_allocations() {
        assert!(!invoice(InvoiceStatus::Draft, 100, 100).can_receive_allocation());
        assert!(invoice(InvoiceStatus::Pending, 100, 100).can_receive_allocation());
    }

    #[test]
    fn disputed_invoices_are_manual_only() {
        let inv = invoice(InvoiceStatus::Disputed, 100, 40);
        assert!(inv.can_receive_allocation());
        assert!(!inv.is_open());
    }

    #[test]
    fn status_for_balance_covers_all_transitions() {
        let inv = invoice(InvoiceStatus::Partial, 100, 60);
        assert_eq!(inv.status_for_balance(0), InvoiceStatus::Paid);
        assert_eq!(inv.status_for_balance(30), InvoiceStatus::Partial);
        assert_eq!(inv.status_for_balance(100), InvoiceStatus::Pending);
    }
}
