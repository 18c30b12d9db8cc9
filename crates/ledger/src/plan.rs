//! Transaction plans: the mutations one ledger operation commits atomically.
//!
//! The engine computes a plan against the row state it was given; the store
//! applies it all-or-nothing, re-checking each named row version so that two
//! concurrent operations against the same payment or invoice cannot both
//! commit against a stale read.

use serde::{Deserialize, Serialize};

use labbill_core::{AllocationId, InvoiceId, LineItemId, PaymentId};

use crate::allocation::{Allocation, ClientStatusUpdate};
use crate::invoice::{InvoiceStatus, LineItemStatus};
use crate::payment::{Payment, PaymentStatus};

/// Planned invoice row update, pinned to the version the engine read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceUpdate {
    pub invoice_id: InvoiceId,
    pub expected_version: u64,
    pub balance: i64,
    pub status: InvoiceStatus,
}

/// Planned payment row update, pinned to the version the engine read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentUpdate {
    pub payment_id: PaymentId,
    pub expected_version: u64,
    pub applied_amount: i64,
    pub unapplied_amount: i64,
    pub status: PaymentStatus,
}

/// Planned line item status change (line items carry no version; they are
/// only ever touched under their invoice's version check).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemUpdate {
    pub line_item_id: LineItemId,
    pub status: LineItemStatus,
}

/// Partial reversal of an allocation (processor refund smaller than the
/// allocation amount). `new_amount` is always > 0; a refund consuming the
/// whole allocation deletes it instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReduction {
    pub allocation_id: AllocationId,
    pub new_amount: i64,
}

/// The full set of row mutations produced by one engine operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPlan {
    pub payment_inserts: Vec<Payment>,
    pub payment_updates: Vec<PaymentUpdate>,
    pub invoice_updates: Vec<InvoiceUpdate>,
    pub line_item_updates: Vec<LineItemUpdate>,
    pub allocation_inserts: Vec<Allocation>,
    pub allocation_deletes: Vec<AllocationId>,
    pub allocation_reductions: Vec<AllocationReduction>,
    pub client_status_update: Option<ClientStatusUpdate>,
}

impl TransactionPlan {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
