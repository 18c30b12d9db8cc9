use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labbill_core::{AllocationId, ClientId, InvoiceId, LineItemId, PaymentId};

/// Join record tying part of a payment to an invoice (optionally a line item).
///
/// Allocations are created atomically with their ledger side effects and
/// destroyed (not edited) on unapply. The single exception is a processor
/// refund smaller than the allocation, which reduces `amount_allocated`
/// in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub line_item_id: Option<LineItemId>,
    /// Always > 0; never exceeds the payment's unapplied amount or the
    /// invoice's balance at creation time.
    pub amount_allocated: i64,
    pub created_at: DateTime<Utc>,
    /// Set when the operator flagged this split as disputed during application.
    pub dispute_reason: Option<String>,
}

/// Append-only record of an external event id already settled.
///
/// This table is the durable idempotency truth: the marker is written in the
/// same transaction as the settlement's ledger effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub kind: String,
    pub processed_at: DateTime<Utc>,
}

/// Per-client subscription standing, driven by processor lifecycle events.
///
/// Informational only: it lives outside the invoice/payment invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "past_due" => Some(Self::PastDue),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// Pending update of a client's subscription status (outside ledger invariants).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStatusUpdate {
    pub client_id: ClientId,
    pub status: SubscriptionStatus,
}
