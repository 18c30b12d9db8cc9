use serde::{Deserialize, Serialize};

use labbill_core::PaymentId;

/// Payment status lifecycle.
///
/// Created `Unposted`, becomes `Posted` once allocated (or explicitly posted
/// by the operator). `OnHold` and `Deleted` lock the payment against any
/// further allocation; `Deleted` is soft, the row stays for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unposted,
    Posted,
    OnHold,
    Deleted,
}

/// Where the payment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    Manual,
    Portal,
    Processor,
}

/// Payment row.
///
/// `amount` is the immutable face value; `applied_amount + unapplied_amount
/// == amount` holds at all times. Refund audit records carry a negative
/// `amount` with nothing applied. Amounts are minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: i64,
    pub applied_amount: i64,
    pub unapplied_amount: i64,
    pub status: PaymentStatus,
    pub source: PaymentSource,
    /// External reference, e.g. a processor transaction or event id.
    pub external_ref: Option<String>,
    /// Row version for optimistic concurrency; bumped by the store on commit.
    pub version: u64,
}

impl Payment {
    /// A freshly received payment: nothing applied yet.
    pub fn new_unposted(id: PaymentId, amount: i64, source: PaymentSource) -> Self {
        Self {
            id,
            amount,
            applied_amount: 0,
            unapplied_amount: amount,
            status: PaymentStatus::Unposted,
            source,
            external_ref: None,
            version: 0,
        }
    }

    /// Locked payments cannot receive new allocations. Reversal stays open
    /// so a held payment can still be unwound.
    pub fn is_locked(&self) -> bool {
        matches!(self.status, PaymentStatus::OnHold | PaymentStatus::Deleted)
    }

    /// The face-value identity every committed operation must preserve.
    pub fn identity_holds(&self) -> bool {
        self.applied_amount + self.unapplied_amount == self.amount
    }
}
