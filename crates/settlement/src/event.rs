//! Inbound processor event model.

use serde::{Deserialize, Serialize};

use labbill_core::{ClientId, InvoiceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementEventKind {
    Succeeded,
    Failed,
    Refunded,
    SubscriptionChanged,
}

impl SettlementEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::SubscriptionChanged => "subscription_changed",
        }
    }
}

/// Metadata map attached by the processor. Which fields are required depends
/// on the event kind; the reconciler enforces that per kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementMetadata {
    #[serde(default)]
    pub invoice_id: Option<InvoiceId>,
    #[serde(default)]
    pub client_id: Option<ClientId>,
    /// New subscription status for `subscription_changed` events.
    #[serde(default)]
    pub subscription_status: Option<String>,
}

/// A signed processor notification, parsed from the webhook body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementEvent {
    /// Processor-assigned identifier; the idempotency key.
    pub id: String,
    pub kind: SettlementEventKind,
    /// Amount in minor currency units. Unused for subscription events.
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub metadata: SettlementMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_succeeded_event_with_metadata() {
        let body = r#"{
            "id": "evt_42",
            "kind": "succeeded",
            "amount": 1250,
            "metadata": {
                "invoice_id": "0192c6c1-1111-7000-8000-000000000001",
                "client_id": "0192c6c1-1111-7000-8000-000000000002"
            }
        }"#;
        let event: SettlementEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.kind, SettlementEventKind::Succeeded);
        assert_eq!(event.amount, 1250);
        assert!(event.metadata.invoice_id.is_some());
    }

    #[test]
    fn subscription_event_needs_no_amount() {
        let body = r#"{
            "id": "evt_sub",
            "kind": "subscription_changed",
            "metadata": {
                "client_id": "0192c6c1-1111-7000-8000-000000000002",
                "subscription_status": "past_due"
            }
        }"#;
        let event: SettlementEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.kind, SettlementEventKind::SubscriptionChanged);
        assert_eq!(event.amount, 0);
    }
}
