//! Outbound notification seam.
//!
//! Success notifications fire only after the ledger commit, so a sink never
//! observes a mutation that later rolled back; failure notifications carry
//! no ledger effect at all. Delivery is fire-and-forget; a sink must not
//! fail the calling request.

use std::sync::Mutex;

use serde_json::Value;

/// What happened, from the notification consumer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    PaymentApplied,
    PaymentUnapplied,
    PaymentFailed,
    RefundIssued,
    AutoSuggestionComputed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentApplied => "payment.applied",
            Self::PaymentUnapplied => "payment.unapplied",
            Self::PaymentFailed => "payment.failed",
            Self::RefundIssued => "refund.issued",
            Self::AutoSuggestionComputed => "auto_suggestion.computed",
        }
    }
}

/// Sink for post-commit notifications (email dispatch, client portal
/// refresh). Infallible by contract; sinks swallow their own errors.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, kind: NotificationKind, payload: Value);
}

/// Sink that logs each notification as a structured event. Default wiring
/// when no real dispatcher is configured.
#[derive(Debug, Default)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, kind: NotificationKind, payload: Value) {
        tracing::info!(kind = kind.as_str(), %payload, "notification emitted");
    }
}

/// Sink that records every notification for assertion in tests.
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    inner: Mutex<Vec<(NotificationKind, Value)>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<(NotificationKind, Value)> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.all().into_iter().map(|(kind, _)| kind).collect()
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn notify(&self, kind: NotificationKind, payload: Value) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kind, payload));
    }
}
