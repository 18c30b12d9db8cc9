//! Request/response DTOs.

use serde::Deserialize;
use serde_json::{json, Value};

use labbill_application::ApplicationOutcome;
use labbill_core::{ClientId, InvoiceId};
use labbill_ledger::{ApplicationRequest, Invoice, Payment};

#[derive(Debug, Deserialize)]
pub struct ApplyBody {
    pub requests: Vec<ApplicationRequest>,
}

#[derive(Debug, Deserialize)]
pub struct UnapplyBody {
    pub invoice_id: InvoiceId,
}

#[derive(Debug, Deserialize)]
pub struct SuggestQuery {
    pub client_id: ClientId,
}

pub fn payment_json(payment: &Payment) -> Value {
    json!({
        "id": payment.id,
        "amount": payment.amount,
        "applied_amount": payment.applied_amount,
        "unapplied_amount": payment.unapplied_amount,
        "status": payment.status,
        "source": payment.source,
        "external_ref": payment.external_ref,
    })
}

pub fn invoice_json(invoice: &Invoice) -> Value {
    json!({
        "id": invoice.id,
        "client_id": invoice.client_id,
        "total_amount": invoice.total_amount,
        "balance": invoice.balance,
        "status": invoice.status,
        "issue_date": invoice.issue_date.to_rfc3339(),
    })
}

pub fn outcome_json(outcome: &ApplicationOutcome) -> Value {
    json!({
        "payment": payment_json(&outcome.payment),
        "invoices": outcome.invoices.iter().map(invoice_json).collect::<Vec<_>>(),
    })
}
