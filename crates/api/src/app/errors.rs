use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use labbill_application::ServiceError;
use labbill_core::LedgerError;
use labbill_settlement::ReconcileError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Domain(domain) => domain_error_to_response(domain),
        ServiceError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ServiceError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        ServiceError::StoreUnavailable(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn domain_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        LedgerError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        LedgerError::InsufficientFunds { .. } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_funds",
            err.to_string(),
        ),
        LedgerError::OverAllocation { .. } => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "over_allocation",
            err.to_string(),
        ),
        LedgerError::PaymentLocked(_) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "payment_locked",
            err.to_string(),
        ),
        LedgerError::InvoiceNotFound(_)
        | LedgerError::LineItemNotFound(_)
        | LedgerError::AllocationNotFound => {
            json_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
    }
}

/// Webhook status contract: 400 means "do not resend this payload", 422
/// means "resend will not help until an operator intervenes", 500 means
/// "nothing was processed, resend wanted".
pub fn reconcile_error_to_response(err: ReconcileError) -> axum::response::Response {
    match err {
        ReconcileError::SignatureInvalid(msg) => {
            json_error(StatusCode::BAD_REQUEST, "signature_invalid", msg)
        }
        ReconcileError::Malformed(msg) => {
            json_error(StatusCode::BAD_REQUEST, "malformed_event", msg)
        }
        ReconcileError::Rejected(domain) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "event_rejected",
            domain.to_string(),
        ),
        ReconcileError::UnknownReference(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "unknown_reference", msg)
        }
        ReconcileError::Store(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}
