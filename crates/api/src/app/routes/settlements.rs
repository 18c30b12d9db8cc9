use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use labbill_settlement::ReconcileOutcome;

use crate::app::errors::{json_error, reconcile_error_to_response};
use crate::app::AppServices;

/// Processor webhook endpoint. Takes the raw body so the signature is
/// verified over exactly the bytes the processor signed.
pub async fn handle_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let sig_header = match headers.get("ledger-signature").and_then(|v| v.to_str().ok()) {
        Some(s) => s,
        None => {
            tracing::warn!("webhook delivery without signature header");
            return json_error(
                StatusCode::BAD_REQUEST,
                "signature_invalid",
                "missing ledger-signature header",
            );
        }
    };

    match services.reconciler.process(&body, sig_header).await {
        Ok(ReconcileOutcome::Applied) => {
            (StatusCode::OK, Json(json!({ "status": "applied" }))).into_response()
        }
        Ok(ReconcileOutcome::AlreadyProcessed) => (
            StatusCode::OK,
            Json(json!({ "status": "already_processed" })),
        )
            .into_response(),
        Err(err) => reconcile_error_to_response(err),
    }
}
