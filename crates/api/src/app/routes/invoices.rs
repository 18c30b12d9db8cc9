use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use labbill_core::InvoiceId;

use crate::app::dto::invoice_json;
use crate::app::errors::{domain_error_to_response, service_error_to_response};
use crate::app::AppServices;

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id = match id.parse::<InvoiceId>() {
        Ok(id) => id,
        Err(err) => return domain_error_to_response(err),
    };
    // Always re-read; no cached balance is authoritative.
    match services.store.invoice(invoice_id).await {
        Ok(invoice) => (StatusCode::OK, Json(invoice_json(&invoice))).into_response(),
        Err(err) => service_error_to_response(err.into()),
    }
}
