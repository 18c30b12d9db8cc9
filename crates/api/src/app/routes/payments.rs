use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use labbill_core::PaymentId;

use crate::app::dto::{payment_json, outcome_json, ApplyBody, SuggestQuery, UnapplyBody};
use crate::app::errors::{domain_error_to_response, service_error_to_response};
use crate::app::AppServices;

fn parse_payment_id(raw: &str) -> Result<PaymentId, axum::response::Response> {
    raw.parse::<PaymentId>().map_err(domain_error_to_response)
}

pub async fn get_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let payment_id = match parse_payment_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.store.payment(payment_id).await {
        Ok(payment) => (StatusCode::OK, Json(payment_json(&payment))).into_response(),
        Err(err) => service_error_to_response(err.into()),
    }
}

pub async fn apply_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<ApplyBody>,
) -> axum::response::Response {
    let payment_id = match parse_payment_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.service.apply_payment(payment_id, &body.requests).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome_json(&outcome))).into_response(),
        Err(err) => service_error_to_response(err),
    }
}

pub async fn unapply_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<UnapplyBody>,
) -> axum::response::Response {
    let payment_id = match parse_payment_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .service
        .unapply_payment(payment_id, body.invoice_id)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome_json(&outcome))).into_response(),
        Err(err) => service_error_to_response(err),
    }
}

pub async fn suggest_auto_application(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<SuggestQuery>,
) -> axum::response::Response {
    let payment_id = match parse_payment_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .service
        .suggest_auto_application(payment_id, query.client_id)
        .await
    {
        Ok(requests) => (StatusCode::OK, Json(json!({ "requests": requests }))).into_response(),
        Err(err) => service_error_to_response(err),
    }
}
