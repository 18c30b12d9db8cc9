use axum::{
    routing::{get, post},
    Router,
};

pub mod invoices;
pub mod payments;
pub mod settlements;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/:id/apply", post(payments::apply_payment))
        .route("/payments/:id/unapply", post(payments::unapply_payment))
        .route("/payments/:id/auto-suggestion", get(payments::suggest_auto_application))
        .route("/invoices/:id", get(invoices::get_invoice))
        .route("/settlements/webhook", post(settlements::handle_webhook))
}
