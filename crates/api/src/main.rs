use std::sync::Arc;

use labbill_infra::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, TracingNotificationSink};

#[tokio::main]
async fn main() {
    labbill_observability::init();

    let webhook_secret = std::env::var("WEBHOOK_SECRET").unwrap_or_else(|_| {
        tracing::warn!("WEBHOOK_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let store: Arc<dyn LedgerStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(8)
                .connect(&url)
                .await
                .expect("failed to connect to DATABASE_URL");
            let store = PostgresLedgerStore::new(pool);
            store.ensure_schema().await.expect("failed to apply schema");
            tracing::info!("using postgres ledger store");
            Arc::new(store)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; using volatile in-memory store");
            Arc::new(InMemoryLedgerStore::new())
        }
    };

    let app = labbill_api::app::build_app(store, Arc::new(TracingNotificationSink), webhook_secret);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
