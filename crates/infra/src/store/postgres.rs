//! Postgres-backed ledger store.
//!
//! Runtime sqlx queries; every commit runs in one transaction. Optimistic
//! concurrency is enforced with `UPDATE … WHERE id = $1 AND version = $n`
//! (zero rows affected means a concurrent commit won and the transaction
//! rolls back with [`StoreError::Conflict`]). The idempotency marker uses
//! `INSERT … ON CONFLICT DO NOTHING` inside the same transaction as the
//! settlement's ledger effects, so redelivery can never reapply them.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use async_trait::async_trait;

use labbill_core::{AllocationId, ClientId, InvoiceId, LineItemId, PaymentId};
use labbill_ledger::{
    Allocation, Invoice, InvoiceStatus, LineItem, LineItemStatus, Payment, PaymentSource,
    PaymentStatus, ProcessedEvent, SubscriptionStatus, TransactionPlan,
};

use super::{LedgerStore, SettlementCommit, StoreError};

/// Schema for the ledger tables. Applied by `ensure_schema` (dev/test
/// convenience; deployments run this through their migration tooling).
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS invoices (
    id UUID PRIMARY KEY,
    client_id UUID NOT NULL,
    total_amount BIGINT NOT NULL,
    balance BIGINT NOT NULL,
    status TEXT NOT NULL,
    issue_date TIMESTAMPTZ NOT NULL,
    version BIGINT NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS line_items (
    id UUID PRIMARY KEY,
    invoice_id UUID NOT NULL REFERENCES invoices(id),
    amount BIGINT NOT NULL,
    status TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS payments (
    id UUID PRIMARY KEY,
    amount BIGINT NOT NULL,
    applied_amount BIGINT NOT NULL,
    unapplied_amount BIGINT NOT NULL,
    status TEXT NOT NULL,
    source TEXT NOT NULL,
    external_ref TEXT,
    version BIGINT NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS allocations (
    id UUID PRIMARY KEY,
    payment_id UUID NOT NULL REFERENCES payments(id),
    invoice_id UUID NOT NULL REFERENCES invoices(id),
    line_item_id UUID REFERENCES line_items(id),
    amount_allocated BIGINT NOT NULL CHECK (amount_allocated > 0),
    created_at TIMESTAMPTZ NOT NULL,
    dispute_reason TEXT
);
CREATE TABLE IF NOT EXISTS processed_events (
    event_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    processed_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS client_subscriptions (
    client_id UUID PRIMARY KEY,
    status TEXT NOT NULL
);
"#;

/// Postgres ledger store. `Clone` is cheap (pool handle).
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::unavailable(e.to_string())
}

fn invoice_status_str(s: InvoiceStatus) -> &'static str {
    match s {
        InvoiceStatus::Draft => "draft",
        InvoiceStatus::Pending => "pending",
        InvoiceStatus::Partial => "partial",
        InvoiceStatus::Paid => "paid",
        InvoiceStatus::Overdue => "overdue",
        InvoiceStatus::Disputed => "disputed",
    }
}

fn invoice_status_from(s: &str) -> Result<InvoiceStatus, StoreError> {
    match s {
        "draft" => Ok(InvoiceStatus::Draft),
        "pending" => Ok(InvoiceStatus::Pending),
        "partial" => Ok(InvoiceStatus::Partial),
        "paid" => Ok(InvoiceStatus::Paid),
        "overdue" => Ok(InvoiceStatus::Overdue),
        "disputed" => Ok(InvoiceStatus::Disputed),
        other => Err(StoreError::unavailable(format!(
            "unknown invoice status '{other}' in store"
        ))),
    }
}

fn line_item_status_str(s: LineItemStatus) -> &'static str {
    match s {
        LineItemStatus::Pending => "pending",
        LineItemStatus::Paid => "paid",
        LineItemStatus::Disputed => "disputed",
    }
}

fn line_item_status_from(s: &str) -> Result<LineItemStatus, StoreError> {
    match s {
        "pending" => Ok(LineItemStatus::Pending),
        "paid" => Ok(LineItemStatus::Paid),
        "disputed" => Ok(LineItemStatus::Disputed),
        other => Err(StoreError::unavailable(format!(
            "unknown line item status '{other}' in store"
        ))),
    }
}

fn payment_status_str(s: PaymentStatus) -> &'static str {
    match s {
        PaymentStatus::Unposted => "unposted",
        PaymentStatus::Posted => "posted",
        PaymentStatus::OnHold => "on_hold",
        PaymentStatus::Deleted => "deleted",
    }
}

fn payment_status_from(s: &str) -> Result<PaymentStatus, StoreError> {
    match s {
        "unposted" => Ok(PaymentStatus::Unposted),
        "posted" => Ok(PaymentStatus::Posted),
        "on_hold" => Ok(PaymentStatus::OnHold),
        "deleted" => Ok(PaymentStatus::Deleted),
        other => Err(StoreError::unavailable(format!(
            "unknown payment status '{other}' in store"
        ))),
    }
}

fn payment_source_str(s: PaymentSource) -> &'static str {
    match s {
        PaymentSource::Manual => "manual",
        PaymentSource::Portal => "portal",
        PaymentSource::Processor => "processor",
    }
}

fn payment_source_from(s: &str) -> Result<PaymentSource, StoreError> {
    match s {
        "manual" => Ok(PaymentSource::Manual),
        "portal" => Ok(PaymentSource::Portal),
        "processor" => Ok(PaymentSource::Processor),
        other => Err(StoreError::unavailable(format!(
            "unknown payment source '{other}' in store"
        ))),
    }
}

fn subscription_status_str(s: SubscriptionStatus) -> &'static str {
    match s {
        SubscriptionStatus::Active => "active",
        SubscriptionStatus::PastDue => "past_due",
        SubscriptionStatus::Canceled => "canceled",
    }
}

fn invoice_from_row(row: &sqlx::postgres::PgRow) -> Result<Invoice, StoreError> {
    Ok(Invoice {
        id: InvoiceId::from_uuid(row.try_get::<Uuid, _>("id").map_err(db_err)?),
        client_id: ClientId::from_uuid(row.try_get::<Uuid, _>("client_id").map_err(db_err)?),
        total_amount: row.try_get("total_amount").map_err(db_err)?,
        balance: row.try_get("balance").map_err(db_err)?,
        status: invoice_status_from(row.try_get::<String, _>("status").map_err(db_err)?.as_str())?,
        issue_date: row
            .try_get::<DateTime<Utc>, _>("issue_date")
            .map_err(db_err)?,
        version: row.try_get::<i64, _>("version").map_err(db_err)? as u64,
    })
}

fn payment_from_row(row: &sqlx::postgres::PgRow) -> Result<Payment, StoreError> {
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id").map_err(db_err)?),
        amount: row.try_get("amount").map_err(db_err)?,
        applied_amount: row.try_get("applied_amount").map_err(db_err)?,
        unapplied_amount: row.try_get("unapplied_amount").map_err(db_err)?,
        status: payment_status_from(row.try_get::<String, _>("status").map_err(db_err)?.as_str())?,
        source: payment_source_from(row.try_get::<String, _>("source").map_err(db_err)?.as_str())?,
        external_ref: row.try_get("external_ref").map_err(db_err)?,
        version: row.try_get::<i64, _>("version").map_err(db_err)? as u64,
    })
}

fn allocation_from_row(row: &sqlx::postgres::PgRow) -> Result<Allocation, StoreError> {
    Ok(Allocation {
        id: AllocationId::from_uuid(row.try_get::<Uuid, _>("id").map_err(db_err)?),
        payment_id: PaymentId::from_uuid(row.try_get::<Uuid, _>("payment_id").map_err(db_err)?),
        invoice_id: InvoiceId::from_uuid(row.try_get::<Uuid, _>("invoice_id").map_err(db_err)?),
        line_item_id: row
            .try_get::<Option<Uuid>, _>("line_item_id")
            .map_err(db_err)?
            .map(LineItemId::from_uuid),
        amount_allocated: row.try_get("amount_allocated").map_err(db_err)?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(db_err)?,
        dispute_reason: row.try_get("dispute_reason").map_err(db_err)?,
    })
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the ledger tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn apply_plan(
        tx: &mut Transaction<'_, Postgres>,
        plan: &TransactionPlan,
    ) -> Result<(), StoreError> {
        for p in &plan.payment_inserts {
            sqlx::query(
                "INSERT INTO payments \
                 (id, amount, applied_amount, unapplied_amount, status, source, external_ref, version) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 0)",
            )
            .bind(p.id.as_uuid())
            .bind(p.amount)
            .bind(p.applied_amount)
            .bind(p.unapplied_amount)
            .bind(payment_status_str(p.status))
            .bind(payment_source_str(p.source))
            .bind(p.external_ref.as_deref())
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        }

        for u in &plan.payment_updates {
            let res = sqlx::query(
                "UPDATE payments \
                 SET applied_amount = $2, unapplied_amount = $3, status = $4, version = version + 1 \
                 WHERE id = $1 AND version = $5",
            )
            .bind(u.payment_id.as_uuid())
            .bind(u.applied_amount)
            .bind(u.unapplied_amount)
            .bind(payment_status_str(u.status))
            .bind(u.expected_version as i64)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(StoreError::conflict(format!(
                    "payment {} version {} is stale",
                    u.payment_id, u.expected_version
                )));
            }
        }

        for u in &plan.invoice_updates {
            let res = sqlx::query(
                "UPDATE invoices \
                 SET balance = $2, status = $3, version = version + 1 \
                 WHERE id = $1 AND version = $4",
            )
            .bind(u.invoice_id.as_uuid())
            .bind(u.balance)
            .bind(invoice_status_str(u.status))
            .bind(u.expected_version as i64)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(StoreError::conflict(format!(
                    "invoice {} version {} is stale",
                    u.invoice_id, u.expected_version
                )));
            }
        }

        for u in &plan.line_item_updates {
            sqlx::query("UPDATE line_items SET status = $2 WHERE id = $1")
                .bind(u.line_item_id.as_uuid())
                .bind(line_item_status_str(u.status))
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
        }

        for a in &plan.allocation_inserts {
            sqlx::query(
                "INSERT INTO allocations \
                 (id, payment_id, invoice_id, line_item_id, amount_allocated, created_at, dispute_reason) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(a.id.as_uuid())
            .bind(a.payment_id.as_uuid())
            .bind(a.invoice_id.as_uuid())
            .bind(a.line_item_id.map(|id| *id.as_uuid()))
            .bind(a.amount_allocated)
            .bind(a.created_at)
            .bind(a.dispute_reason.as_deref())
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        }

        for id in &plan.allocation_deletes {
            let res = sqlx::query("DELETE FROM allocations WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(StoreError::conflict(format!(
                    "allocation {id} already reversed"
                )));
            }
        }

        for r in &plan.allocation_reductions {
            let res = sqlx::query("UPDATE allocations SET amount_allocated = $2 WHERE id = $1")
                .bind(r.allocation_id.as_uuid())
                .bind(r.new_amount)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(StoreError::conflict(format!(
                    "allocation {} already reversed",
                    r.allocation_id
                )));
            }
        }

        if let Some(u) = &plan.client_status_update {
            sqlx::query(
                "INSERT INTO client_subscriptions (client_id, status) VALUES ($1, $2) \
                 ON CONFLICT (client_id) DO UPDATE SET status = EXCLUDED.status",
            )
            .bind(u.client_id.as_uuid())
            .bind(subscription_status_str(u.status))
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        }

        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn payment(&self, id: PaymentId) -> Result<Payment, StoreError> {
        let row = sqlx::query(
            "SELECT id, amount, applied_amount, unapplied_amount, status, source, external_ref, version \
             FROM payments WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::not_found(format!("payment {id}")))?;
        payment_from_row(&row)
    }

    async fn invoice(&self, id: InvoiceId) -> Result<Invoice, StoreError> {
        let row = sqlx::query(
            "SELECT id, client_id, total_amount, balance, status, issue_date, version \
             FROM invoices WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::not_found(format!("invoice {id}")))?;
        invoice_from_row(&row)
    }

    async fn line_items(&self, invoice_id: InvoiceId) -> Result<Vec<LineItem>, StoreError> {
        let rows = sqlx::query("SELECT id, invoice_id, amount, status FROM line_items WHERE invoice_id = $1")
            .bind(invoice_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|row| {
                Ok(LineItem {
                    id: LineItemId::from_uuid(row.try_get::<Uuid, _>("id").map_err(db_err)?),
                    invoice_id: InvoiceId::from_uuid(
                        row.try_get::<Uuid, _>("invoice_id").map_err(db_err)?,
                    ),
                    amount: row.try_get("amount").map_err(db_err)?,
                    status: line_item_status_from(
                        row.try_get::<String, _>("status").map_err(db_err)?.as_str(),
                    )?,
                })
            })
            .collect()
    }

    async fn open_invoices(&self, client_id: ClientId) -> Result<Vec<Invoice>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, client_id, total_amount, balance, status, issue_date, version \
             FROM invoices \
             WHERE client_id = $1 AND balance > 0 AND status IN ('pending', 'partial', 'overdue') \
             ORDER BY issue_date ASC, id ASC",
        )
        .bind(client_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(invoice_from_row).collect()
    }

    async fn allocations_between(
        &self,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<Allocation>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, payment_id, invoice_id, line_item_id, amount_allocated, created_at, dispute_reason \
             FROM allocations WHERE payment_id = $1 AND invoice_id = $2",
        )
        .bind(payment_id.as_uuid())
        .bind(invoice_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(allocation_from_row).collect()
    }

    async fn allocations_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<Allocation>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, payment_id, invoice_id, line_item_id, amount_allocated, created_at, dispute_reason \
             FROM allocations WHERE invoice_id = $1",
        )
        .bind(invoice_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(allocation_from_row).collect()
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 AS present FROM processed_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn commit(&self, plan: &TransactionPlan) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        Self::apply_plan(&mut tx, plan).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn commit_settlement(
        &self,
        event: &ProcessedEvent,
        plan: &TransactionPlan,
    ) -> Result<SettlementCommit, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Insert-first dedup: losing the marker race means another delivery
        // of this event already settled it.
        let res = sqlx::query(
            "INSERT INTO processed_events (event_id, kind, processed_at) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(&event.event_id)
        .bind(&event.kind)
        .bind(event.processed_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            tx.rollback().await.map_err(db_err)?;
            return Ok(SettlementCommit::AlreadyProcessed);
        }

        Self::apply_plan(&mut tx, plan).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(SettlementCommit::Applied)
    }

    async fn subscription_status(
        &self,
        client_id: ClientId,
    ) -> Result<Option<SubscriptionStatus>, StoreError> {
        let row = sqlx::query("SELECT status FROM client_subscriptions WHERE client_id = $1")
            .bind(client_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let s: String = row.try_get("status").map_err(db_err)?;
                Ok(SubscriptionStatus::parse(&s))
            }
        }
    }
}
