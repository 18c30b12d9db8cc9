use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use labbill_core::{AllocationId, ClientId, InvoiceId, LineItemId, PaymentId};
#[cfg(debug_assertions)]
use labbill_ledger::invariants::check_invariants;
use labbill_ledger::{
    Allocation, Invoice, LineItem, Payment, ProcessedEvent, SubscriptionStatus, TransactionPlan,
};

use super::{LedgerStore, SettlementCommit, StoreError};

#[derive(Debug, Default)]
struct Inner {
    invoices: HashMap<InvoiceId, Invoice>,
    line_items: HashMap<LineItemId, LineItem>,
    payments: HashMap<PaymentId, Payment>,
    allocations: HashMap<AllocationId, Allocation>,
    processed_events: HashMap<String, ProcessedEvent>,
    subscriptions: HashMap<ClientId, SubscriptionStatus>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. The single `RwLock` makes every commit trivially
/// atomic; version checks still run so concurrency behavior matches the
/// Postgres store.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an invoice row (owner: billing subsystem, out of ledger scope).
    pub fn seed_invoice(&self, invoice: Invoice) {
        self.write().invoices.insert(invoice.id, invoice);
    }

    pub fn seed_line_item(&self, item: LineItem) {
        self.write().line_items.insert(item.id, item);
    }

    pub fn seed_payment(&self, payment: Payment) {
        self.write().payments.insert(payment.id, payment);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        // Lock poisoning only happens after a panic in another holder;
        // recovering the data is still the right call for a test store.
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Check every version pin and row reference before touching anything.
    fn validate_plan(inner: &Inner, plan: &TransactionPlan) -> Result<(), StoreError> {
        for u in &plan.payment_updates {
            let row = inner
                .payments
                .get(&u.payment_id)
                .ok_or_else(|| StoreError::not_found(format!("payment {}", u.payment_id)))?;
            if row.version != u.expected_version {
                return Err(StoreError::conflict(format!(
                    "payment {} version {} != expected {}",
                    u.payment_id, row.version, u.expected_version
                )));
            }
        }
        for u in &plan.invoice_updates {
            let row = inner
                .invoices
                .get(&u.invoice_id)
                .ok_or_else(|| StoreError::not_found(format!("invoice {}", u.invoice_id)))?;
            if row.version != u.expected_version {
                return Err(StoreError::conflict(format!(
                    "invoice {} version {} != expected {}",
                    u.invoice_id, row.version, u.expected_version
                )));
            }
        }
        for u in &plan.line_item_updates {
            if !inner.line_items.contains_key(&u.line_item_id) {
                return Err(StoreError::not_found(format!(
                    "line item {}",
                    u.line_item_id
                )));
            }
        }
        for id in &plan.allocation_deletes {
            if !inner.allocations.contains_key(id) {
                return Err(StoreError::conflict(format!(
                    "allocation {id} already reversed"
                )));
            }
        }
        for r in &plan.allocation_reductions {
            if !inner.allocations.contains_key(&r.allocation_id) {
                return Err(StoreError::conflict(format!(
                    "allocation {} already reversed",
                    r.allocation_id
                )));
            }
        }
        Ok(())
    }

    fn apply_plan(inner: &mut Inner, plan: &TransactionPlan) {
        for p in &plan.payment_inserts {
            inner.payments.insert(p.id, p.clone());
        }
        for u in &plan.payment_updates {
            if let Some(row) = inner.payments.get_mut(&u.payment_id) {
                row.applied_amount = u.applied_amount;
                row.unapplied_amount = u.unapplied_amount;
                row.status = u.status;
                row.version += 1;
            }
        }
        for u in &plan.invoice_updates {
            if let Some(row) = inner.invoices.get_mut(&u.invoice_id) {
                row.balance = u.balance;
                row.status = u.status;
                row.version += 1;
            }
        }
        for u in &plan.line_item_updates {
            if let Some(row) = inner.line_items.get_mut(&u.line_item_id) {
                row.status = u.status;
            }
        }
        for a in &plan.allocation_inserts {
            inner.allocations.insert(a.id, a.clone());
        }
        for id in &plan.allocation_deletes {
            inner.allocations.remove(id);
        }
        for r in &plan.allocation_reductions {
            if let Some(row) = inner.allocations.get_mut(&r.allocation_id) {
                row.amount_allocated = r.new_amount;
            }
        }
        if let Some(u) = &plan.client_status_update {
            inner.subscriptions.insert(u.client_id, u.status);
        }

        #[cfg(debug_assertions)]
        {
            let payments: Vec<Payment> = inner.payments.values().cloned().collect();
            let invoices: Vec<Invoice> = inner.invoices.values().cloned().collect();
            let allocations: Vec<Allocation> = inner.allocations.values().cloned().collect();
            if let Err(e) = check_invariants(&payments, &invoices, &allocations) {
                panic!("commit left ledger inconsistent: {e}");
            }
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn payment(&self, id: PaymentId) -> Result<Payment, StoreError> {
        self.read()
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("payment {id}")))
    }

    async fn invoice(&self, id: InvoiceId) -> Result<Invoice, StoreError> {
        self.read()
            .invoices
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("invoice {id}")))
    }

    async fn line_items(&self, invoice_id: InvoiceId) -> Result<Vec<LineItem>, StoreError> {
        Ok(self
            .read()
            .line_items
            .values()
            .filter(|li| li.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn open_invoices(&self, client_id: ClientId) -> Result<Vec<Invoice>, StoreError> {
        let mut invoices: Vec<Invoice> = self
            .read()
            .invoices
            .values()
            .filter(|i| i.client_id == client_id && i.is_open())
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.issue_date.cmp(&b.issue_date).then(a.id.cmp(&b.id)));
        Ok(invoices)
    }

    async fn allocations_between(
        &self,
        payment_id: PaymentId,
        invoice_id: InvoiceId,
    ) -> Result<Vec<Allocation>, StoreError> {
        Ok(self
            .read()
            .allocations
            .values()
            .filter(|a| a.payment_id == payment_id && a.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn allocations_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Vec<Allocation>, StoreError> {
        Ok(self
            .read()
            .allocations
            .values()
            .filter(|a| a.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        Ok(self.read().processed_events.contains_key(event_id))
    }

    async fn commit(&self, plan: &TransactionPlan) -> Result<(), StoreError> {
        let mut inner = self.write();
        Self::validate_plan(&inner, plan)?;
        Self::apply_plan(&mut inner, plan);
        Ok(())
    }

    async fn commit_settlement(
        &self,
        event: &ProcessedEvent,
        plan: &TransactionPlan,
    ) -> Result<SettlementCommit, StoreError> {
        let mut inner = self.write();
        if inner.processed_events.contains_key(&event.event_id) {
            return Ok(SettlementCommit::AlreadyProcessed);
        }
        Self::validate_plan(&inner, plan)?;
        Self::apply_plan(&mut inner, plan);
        inner
            .processed_events
            .insert(event.event_id.clone(), event.clone());
        Ok(SettlementCommit::Applied)
    }

    async fn subscription_status(
        &self,
        client_id: ClientId,
    ) -> Result<Option<SubscriptionStatus>, StoreError> {
        Ok(self.read().subscriptions.get(&client_id).copied())
    }
}
