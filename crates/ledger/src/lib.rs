//! Ledger entities and the allocation engine.
//!
//! Everything in this crate is pure: the engine validates a requested money
//! movement against current row state and produces a [`plan::TransactionPlan`]
//! describing every mutation, or fails without side effects. Persisting a plan
//! atomically is the store's job (`labbill-infra`).

pub mod allocation;
pub mod engine;
pub mod invariants;
pub mod invoice;
pub mod payment;
pub mod plan;

pub use allocation::{Allocation, ClientStatusUpdate, ProcessedEvent, SubscriptionStatus};
pub use engine::{
    compute_application, compute_auto_application, compute_refund, compute_reversal,
    compute_settlement, ApplicationRequest, LineItemSplit,
};
pub use invoice::{Invoice, InvoiceStatus, LineItem, LineItemStatus};
pub use payment::{Payment, PaymentSource, PaymentStatus};
pub use plan::TransactionPlan;
