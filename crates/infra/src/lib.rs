//! Infrastructure collaborators behind the ledger core.
//!
//! The Ledger Store (transactional persistence) and the Notification Sink are
//! external collaborators from the domain's point of view; this crate holds
//! their trait definitions plus the in-memory (tests/dev) and Postgres
//! implementations.

pub mod notify;
pub mod store;


pub use notify::{NotificationKind, NotificationSink, RecordingNotificationSink, TracingNotificationSink};
pub use store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, SettlementCommit, StoreError};
