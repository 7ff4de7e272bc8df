//! SpendGuard core: transaction risk scoring, fraud alerts and the
//! transaction status lifecycle over a SQLite ledger.

pub mod alert_manager;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod reason;
pub mod risk_scorer;
pub mod store;
pub mod transaction;
pub mod types;

pub use alert_manager::{AlertManager, FraudAlert, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use engine::{GuardEngine, RecordOutcome};
pub use error::{GuardError, GuardResult};
pub use lifecycle::{TransactionLifecycle, Transition};
pub use reason::HeuristicReason;
pub use risk_scorer::{RiskScorer, ScoreResult};
pub use store::{LedgerStore, TransactionFilter, TransactionStore, UserPreferences};
pub use transaction::{NewTransaction, StatusSummary, Transaction, TransactionKind, TransactionStatus};
