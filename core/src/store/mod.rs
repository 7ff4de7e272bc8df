//! SQLite persistence layer.
//!
//! RULE: Only the store module talks to the database.
//! The scorer, the alert manager and the lifecycle call store methods;
//! they never execute SQL directly.

use crate::{
    config::GuardConfig,
    error::{GuardError, GuardResult},
    transaction::{StatusSummary, Transaction, TransactionKind, TransactionStatus, SUSPICIOUS_THRESHOLD},
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};
use std::{
    sync::{Mutex, MutexGuard, TryLockError},
    time::{Duration, Instant},
};

mod alerts;
mod events;
mod preferences;
mod transactions;

/// SQLite virtual-machine steps between deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;

pub struct LedgerStore {
    conn: Mutex<Connection>,
    query_timeout: Duration,
    default_alerts_enabled: bool,
}

impl LedgerStore {
    pub fn open(path: &str) -> GuardResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> GuardResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        let defaults = GuardConfig::default();
        Self {
            conn: Mutex::new(conn),
            query_timeout: defaults.risk.query_timeout(),
            default_alerts_enabled: defaults.alerts.default_enabled,
        }
    }

    /// Apply runtime settings: busy timeout, query deadline, alert default.
    pub fn configure(&mut self, config: &GuardConfig) -> GuardResult<()> {
        self.query_timeout = config.risk.query_timeout();
        self.default_alerts_enabled = config.alerts.default_enabled;
        let conn = self.conn.get_mut().unwrap_or_else(|p| p.into_inner());
        conn.busy_timeout(config.store.busy_timeout())?;
        Ok(())
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> GuardResult<()> {
        self.conn()?
            .execute_batch(include_str!("../../../migrations/001_ledger.sql"))?;
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    fn conn(&self) -> GuardResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| GuardError::StoreUnavailable("connection lock poisoned".into()))
    }

    /// Wait for the connection no later than `deadline`.
    fn conn_before(&self, deadline: Instant, query: &'static str) -> GuardResult<MutexGuard<'_, Connection>> {
        loop {
            match self.conn.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(GuardError::StoreUnavailable("connection lock poisoned".into()))
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(GuardError::QueryTimeout { query });
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Run a read query under the configured deadline. SQLite is interrupted
    /// through its progress handler once the deadline passes.
    fn with_deadline<T>(
        &self,
        query: &'static str,
        run: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> GuardResult<T> {
        let deadline = Instant::now() + self.query_timeout;
        let conn = self.conn_before(deadline, query)?;
        conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() >= deadline));
        let result = run(&conn);
        conn.progress_handler(PROGRESS_CHECK_OPS, None::<fn() -> bool>);
        result.map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::OperationInterrupted => {
                log::warn!("query {query} interrupted after {:?}", self.query_timeout);
                GuardError::QueryTimeout { query }
            }
            other => GuardError::Database(other),
        })
    }
}

// ── Collaborator contracts ────────────────────────────────────

/// A queryable repository of transaction records.
///
/// Heuristics only ever call `count` and `amount_stats`; the provided
/// implementations fold over `query`, stores with an engine behind them
/// should override both.
pub trait TransactionStore: Send + Sync {
    fn insert(&self, tx: &Transaction) -> GuardResult<()>;

    fn get(&self, id: &str, user_id: &str) -> GuardResult<Option<Transaction>>;

    /// Newest first.
    fn query(&self, user_id: &str, filter: &TransactionFilter) -> GuardResult<Vec<Transaction>>;

    /// Compare-and-swap on `tx.version`. Writes the mutable fields (status,
    /// score, reasons, description, review note, update stamp) and returns
    /// the stored record with its bumped version. A stale version yields
    /// `Conflict`, a missing row `NotFound`.
    fn update(&self, tx: &Transaction) -> GuardResult<Transaction>;

    fn count(&self, user_id: &str, filter: &TransactionFilter) -> GuardResult<i64> {
        let unlimited = TransactionFilter { limit: None, ..filter.clone() };
        Ok(self.query(user_id, &unlimited)?.len() as i64)
    }

    fn amount_stats(&self, user_id: &str, filter: &TransactionFilter) -> GuardResult<AmountStats> {
        let unlimited = TransactionFilter { limit: None, ..filter.clone() };
        let rows = self.query(user_id, &unlimited)?;
        Ok(AmountStats {
            count: rows.len() as i64,
            sum: rows.iter().map(|t| t.amount).sum(),
        })
    }

    fn status_counts(&self, user_id: &str) -> GuardResult<StatusSummary> {
        let mut summary = StatusSummary::default();
        for tx in self.query(user_id, &TransactionFilter::default())? {
            summary.add(tx.status, 1);
        }
        Ok(summary)
    }
}

/// Source of the per-user fraud alert preference.
pub trait UserPreferences: Send + Sync {
    fn fraud_alerts_enabled(&self, user_id: &str) -> GuardResult<bool>;

    fn set_fraud_alerts_enabled(&self, user_id: &str, enabled: bool) -> GuardResult<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AmountStats {
    pub count: i64,
    pub sum: f64,
}

impl AmountStats {
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Filters for `TransactionStore::query`. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    /// Inclusive bounds on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Inclusive lower bound on the effective `transaction_date`.
    pub effective_since: Option<DateTime<Utc>>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    pub suspicious_only: bool,
    pub exclude_id: Option<String>,
    pub limit: Option<usize>,
}

impl TransactionFilter {
    pub fn created_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_to = Some(to);
        self
    }

    pub fn effective_since(mut self, since: DateTime<Utc>) -> Self {
        self.effective_since = Some(since);
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn of_kind(mut self, kind: TransactionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn suspicious_only(mut self) -> Self {
        self.suspicious_only = true;
        self
    }

    pub fn excluding(mut self, id: impl Into<String>) -> Self {
        self.exclude_id = Some(id.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-process evaluation, for stores without a query engine.
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.created_from.map_or(true, |from| tx.created_at >= from)
            && self.created_to.map_or(true, |to| tx.created_at <= to)
            && self
                .effective_since
                .map_or(true, |since| tx.transaction_date >= since)
            && self.amount.map_or(true, |amount| tx.amount == amount)
            && self
                .description
                .as_ref()
                .map_or(true, |d| &tx.description == d)
            && self.kind.map_or(true, |k| tx.kind == k)
            && self.status.map_or(true, |s| tx.status == s)
            && (!self.suspicious_only || tx.risk_score > SUSPICIOUS_THRESHOLD)
            && self.exclude_id.as_ref().map_or(true, |id| &tx.id != id)
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}
