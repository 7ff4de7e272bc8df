//! Scoring against history that is slow, failing, or not backed by SQL,
//! and intake under concurrent submissions from one user.

use chrono::{DateTime, Duration, TimeZone, Utc};
use spendguard_core::{
    config::RiskConfig,
    reason::{HeuristicReason, ReasonKind},
    store::AmountStats,
    GuardConfig, GuardEngine, GuardError, GuardResult, LedgerStore, ManualClock, NewTransaction,
    RiskScorer, Transaction, TransactionFilter, TransactionStatus, TransactionStore,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap()
}

fn kinds(reasons: &[HeuristicReason]) -> Vec<ReasonKind> {
    reasons.iter().map(|r| r.kind()).collect()
}

/// Writes go through; every history read fails.
struct UnreachableHistory {
    inner: LedgerStore,
}

impl TransactionStore for UnreachableHistory {
    fn insert(&self, tx: &Transaction) -> GuardResult<()> {
        self.inner.insert(tx)
    }

    fn get(&self, id: &str, user_id: &str) -> GuardResult<Option<Transaction>> {
        self.inner.get(id, user_id)
    }

    fn query(&self, _user_id: &str, _filter: &TransactionFilter) -> GuardResult<Vec<Transaction>> {
        Err(GuardError::StoreUnavailable("replica offline".into()))
    }

    fn update(&self, tx: &Transaction) -> GuardResult<Transaction> {
        self.inner.update(tx)
    }

    fn count(&self, _user_id: &str, _filter: &TransactionFilter) -> GuardResult<i64> {
        Err(GuardError::QueryTimeout { query: "count_transactions" })
    }
}

/// Plain in-process store relying on the provided aggregate methods.
#[derive(Default)]
struct VecStore {
    rows: Mutex<Vec<Transaction>>,
}

impl TransactionStore for VecStore {
    fn insert(&self, tx: &Transaction) -> GuardResult<()> {
        self.rows.lock().unwrap().push(tx.clone());
        Ok(())
    }

    fn get(&self, id: &str, user_id: &str) -> GuardResult<Option<Transaction>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id && t.user_id == user_id)
            .cloned())
    }

    fn query(&self, user_id: &str, filter: &TransactionFilter) -> GuardResult<Vec<Transaction>> {
        let mut rows: Vec<_> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id && filter.matches(t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn update(&self, tx: &Transaction) -> GuardResult<Transaction> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|t| t.id == tx.id && t.user_id == tx.user_id) else {
            return Err(GuardError::transaction_not_found(&tx.id));
        };
        if row.version != tx.version {
            return Err(GuardError::Conflict { transaction_id: tx.id.clone() });
        }
        let mut stored = tx.clone();
        stored.version += 1;
        *row = stored.clone();
        Ok(stored)
    }
}

/// Reads go to the ledger; every write is counted.
struct CountingWrites {
    inner: LedgerStore,
    writes: AtomicUsize,
}

impl TransactionStore for CountingWrites {
    fn insert(&self, tx: &Transaction) -> GuardResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.insert(tx)
    }

    fn get(&self, id: &str, user_id: &str) -> GuardResult<Option<Transaction>> {
        self.inner.get(id, user_id)
    }

    fn query(&self, user_id: &str, filter: &TransactionFilter) -> GuardResult<Vec<Transaction>> {
        self.inner.query(user_id, filter)
    }

    fn update(&self, tx: &Transaction) -> GuardResult<Transaction> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update(tx)
    }

    fn count(&self, user_id: &str, filter: &TransactionFilter) -> GuardResult<i64> {
        self.inner.count(user_id, filter)
    }

    fn amount_stats(&self, user_id: &str, filter: &TransactionFilter) -> GuardResult<AmountStats> {
        self.inner.amount_stats(user_id, filter)
    }
}

fn history_rows() -> Vec<Transaction> {
    let mut rows = Vec::new();
    for i in 0..6 {
        let at = start() + Duration::minutes(i * 5);
        rows.push(
            NewTransaction::expense("u1", 60_000.0, "casino")
                .into_transaction(format!("h{i}"), at),
        );
    }
    rows
}

#[test]
fn failing_history_skips_only_history_heuristics() {
    let history = UnreachableHistory { inner: LedgerStore::in_memory().unwrap() };
    history.inner.migrate().unwrap();
    for tx in history_rows() {
        history.insert(&tx).unwrap();
    }

    let candidate = NewTransaction::expense("u1", 60_000.0, "casino")
        .into_transaction("candidate".into(), start() + Duration::minutes(30));
    history.insert(&candidate).unwrap();

    let result = RiskScorer::new(RiskConfig::default()).analyze(&candidate, &history);
    // Velocity, average and duplicates all need history; none of them fire.
    assert_eq!(
        kinds(&result.reasons),
        vec![ReasonKind::LargeAmount, ReasonKind::VeryLargeAmount, ReasonKind::KeywordMatch]
    );
    assert_eq!(result.score, 0.9);
    assert!(result.suspicious());
}

#[test]
fn analysis_never_writes_to_history() {
    let history = CountingWrites {
        inner: LedgerStore::in_memory().unwrap(),
        writes: AtomicUsize::new(0),
    };
    history.inner.migrate().unwrap();
    for tx in history_rows() {
        history.inner.insert(&tx).unwrap();
    }
    let candidate = NewTransaction::expense("u1", 60_000.0, "casino")
        .into_transaction("candidate".into(), start() + Duration::minutes(30));
    history.inner.insert(&candidate).unwrap();
    let before = history.inner.query("u1", &TransactionFilter::default()).unwrap();

    let scorer = RiskScorer::new(RiskConfig::default());
    let result = scorer.analyze(&candidate, &history);
    scorer.analyze(&candidate, &history);

    assert_eq!(result.score, 1.0);
    assert_eq!(history.writes.load(Ordering::SeqCst), 0);
    // Score and reasons stay the caller's to persist.
    let after = history.inner.query("u1", &TransactionFilter::default()).unwrap();
    assert_eq!(after, before);
    let stored = history.inner.get("candidate", "u1").unwrap().unwrap();
    assert_eq!(stored.risk_score, 0.0);
    assert!(stored.reasons.is_empty());
    assert_eq!(stored.version, 0);
}

#[test]
fn provided_aggregates_score_like_sql_ones() {
    let sql = LedgerStore::in_memory().unwrap();
    sql.migrate().unwrap();
    let plain = VecStore::default();
    for tx in history_rows() {
        sql.insert(&tx).unwrap();
        plain.insert(&tx).unwrap();
    }

    let candidate = NewTransaction::expense("u1", 60_000.0, "casino")
        .into_transaction("candidate".into(), start() + Duration::minutes(30));
    let scorer = RiskScorer::new(RiskConfig::default());
    let from_sql = scorer.analyze(&candidate, &sql);
    let from_plain = scorer.analyze(&candidate, &plain);

    assert_eq!(from_sql, from_plain);
    assert!(from_sql
        .reasons
        .contains(&HeuristicReason::HighVelocity { count: 7, limit: 5, window_minutes: 60 }));
    assert!(from_sql
        .reasons
        .contains(&HeuristicReason::DuplicateBurst { count: 7, limit: 2, window_hours: 24 }));
    assert_eq!(plain.status_counts("u1").unwrap().confirmed, 6);
    assert_eq!(sql.status_counts("u1").unwrap(), plain.status_counts("u1").unwrap());
}

#[test]
fn analysis_runs_before_insert_too() {
    let store = LedgerStore::in_memory().unwrap();
    store.migrate().unwrap();
    for tx in history_rows().into_iter().take(5) {
        store.insert(&tx).unwrap();
    }

    // Not inserted: the candidate still counts once towards its windows.
    let candidate = NewTransaction::expense("u1", 80.0, "bakery")
        .into_transaction("fresh".into(), start() + Duration::minutes(40));
    let result = RiskScorer::new(RiskConfig::default()).analyze(&candidate, &store);
    assert_eq!(
        result.reasons,
        vec![HeuristicReason::HighVelocity { count: 6, limit: 5, window_minutes: 60 }]
    );
}

#[test]
fn concurrent_intake_for_one_user_is_serialized() {
    let clock = Arc::new(ManualClock::new(start()));
    let engine = GuardEngine::build_test(GuardConfig::default(), clock).unwrap();
    let descriptions = ["coffee", "taxi", "lunch", "bookstore", "pharmacy", "bakery"];

    let outcomes: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = descriptions
            .iter()
            .map(|description| {
                let engine = &engine;
                s.spawn(move || {
                    engine
                        .record_transaction(NewTransaction::expense("u1", 100.0, *description))
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    // Each submission sees every earlier one, so exactly one is the sixth.
    let flagged: Vec<_> = outcomes
        .iter()
        .filter(|o| !o.analysis.reasons.is_empty())
        .collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(
        flagged[0].analysis.reasons,
        vec![HeuristicReason::HighVelocity { count: 6, limit: 5, window_minutes: 60 }]
    );
    assert_eq!(engine.status_summary("u1").unwrap().count(TransactionStatus::Confirmed), 6);
}
