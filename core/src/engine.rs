//! The guard engine: transaction intake and review, wired end to end.
//!
//! INTAKE ORDER (fixed, never reordered):
//!   1. Validate the entry
//!   2. Score it against the owner's history
//!   3. Insert it once, scored (PENDING + suspicious → SUSPICIOUS)
//!   4. Raise an alert if suspicious and the owner wants alerts
//!
//! RULES:
//!   - Scoring never blocks intake: a degraded history only skips heuristics.
//!   - Only a failure to persist the transaction itself is surfaced, and
//!     then nothing of it is left in the ledger.
//!   - All state changes are recorded in the event log.

use crate::{
    alert_manager::{AlertManager, FraudAlert},
    clock::{Clock, SystemClock},
    config::GuardConfig,
    error::{GuardError, GuardResult},
    event::{EventLogEntry, GuardEvent},
    lifecycle::{Transition, TransactionLifecycle},
    risk_scorer::{RiskScorer, ScoreResult},
    store::{LedgerStore, TransactionStore, UserPreferences},
    transaction::{NewTransaction, StatusSummary, Transaction, TransactionStatus},
    types::UserId,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// What intake produced for one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    /// As stored, score and reasons included.
    pub transaction: Transaction,
    pub analysis: ScoreResult,
    /// Present only when suspicious, alerts are enabled and creation succeeded.
    pub alert: Option<FraudAlert>,
}

impl RecordOutcome {
    pub fn suspicious(&self) -> bool {
        self.analysis.suspicious()
    }
}

pub struct GuardEngine {
    config: GuardConfig,
    store: Arc<LedgerStore>,
    clock: Arc<dyn Clock>,
    scorer: RiskScorer,
    alerts: AlertManager,
    lifecycle: TransactionLifecycle,
    user_gates: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl GuardEngine {
    /// Wire an engine over an already migrated store.
    pub fn new(config: GuardConfig, mut store: LedgerStore, clock: Arc<dyn Clock>) -> GuardResult<Self> {
        config.validate()?;
        store.configure(&config)?;
        let store = Arc::new(store);
        let history: Arc<dyn TransactionStore> = store.clone();
        Ok(Self {
            scorer: RiskScorer::new(config.risk.clone()),
            alerts: AlertManager::new(store.clone(), clock.clone()),
            lifecycle: TransactionLifecycle::new(history, clock.clone()),
            user_gates: Mutex::new(HashMap::new()),
            config,
            store,
            clock,
        })
    }

    /// Build a production engine: migrate the store, use wall-clock time.
    pub fn build(config: GuardConfig, store: LedgerStore) -> GuardResult<Self> {
        store.migrate()?;
        Self::new(config, store, Arc::new(SystemClock))
    }

    /// Build an engine over a fresh in-memory store (used in tests).
    pub fn build_test(config: GuardConfig, clock: Arc<dyn Clock>) -> GuardResult<Self> {
        let store = LedgerStore::in_memory()?;
        store.migrate()?;
        Self::new(config, store, clock)
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn scorer(&self) -> &RiskScorer {
        &self.scorer
    }

    pub fn lifecycle(&self) -> &TransactionLifecycle {
        &self.lifecycle
    }

    // ── Intake ─────────────────────────────────────────────────

    pub fn record_transaction(&self, entry: NewTransaction) -> GuardResult<RecordOutcome> {
        entry.validate()?;

        let user_id = entry.user_id.clone();
        let gate = self.user_gate(&user_id);
        let outcome = {
            let _serialized = gate
                .as_ref()
                .map(|g| g.lock().unwrap_or_else(|p| p.into_inner()));
            self.intake(entry)
        };
        if let Some(gate) = gate {
            self.release_gate(&user_id, gate);
        }
        outcome
    }

    fn intake(&self, entry: NewTransaction) -> GuardResult<RecordOutcome> {
        let now = self.clock.now();
        let mut tx = entry.into_transaction(uuid::Uuid::new_v4().to_string(), now);
        let initial = tx.status;

        // Windows exclude the candidate's id, so scoring before insert sees
        // the same history it would see after.
        let analysis = self.scorer.analyze(&tx, self.store.as_ref());
        tx.apply_score(&analysis)?;
        if analysis.suspicious() && initial == TransactionStatus::Pending {
            tx.status = TransactionStatus::Suspicious;
            tx.updated_at = Some(now);
        }
        self.store.insert(&tx)?;

        self.append(GuardEvent::TransactionRecorded {
            transaction_id: tx.id.clone(),
            user_id: tx.user_id.clone(),
            amount: tx.amount,
            kind: tx.kind,
            status: initial,
        });
        self.append(GuardEvent::TransactionScored {
            transaction_id: tx.id.clone(),
            user_id: tx.user_id.clone(),
            score: analysis.score,
            suspicious: analysis.suspicious(),
            reasons: analysis.reasons.iter().map(|r| r.kind()).collect(),
        });
        if tx.status != initial {
            self.append(GuardEvent::StatusChanged {
                transaction_id: tx.id.clone(),
                user_id: tx.user_id.clone(),
                from: initial,
                to: tx.status,
                note: None,
            });
        }

        let alert = if analysis.suspicious() {
            self.raise_alert(&tx, &analysis)
        } else {
            None
        };

        log::info!(
            "user={} tx={} amount={:.2} score={:.2} status={} reasons={}",
            tx.user_id,
            tx.id,
            tx.amount,
            analysis.score,
            tx.status,
            analysis.reasons.len()
        );
        Ok(RecordOutcome { transaction: tx, analysis, alert })
    }

    fn raise_alert(&self, tx: &Transaction, analysis: &ScoreResult) -> Option<FraudAlert> {
        let wanted = self.store.fraud_alerts_enabled(&tx.user_id).unwrap_or_else(|e| {
            log::warn!(
                "user={} preference unavailable ({}), using default {}",
                tx.user_id,
                e,
                self.config.alerts.default_enabled
            );
            self.config.alerts.default_enabled
        });
        if !wanted {
            log::debug!("user={} tx={} alerts disabled, none raised", tx.user_id, tx.id);
            return None;
        }

        match self.alerts.create(tx, analysis) {
            Ok(alert) => {
                self.append(GuardEvent::AlertRaised {
                    alert_id: alert.id.clone(),
                    transaction_id: alert.transaction_id.clone(),
                    user_id: alert.user_id.clone(),
                    severity: alert.severity(),
                });
                Some(alert)
            }
            Err(e) => {
                log::error!("user={} tx={} alert creation failed: {}", tx.user_id, tx.id, e);
                None
            }
        }
    }

    /// Per-user intake lock, when serialized scoring is on.
    fn user_gate(&self, user_id: &str) -> Option<Arc<Mutex<()>>> {
        if !self.config.serialize_user_scoring {
            return None;
        }
        let mut gates = self.user_gates.lock().unwrap_or_else(|p| p.into_inner());
        Some(gates.entry(user_id.to_string()).or_default().clone())
    }

    /// Drop the user's gate once no other intake holds or awaits it.
    fn release_gate(&self, user_id: &str, gate: Arc<Mutex<()>>) {
        let mut gates = self.user_gates.lock().unwrap_or_else(|p| p.into_inner());
        // Clones are only handed out under this lock: the map entry and
        // `gate` are the last two references.
        if Arc::strong_count(&gate) == 2 {
            gates.remove(user_id);
        }
    }

    // ── Review ─────────────────────────────────────────────────

    pub fn confirm(&self, transaction_id: &str, user_id: &str) -> GuardResult<Transition> {
        let transition = self.lifecycle.confirm(transaction_id, user_id)?;
        self.append(transition.event());
        Ok(transition)
    }

    pub fn reject(&self, transaction_id: &str, user_id: &str, reason: Option<&str>) -> GuardResult<Transition> {
        let transition = self.lifecycle.reject(transaction_id, user_id, reason)?;
        self.append(transition.event());
        Ok(transition)
    }

    pub fn mark_suspicious(
        &self,
        transaction_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> GuardResult<Transition> {
        let transition = self.lifecycle.mark_suspicious(transaction_id, user_id, reason)?;
        self.append(transition.event());
        Ok(transition)
    }

    pub fn status_summary(&self, user_id: &str) -> GuardResult<StatusSummary> {
        self.lifecycle.status_summary(user_id)
    }

    // ── Alerts and preferences ─────────────────────────────────

    pub fn alerts(&self, user_id: &str, unread_only: bool) -> GuardResult<Vec<FraudAlert>> {
        self.alerts.list(user_id, unread_only)
    }

    pub fn mark_alert_read(&self, alert_id: &str) -> GuardResult<bool> {
        let Some(alert) = self.alerts.get(alert_id)? else {
            return Ok(false);
        };
        let marked = self.alerts.mark_read(alert_id)?;
        if marked && !alert.is_read {
            self.append(GuardEvent::AlertRead {
                alert_id: alert.id,
                user_id: alert.user_id,
            });
        }
        Ok(marked)
    }

    pub fn fraud_alerts_enabled(&self, user_id: &str) -> GuardResult<bool> {
        self.store.fraud_alerts_enabled(user_id)
    }

    pub fn set_fraud_alerts(&self, user_id: &str, enabled: bool) -> GuardResult<()> {
        self.store.set_fraud_alerts_enabled(user_id, enabled)?;
        log::info!("user={} fraud_alerts_enabled={}", user_id, enabled);
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    /// Used by the audit tests and replay tooling.
    pub fn events_for_transaction(&self, transaction_id: &str) -> GuardResult<Vec<EventLogEntry>> {
        self.store.events_for_transaction(transaction_id)
    }

    /// A failed append is logged at warn; the caller carries on.
    fn append(&self, event: GuardEvent) {
        let result = EventLogEntry::from_event(&event, self.clock.now())
            .map_err(GuardError::from)
            .and_then(|entry| self.store.append_event(&entry));
        if let Err(e) = result {
            log::warn!(
                "user={} event={} not logged: {}",
                event.user_id(),
                crate::event::event_type_name(&event),
                e
            );
        }
    }
}
