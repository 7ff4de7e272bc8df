//! The transaction status state machine.
//!
//! ```text
//! PENDING ──confirm──▶ CONFIRMED
//!    │                    ▲
//!    └──reject──▶ REJECTED│
//!                         │ confirm / reject
//! any ──mark_suspicious──▶ SUSPICIOUS
//! ```
//!
//! Every transition is a read-modify-write guarded by the record's
//! version. A writer that loses the race re-reads and re-checks its guard,
//! so it reports the state that actually won.

use crate::{
    clock::Clock,
    error::{GuardError, GuardResult},
    event::GuardEvent,
    store::{TransactionFilter, TransactionStore},
    transaction::{StatusSummary, Transaction, TransactionStatus, MANUAL_FLAG_SCORE},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Note recorded by `mark_suspicious` when the caller gives none.
pub const DEFAULT_FLAG_NOTE: &str = "flagged manually";

const MAX_TRANSITION_ATTEMPTS: usize = 8;

/// Guard for one status change.
///
/// Confirm is refused from CONFIRMED and REJECTED, reject from REJECTED and
/// CONFIRMED. SUSPICIOUS is reachable from everywhere and leaves both
/// confirm and reject open. Nothing returns to PENDING.
pub fn check_transition(from: TransactionStatus, to: TransactionStatus) -> GuardResult<()> {
    use TransactionStatus::*;
    let allowed = match to {
        Suspicious => true,
        Confirmed => matches!(from, Pending | Suspicious),
        Rejected => matches!(from, Pending | Suspicious),
        Pending => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(GuardError::InvalidTransition { from, attempted: to })
    }
}

/// A committed status change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The record as stored after the change.
    pub transaction: Transaction,
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    pub note: Option<String>,
}

impl Transition {
    pub fn event(&self) -> GuardEvent {
        GuardEvent::StatusChanged {
            transaction_id: self.transaction.id.clone(),
            user_id: self.transaction.user_id.clone(),
            from: self.from,
            to: self.to,
            note: self.note.clone(),
        }
    }
}

pub struct TransactionLifecycle {
    store: Arc<dyn TransactionStore>,
    clock: Arc<dyn Clock>,
}

impl TransactionLifecycle {
    pub fn new(store: Arc<dyn TransactionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn get(&self, transaction_id: &str, user_id: &str) -> GuardResult<Transaction> {
        self.store
            .get(transaction_id, user_id)?
            .ok_or_else(|| GuardError::transaction_not_found(transaction_id))
    }

    pub fn confirm(&self, transaction_id: &str, user_id: &str) -> GuardResult<Transition> {
        self.transition(transaction_id, user_id, TransactionStatus::Confirmed, None)
    }

    /// A non-blank reason is appended to the description as an audit trail.
    pub fn reject(&self, transaction_id: &str, user_id: &str, reason: Option<&str>) -> GuardResult<Transition> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        self.transition(
            transaction_id,
            user_id,
            TransactionStatus::Rejected,
            reason.map(str::to_string),
        )
    }

    /// Manual override: forces the fixed flag score and records the note.
    /// The heuristic reasons already on the record are kept.
    pub fn mark_suspicious(
        &self,
        transaction_id: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> GuardResult<Transition> {
        let note = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_FLAG_NOTE);
        self.transition(
            transaction_id,
            user_id,
            TransactionStatus::Suspicious,
            Some(note.to_string()),
        )
    }

    fn transition(
        &self,
        transaction_id: &str,
        user_id: &str,
        to: TransactionStatus,
        note: Option<String>,
    ) -> GuardResult<Transition> {
        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            let current = self.get(transaction_id, user_id)?;
            let from = current.status;
            check_transition(from, to)?;

            let mut next = current;
            next.status = to;
            next.updated_at = Some(self.clock.now());
            match to {
                TransactionStatus::Rejected => {
                    if let Some(reason) = &note {
                        next.description = with_rejection_suffix(&next.description, reason);
                    }
                }
                TransactionStatus::Suspicious => {
                    next.risk_score = MANUAL_FLAG_SCORE;
                    next.review_note = note.clone();
                }
                TransactionStatus::Pending | TransactionStatus::Confirmed => {}
            }

            match self.store.update(&next) {
                Ok(stored) => {
                    log::info!(
                        "user={} tx={} status {} -> {}",
                        user_id,
                        transaction_id,
                        from,
                        to
                    );
                    return Ok(Transition { transaction: stored, from, to, note });
                }
                Err(GuardError::Conflict { .. }) => {
                    log::debug!(
                        "user={} tx={} lost update race (attempt {}), re-reading",
                        user_id,
                        transaction_id,
                        attempt
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(GuardError::Conflict { transaction_id: transaction_id.to_string() })
    }

    // ── Read-only views ────────────────────────────────────────

    pub fn status_summary(&self, user_id: &str) -> GuardResult<StatusSummary> {
        self.store.status_counts(user_id)
    }

    /// Newest first.
    pub fn pending(&self, user_id: &str, limit: usize) -> GuardResult<Vec<Transaction>> {
        self.by_status(user_id, TransactionStatus::Pending, limit)
    }

    /// Flagged by score, whatever their status. Newest first.
    pub fn suspicious(&self, user_id: &str, limit: usize) -> GuardResult<Vec<Transaction>> {
        self.store
            .query(user_id, &TransactionFilter::default().suspicious_only().limit(limit))
    }

    pub fn by_status(
        &self,
        user_id: &str,
        status: TransactionStatus,
        limit: usize,
    ) -> GuardResult<Vec<Transaction>> {
        self.store
            .query(user_id, &TransactionFilter::default().with_status(status).limit(limit))
    }

    /// Flagged transactions whose effective timestamp is at or after `since`.
    pub fn recent_suspicious(&self, user_id: &str, since: DateTime<Utc>) -> GuardResult<Vec<Transaction>> {
        self.store.query(
            user_id,
            &TransactionFilter::default().suspicious_only().effective_since(since),
        )
    }
}

fn with_rejection_suffix(description: &str, reason: &str) -> String {
    if description.is_empty() {
        format!("[REJECTED: {reason}]")
    } else {
        format!("{description} [REJECTED: {reason}]")
    }
}
