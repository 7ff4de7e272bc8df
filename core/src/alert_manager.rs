//! Fraud alerts raised from suspicious scoring results.
//!
//! Severity is never stored. It is recomputed from the persisted score
//! every time it is read.

use crate::{
    clock::Clock,
    error::GuardResult,
    reason::render_reasons,
    risk_scorer::ScoreResult,
    store::LedgerStore,
    transaction::{validate_score, Transaction},
    types::{AlertId, TransactionId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

pub const ALERT_TYPE_SUSPICIOUS: &str = "SUSPICIOUS_TRANSACTION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// `> 0.7` high, `> 0.5` medium, low otherwise. Both bounds exclusive.
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            Self::High
        } else if score > 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAlert {
    pub id: AlertId,
    pub user_id: UserId,
    /// None once the transaction has been deleted elsewhere.
    pub transaction_id: Option<TransactionId>,
    pub alert_type: String,
    pub score: f64,
    pub message: String,
    pub is_read: bool,
    pub is_resolved: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl FraudAlert {
    pub fn severity(&self) -> Severity {
        Severity::from_score(self.score)
    }
}

pub struct AlertManager {
    store: Arc<LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl AlertManager {
    pub fn new(store: Arc<LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Persist an alert for a flagged transaction.
    ///
    /// Callers decide whether to call this at all: the analysis must be
    /// suspicious and the owner must have fraud alerts enabled.
    pub fn create(&self, tx: &Transaction, analysis: &ScoreResult) -> GuardResult<FraudAlert> {
        validate_score(analysis.score)?;
        let alert = FraudAlert {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: tx.user_id.clone(),
            transaction_id: Some(tx.id.clone()),
            alert_type: ALERT_TYPE_SUSPICIOUS.to_string(),
            score: analysis.score,
            message: compose_message(tx, analysis),
            is_read: false,
            is_resolved: false,
            created_at: self.clock.now(),
            resolved_at: None,
        };
        self.store.insert_alert(&alert)?;
        log::warn!(
            "user={} tx={} alert={} severity={} score={:.2}",
            alert.user_id,
            tx.id,
            alert.id,
            alert.severity(),
            alert.score
        );
        Ok(alert)
    }

    /// Newest first.
    pub fn list(&self, user_id: &str, unread_only: bool) -> GuardResult<Vec<FraudAlert>> {
        self.store.alerts_for_user(user_id, unread_only)
    }

    pub fn get(&self, alert_id: &str) -> GuardResult<Option<FraudAlert>> {
        self.store.get_alert(alert_id)
    }

    /// Idempotent. False only when the alert does not exist.
    pub fn mark_read(&self, alert_id: &str) -> GuardResult<bool> {
        self.store.mark_alert_read(alert_id)
    }
}

fn compose_message(tx: &Transaction, analysis: &ScoreResult) -> String {
    let reasons = if analysis.reasons.is_empty() {
        "none".to_string()
    } else {
        render_reasons(&analysis.reasons)
    };
    format!(
        "Suspicious transaction: {:.2} {} - {}. Reasons: {}",
        tx.amount, tx.currency, tx.description, reasons
    )
}
