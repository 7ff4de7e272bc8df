//! The transaction record and its lifecycle status.

use crate::{
    error::{GuardError, GuardResult},
    reason::HeuristicReason,
    risk_scorer::ScoreResult,
    types::{TransactionId, UserId},
};
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// `suspicious ⇔ score > SUSPICIOUS_THRESHOLD`. Never stored as its own flag.
pub const SUSPICIOUS_THRESHOLD: f64 = 0.5;

/// Fixed score forced onto a transaction by a manual suspicious flag.
pub const MANUAL_FLAG_SCORE: f64 = 0.8;

pub const DEFAULT_CURRENCY: &str = "RUB";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Transfer => "transfer",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            "transfer" => Ok(Self::Transfer),
            other => Err(GuardError::Validation(format!("unknown transaction kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Rejected,
    Suspicious,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 4] =
        [Self::Pending, Self::Confirmed, Self::Rejected, Self::Suspicious];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Suspicious => "suspicious",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Rejected => "REJECTED",
            Self::Suspicious => "SUSPICIOUS",
        })
    }
}

impl FromStr for TransactionStatus {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            "suspicious" => Ok(Self::Suspicious),
            other => Err(GuardError::Validation(format!("unknown transaction status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    /// Unsigned magnitude. Direction lives in `kind`.
    pub amount: f64,
    pub kind: TransactionKind,
    pub currency: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Effective timestamp, carrying the offset it was entered in.
    pub transaction_date: DateTime<FixedOffset>,
    pub status: TransactionStatus,
    pub risk_score: f64,
    pub reasons: Vec<HeuristicReason>,
    /// Free-text note left by a manual suspicious flag.
    pub review_note: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped by every store update.
    pub version: i64,
}

impl Transaction {
    pub fn is_suspicious(&self) -> bool {
        self.risk_score > SUSPICIOUS_THRESHOLD
    }

    /// Hour of day in the offset the transaction was entered in.
    pub fn local_hour(&self) -> u32 {
        self.transaction_date.hour()
    }

    /// Copy an analysis onto the record. Rejects scores outside [0, 1].
    pub fn apply_score(&mut self, analysis: &ScoreResult) -> GuardResult<()> {
        validate_score(analysis.score)?;
        self.risk_score = analysis.score;
        self.reasons = analysis.reasons.clone();
        Ok(())
    }
}

pub fn validate_score(score: f64) -> GuardResult<()> {
    if (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        debug_assert!(false, "risk score {score} outside [0, 1]");
        Err(GuardError::Validation(format!("risk score {score} outside [0, 1]")))
    }
}

/// A transaction as handed over by the entry collaborator, before it has
/// an id, a creation stamp or a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub amount: f64,
    pub kind: TransactionKind,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub description: String,
    /// Defaults to the creation instant (UTC) when absent.
    #[serde(default)]
    pub transaction_date: Option<DateTime<FixedOffset>>,
    #[serde(default = "default_initial_status")]
    pub status: TransactionStatus,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_initial_status() -> TransactionStatus {
    TransactionStatus::Confirmed
}

impl NewTransaction {
    pub fn new(
        user_id: impl Into<String>,
        amount: f64,
        kind: TransactionKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
            kind,
            currency: default_currency(),
            description: description.into(),
            transaction_date: None,
            status: default_initial_status(),
        }
    }

    pub fn expense(user_id: impl Into<String>, amount: f64, description: impl Into<String>) -> Self {
        Self::new(user_id, amount, TransactionKind::Expense, description)
    }

    /// Chat-style entry: a negative amount is an expense, anything else income.
    pub fn from_signed(user_id: impl Into<String>, signed: f64, description: impl Into<String>) -> Self {
        let kind = if signed < 0.0 {
            TransactionKind::Expense
        } else {
            TransactionKind::Income
        };
        Self::new(user_id, signed.abs(), kind, description)
    }

    pub fn at(mut self, when: DateTime<FixedOffset>) -> Self {
        self.transaction_date = Some(when);
        self
    }

    pub fn pending(mut self) -> Self {
        self.status = TransactionStatus::Pending;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn validate(&self) -> GuardResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(GuardError::Validation("user id must not be empty".into()));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(GuardError::Validation(format!(
                "amount must be a positive finite magnitude, got {}",
                self.amount
            )));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(GuardError::Validation(format!(
                "currency must be a 3-letter code, got '{}'",
                self.currency
            )));
        }
        // Entry paths create either immediate (confirmed) or review-bound (pending) records.
        if !matches!(self.status, TransactionStatus::Pending | TransactionStatus::Confirmed) {
            return Err(GuardError::Validation(format!(
                "transactions cannot be created as {}",
                self.status
            )));
        }
        Ok(())
    }

    pub fn into_transaction(self, id: TransactionId, created_at: DateTime<Utc>) -> Transaction {
        let transaction_date = self
            .transaction_date
            .unwrap_or_else(|| created_at.fixed_offset());
        Transaction {
            id,
            user_id: self.user_id,
            amount: self.amount,
            kind: self.kind,
            currency: self.currency,
            description: self.description,
            created_at,
            transaction_date,
            status: self.status,
            risk_score: 0.0,
            reasons: Vec::new(),
            review_note: None,
            updated_at: None,
            version: 0,
        }
    }
}

/// Per-status counts for one user. Buckets always sum to `total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub pending: i64,
    pub confirmed: i64,
    pub rejected: i64,
    pub suspicious: i64,
    pub total: i64,
}

impl StatusSummary {
    pub fn add(&mut self, status: TransactionStatus, count: i64) {
        match status {
            TransactionStatus::Pending => self.pending += count,
            TransactionStatus::Confirmed => self.confirmed += count,
            TransactionStatus::Rejected => self.rejected += count,
            TransactionStatus::Suspicious => self.suspicious += count,
        }
        self.total += count;
    }

    pub fn count(&self, status: TransactionStatus) -> i64 {
        match status {
            TransactionStatus::Pending => self.pending,
            TransactionStatus::Confirmed => self.confirmed,
            TransactionStatus::Rejected => self.rejected,
            TransactionStatus::Suspicious => self.suspicious,
        }
    }
}
