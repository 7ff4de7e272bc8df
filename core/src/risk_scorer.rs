//! Weighted heuristic risk scoring.
//!
//! RULE: The scorer only reads. It never writes to the store; callers
//! persist the returned score and reasons onto the transaction.
//!
//! Historical windows are anchored at the candidate's own `created_at`, so
//! the same candidate against the same history always scores the same.
//! The candidate always counts towards its own windows, whether or not it
//! has been inserted yet.

use crate::{
    config::RiskConfig,
    error::GuardResult,
    reason::HeuristicReason,
    store::{AmountStats, TransactionFilter, TransactionStore},
    transaction::{Transaction, TransactionKind, SUSPICIOUS_THRESHOLD},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Always within [0, 1].
    pub score: f64,
    /// Triggered heuristics only, in evaluation order.
    pub reasons: Vec<HeuristicReason>,
}

impl ScoreResult {
    pub fn clean() -> Self {
        Self { score: 0.0, reasons: Vec::new() }
    }

    pub fn suspicious(&self) -> bool {
        self.score > SUSPICIOUS_THRESHOLD
    }
}

pub struct RiskScorer {
    config: RiskConfig,
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Score one transaction against its owner's history.
    ///
    /// Only expenses are scored. A history query that fails or runs past
    /// its deadline skips that heuristic; analysis itself never fails.
    pub fn analyze(&self, tx: &Transaction, history: &dyn TransactionStore) -> ScoreResult {
        if !self.config.enabled || tx.kind != TransactionKind::Expense {
            return ScoreResult::clean();
        }

        let cfg = &self.config;
        let mut score = 0.0;
        let mut reasons = Vec::new();

        // 1. Amount thresholds (additive)
        if tx.amount > cfg.large_amount_threshold {
            score += cfg.large_amount_weight;
            reasons.push(HeuristicReason::LargeAmount {
                amount: tx.amount,
                threshold: cfg.large_amount_threshold,
            });
        }
        if tx.amount > cfg.very_large_amount_threshold {
            score += cfg.very_large_amount_weight;
            reasons.push(HeuristicReason::VeryLargeAmount {
                amount: tx.amount,
                threshold: cfg.very_large_amount_threshold,
            });
        }

        // 2. Time of day, in the offset the entry was made in
        let hour = tx.local_hour();
        if hour < cfg.unusual_hour_before || hour > cfg.unusual_hour_after {
            score += cfg.unusual_hour_weight;
            reasons.push(HeuristicReason::UnusualHour { hour });
        }

        // 3. Velocity
        let velocity = self.prior(tx, Duration::minutes(cfg.velocity_window_minutes));
        if let Some(prior) = self.consult(tx, "velocity", history.count(&tx.user_id, &velocity)) {
            let count = prior + 1;
            if count > cfg.velocity_limit {
                score += cfg.velocity_weight;
                reasons.push(HeuristicReason::HighVelocity {
                    count,
                    limit: cfg.velocity_limit,
                    window_minutes: cfg.velocity_window_minutes,
                });
            }
        }

        // 4. Description denylist
        if let Some(keyword) = match_keyword(&tx.description, &cfg.suspicious_keywords) {
            score += cfg.keyword_weight;
            reasons.push(HeuristicReason::KeywordMatch { keyword: keyword.to_string() });
        }

        // 5. Spend against the user's recent expense average
        let spend = self
            .prior(tx, Duration::days(cfg.average_window_days))
            .of_kind(TransactionKind::Expense);
        if let Some(stats) = self.consult(tx, "average_spend", history.amount_stats(&tx.user_id, &spend)) {
            let average = with_candidate(stats, tx.amount);
            if average > 0.0 && tx.amount > average * cfg.average_multiplier {
                score += cfg.average_weight;
                reasons.push(HeuristicReason::AboveAverageSpend {
                    amount: tx.amount,
                    average,
                    multiplier: cfg.average_multiplier,
                });
            }
        }

        // 6. Identical amount and description in a burst
        let duplicates = self
            .prior(tx, Duration::hours(cfg.duplicate_window_hours))
            .with_amount(tx.amount)
            .with_description(tx.description.clone());
        if let Some(prior) = self.consult(tx, "duplicate_burst", history.count(&tx.user_id, &duplicates)) {
            let count = prior + 1;
            if count > cfg.duplicate_limit {
                score += cfg.duplicate_weight;
                reasons.push(HeuristicReason::DuplicateBurst {
                    count,
                    limit: cfg.duplicate_limit,
                    window_hours: cfg.duplicate_window_hours,
                });
            }
        }

        let score = clamp_score(score);
        log::debug!(
            "user={} tx={} score={:.2} reasons={}",
            tx.user_id,
            tx.id,
            score,
            reasons.len()
        );
        ScoreResult { score, reasons }
    }

    /// Other transactions of the owner created in `[created_at - window, created_at]`.
    fn prior(&self, tx: &Transaction, window: Duration) -> TransactionFilter {
        TransactionFilter::default()
            .created_between(tx.created_at - window, tx.created_at)
            .excluding(tx.id.clone())
    }

    fn consult<T>(&self, tx: &Transaction, heuristic: &'static str, result: GuardResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) if e.is_store_failure() => {
                log::warn!(
                    "user={} tx={} heuristic={} skipped: {}",
                    tx.user_id,
                    tx.id,
                    heuristic,
                    e
                );
                None
            }
            Err(e) => {
                log::error!(
                    "user={} tx={} heuristic={} skipped on unexpected error: {}",
                    tx.user_id,
                    tx.id,
                    heuristic,
                    e
                );
                None
            }
        }
    }
}

/// First denylisted keyword found in the description, in list order.
pub fn match_keyword<'a>(description: &str, keywords: &'a [String]) -> Option<&'a str> {
    let description = description.to_lowercase();
    keywords
        .iter()
        .find(|k| !k.is_empty() && description.contains(&k.to_lowercase()))
        .map(String::as_str)
}

fn with_candidate(prior: AmountStats, amount: f64) -> f64 {
    (prior.sum + amount) / (prior.count + 1) as f64
}

/// Weights are decimal fractions; drop binary noise before clamping so a
/// sum such as 0.3 + 0.2 lands exactly on the suspicious boundary.
fn clamp_score(raw: f64) -> f64 {
    ((raw * 1e9).round() / 1e9).clamp(0.0, 1.0)
}
