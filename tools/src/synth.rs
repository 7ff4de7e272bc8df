//! Deterministic synthetic spend stream.
//!
//! RULE: The runner never touches a platform RNG. Every entry is drawn
//! from one Pcg stream seeded from `--seed`, so the same seed replays the
//! same ledger, scores and alerts.

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use spendguard_core::{NewTransaction, TransactionKind};

const EVERYDAY: &[&str] = &[
    "groceries", "taxi", "coffee", "pharmacy", "rent", "utilities",
    "restaurant", "cinema", "bookstore", "mobile plan",
];

const RISKY: &[&str] = &[
    "bitcoin purchase", "casino deposit", "lottery ticket", "crypto exchange",
    "ставки на спорт", "trading account top-up",
];

/// Stable stream index for the spend generator. Append new streams, never renumber.
const SPEND_STREAM: u64 = 1;

pub struct SyntheticEntry {
    /// How far the clock moves before this entry is recorded.
    pub gap: Duration,
    pub entry: NewTransaction,
}

pub struct SpendStream {
    rng: Pcg64Mcg,
    users: u64,
    offset: FixedOffset,
    last: Option<NewTransaction>,
}

impl SpendStream {
    pub fn new(seed: u64, users: u64) -> Self {
        let derived = seed ^ SPEND_STREAM.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            rng: Pcg64Mcg::seed_from_u64(derived),
            users: users.max(1),
            // Entries are made in Moscow time.
            offset: FixedOffset::east_opt(3 * 3600).unwrap_or_else(|| Utc.fix()),
            last: None,
        }
    }

    /// Draw the next entry. `now` is the clock before `gap` elapses; the
    /// entry is dated `now + gap`.
    pub fn next_entry(&mut self, now: DateTime<Utc>) -> SyntheticEntry {
        let gap = self.gap();
        let at = (now + gap).with_timezone(&self.offset);

        // Replays of the previous entry model double submissions.
        if let Some(previous) = self.last.clone() {
            if self.rng.gen_bool(0.05) {
                return SyntheticEntry { gap, entry: previous.at(at) };
            }
        }

        let user_id = format!("user-{}", self.rng.gen_range(1..=self.users));
        let roll: f64 = self.rng.gen();
        let entry = if roll < 0.10 {
            NewTransaction::new(user_id, cents(self.pareto(20_000.0, 3.0)), TransactionKind::Income, "salary")
        } else if roll < 0.15 {
            NewTransaction::new(user_id, cents(self.pareto(500.0, 2.0)), TransactionKind::Transfer, "transfer to savings")
        } else {
            let description = if self.rng.gen_bool(0.08) {
                RISKY[self.rng.gen_range(0..RISKY.len())]
            } else {
                EVERYDAY[self.rng.gen_range(0..EVERYDAY.len())]
            };
            let amount = cents(self.pareto(300.0, 1.2).min(250_000.0));
            let entry = NewTransaction::expense(user_id, amount, description);
            if self.rng.gen_bool(0.1) {
                entry.pending()
            } else {
                entry
            }
        };

        self.last = Some(entry.clone());
        SyntheticEntry { gap, entry: entry.at(at) }
    }

    /// Mostly minutes apart, occasionally a burst or a quiet night.
    fn gap(&mut self) -> Duration {
        let roll: f64 = self.rng.gen();
        if roll < 0.2 {
            Duration::seconds(self.rng.gen_range(5..120))
        } else if roll < 0.95 {
            Duration::minutes(self.rng.gen_range(2..90))
        } else {
            Duration::hours(self.rng.gen_range(3..10))
        }
    }

    /// Simplified Pareto. x_min: floor, alpha: shape (higher = less skewed).
    fn pareto(&mut self, x_min: f64, alpha: f64) -> f64 {
        let u: f64 = self.rng.gen::<f64>().max(1e-10);
        x_min * u.powf(-1.0 / alpha)
    }
}

fn cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
