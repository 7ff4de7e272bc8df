//! Time source for record creation, alert creation and lifecycle updates.
//!
//! Heuristic windows never read the clock: they are anchored at the
//! candidate transaction's own `created_at`. The clock only stamps new rows.
//!
//! Both clocks tick in whole milliseconds, the precision the ledger keeps,
//! so a freshly built record equals the row read back.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time. Used by the runner and by production callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }
}

/// A clock that only moves when told to. Used in tests and in the
/// synthetic stream so runs are reproducible.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: Mutex::new(start) }
    }

    /// Move forward by `by`. Returns the new instant.
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current += by;
        *current
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.current
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .trunc_subsecs(3)
    }
}
