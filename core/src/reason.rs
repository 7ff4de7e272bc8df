//! Heuristic reasons: the typed record of why a transaction scored.
//!
//! The canonical form is the tagged value (`{"kind": ..., "detail": {...}}`
//! once serialized). Human text is produced by `Display` at the edges.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum HeuristicReason {
    LargeAmount {
        amount: f64,
        threshold: f64,
    },
    VeryLargeAmount {
        amount: f64,
        threshold: f64,
    },
    UnusualHour {
        hour: u32,
    },
    HighVelocity {
        count: i64,
        limit: i64,
        window_minutes: i64,
    },
    KeywordMatch {
        keyword: String,
    },
    AboveAverageSpend {
        amount: f64,
        average: f64,
        multiplier: f64,
    },
    DuplicateBurst {
        count: i64,
        limit: i64,
        window_hours: i64,
    },
}

/// The closed set of heuristic kinds, without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    LargeAmount,
    VeryLargeAmount,
    UnusualHour,
    HighVelocity,
    KeywordMatch,
    AboveAverageSpend,
    DuplicateBurst,
}

impl HeuristicReason {
    pub fn kind(&self) -> ReasonKind {
        match self {
            Self::LargeAmount { .. } => ReasonKind::LargeAmount,
            Self::VeryLargeAmount { .. } => ReasonKind::VeryLargeAmount,
            Self::UnusualHour { .. } => ReasonKind::UnusualHour,
            Self::HighVelocity { .. } => ReasonKind::HighVelocity,
            Self::KeywordMatch { .. } => ReasonKind::KeywordMatch,
            Self::AboveAverageSpend { .. } => ReasonKind::AboveAverageSpend,
            Self::DuplicateBurst { .. } => ReasonKind::DuplicateBurst,
        }
    }
}

impl fmt::Display for HeuristicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LargeAmount { threshold, .. } => {
                write!(f, "Large amount (>{threshold:.0})")
            }
            Self::VeryLargeAmount { threshold, .. } => {
                write!(f, "Very large amount (>{threshold:.0})")
            }
            Self::UnusualHour { hour } => {
                write!(f, "Unusual transaction time ({hour:02}:00)")
            }
            Self::HighVelocity { count, window_minutes, .. } => {
                write!(f, "{count} transactions in the last {window_minutes} minutes")
            }
            Self::KeywordMatch { keyword } => {
                write!(f, "Suspicious description: {keyword}")
            }
            Self::AboveAverageSpend { average, multiplier, .. } => {
                write!(f, "Amount exceeds {multiplier:.0}x average spend ({average:.2})")
            }
            Self::DuplicateBurst { count, window_hours, .. } => {
                write!(f, "Repeated transaction ({count} identical in {window_hours}h)")
            }
        }
    }
}

/// Render a reason list the way alert messages embed it.
pub fn render_reasons(reasons: &[HeuristicReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
