//! The audit event log.
//!
//! RULE: Components never write the log themselves. They return what
//! happened and the engine appends it, in order, to `event_log`.

use crate::{
    alert_manager::Severity,
    reason::ReasonKind,
    transaction::{TransactionKind, TransactionStatus},
    types::{AlertId, TransactionId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variants are appended over time, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardEvent {
    TransactionRecorded {
        transaction_id: TransactionId,
        user_id: UserId,
        amount: f64,
        kind: TransactionKind,
        status: TransactionStatus,
    },
    TransactionScored {
        transaction_id: TransactionId,
        user_id: UserId,
        score: f64,
        suspicious: bool,
        reasons: Vec<ReasonKind>,
    },
    AlertRaised {
        alert_id: AlertId,
        transaction_id: Option<TransactionId>,
        user_id: UserId,
        severity: Severity,
    },
    StatusChanged {
        transaction_id: TransactionId,
        user_id: UserId,
        from: TransactionStatus,
        to: TransactionStatus,
        note: Option<String>,
    },
    AlertRead {
        alert_id: AlertId,
        user_id: UserId,
    },
}

impl GuardEvent {
    pub fn user_id(&self) -> &str {
        match self {
            Self::TransactionRecorded { user_id, .. }
            | Self::TransactionScored { user_id, .. }
            | Self::AlertRaised { user_id, .. }
            | Self::StatusChanged { user_id, .. }
            | Self::AlertRead { user_id, .. } => user_id,
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::TransactionRecorded { transaction_id, .. }
            | Self::TransactionScored { transaction_id, .. }
            | Self::StatusChanged { transaction_id, .. } => Some(transaction_id),
            Self::AlertRaised { transaction_id, .. } => transaction_id.as_deref(),
            Self::AlertRead { .. } => None,
        }
    }
}

pub fn event_type_name(event: &GuardEvent) -> &'static str {
    match event {
        GuardEvent::TransactionRecorded { .. } => "transaction_recorded",
        GuardEvent::TransactionScored { .. }   => "transaction_scored",
        GuardEvent::AlertRaised { .. }         => "alert_raised",
        GuardEvent::StatusChanged { .. }       => "status_changed",
        GuardEvent::AlertRead { .. }           => "alert_read",
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub user_id: UserId,
    pub transaction_id: Option<TransactionId>,
    pub event_type: String,
    pub payload: String, // JSON-serialized GuardEvent
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    pub fn from_event(event: &GuardEvent, created_at: DateTime<Utc>) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            user_id: event.user_id().to_string(),
            transaction_id: event.transaction_id().map(str::to_string),
            event_type: event_type_name(event).to_string(),
            payload: serde_json::to_string(event)?,
            created_at,
        })
    }

    pub fn decode(&self) -> serde_json::Result<GuardEvent> {
        serde_json::from_str(&self.payload)
    }
}
