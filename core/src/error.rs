use crate::transaction::TransactionStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid transition: cannot move from {from} to {attempted}")]
    InvalidTransition {
        from: TransactionStatus,
        attempted: TransactionStatus,
    },

    #[error("Transaction store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Query '{query}' exceeded its deadline")]
    QueryTimeout { query: &'static str },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Concurrent update lost on transaction '{transaction_id}'")]
    Conflict { transaction_id: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GuardError {
    pub fn transaction_not_found(id: &str) -> Self {
        Self::NotFound { entity: "transaction", id: id.to_string() }
    }

    /// True for failures of the backing store itself, as opposed to
    /// business outcomes.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::QueryTimeout { .. } | Self::Database(_)
        )
    }
}

pub type GuardResult<T> = Result<T, GuardError>;
