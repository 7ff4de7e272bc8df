//! Shared primitive types used across the engine.

/// Owning user of transactions, alerts and preferences.
pub type UserId = String;

/// A stable, unique identifier for a transaction (uuid v4).
pub type TransactionId = String;

/// A stable, unique identifier for a fraud alert (uuid v4).
pub type AlertId = String;
