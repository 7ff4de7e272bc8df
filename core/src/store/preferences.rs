use super::{LedgerStore, UserPreferences};
use crate::error::GuardResult;
use rusqlite::{params, OptionalExtension};

impl UserPreferences for LedgerStore {
    /// Users without a stored row get `alerts.default_enabled`.
    fn fraud_alerts_enabled(&self, user_id: &str) -> GuardResult<bool> {
        let stored: Option<bool> = self.with_deadline("fraud_alerts_enabled", |conn| {
            conn.query_row(
                "SELECT fraud_alerts_enabled FROM user_preference WHERE user_id = ?1",
                params![user_id],
                |row| Ok(row.get::<_, i32>(0)? != 0),
            )
            .optional()
        })?;
        Ok(stored.unwrap_or(self.default_alerts_enabled))
    }

    fn set_fraud_alerts_enabled(&self, user_id: &str, enabled: bool) -> GuardResult<()> {
        self.conn()?.execute(
            "INSERT INTO user_preference (user_id, fraud_alerts_enabled) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET fraud_alerts_enabled = excluded.fraud_alerts_enabled",
            params![user_id, if enabled { 1i32 } else { 0i32 }],
        )?;
        Ok(())
    }
}
