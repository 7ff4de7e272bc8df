use super::{from_millis, to_millis, LedgerStore};
use crate::{alert_manager::FraudAlert, error::GuardResult};
use rusqlite::{params, OptionalExtension};

const ALERT_COLUMNS: &str = "id, user_id, transaction_id, alert_type, score, message,
    is_read, is_resolved, created_at_ms, resolved_at_ms";

// Helper function for mapping alert rows
fn alert_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<FraudAlert> {
    Ok(FraudAlert {
        id: row.get(0)?,
        user_id: row.get(1)?,
        transaction_id: row.get(2)?,
        alert_type: row.get(3)?,
        score: row.get(4)?,
        message: row.get(5)?,
        is_read: row.get::<_, i32>(6)? != 0,
        is_resolved: row.get::<_, i32>(7)? != 0,
        created_at: from_millis(row.get(8)?)?,
        resolved_at: row.get::<_, Option<i64>>(9)?.map(from_millis).transpose()?,
    })
}

impl LedgerStore {
    // ── Fraud alerts ───────────────────────────────────────────────

    pub fn insert_alert(&self, alert: &FraudAlert) -> GuardResult<()> {
        self.conn()?.execute(
            "INSERT INTO fraud_alert (
                id, user_id, transaction_id, alert_type, score, message,
                is_read, is_resolved, created_at_ms, resolved_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &alert.id,
                &alert.user_id,
                alert.transaction_id.as_deref(),
                &alert.alert_type,
                alert.score,
                &alert.message,
                if alert.is_read { 1i32 } else { 0i32 },
                if alert.is_resolved { 1i32 } else { 0i32 },
                to_millis(alert.created_at),
                alert.resolved_at.map(to_millis),
            ],
        )?;
        Ok(())
    }

    pub fn get_alert(&self, alert_id: &str) -> GuardResult<Option<FraudAlert>> {
        self.conn()?
            .query_row(
                &format!("SELECT {ALERT_COLUMNS} FROM fraud_alert WHERE id = ?1"),
                params![alert_id],
                alert_row_mapper,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn alerts_for_user(&self, user_id: &str, unread_only: bool) -> GuardResult<Vec<FraudAlert>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ALERT_COLUMNS} FROM fraud_alert
             WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
             ORDER BY created_at_ms DESC, rowid DESC"
        ))?;
        let alerts = stmt
            .query_map(params![user_id, unread_only as i32], alert_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(alerts)
    }

    /// Returns false when no such alert exists.
    pub fn mark_alert_read(&self, alert_id: &str) -> GuardResult<bool> {
        let changed = self.conn()?.execute(
            "UPDATE fraud_alert SET is_read = 1 WHERE id = ?1",
            params![alert_id],
        )?;
        Ok(changed > 0)
    }
}
