use super::{from_millis, to_millis, LedgerStore};
use crate::{error::GuardResult, event::EventLogEntry};
use rusqlite::params;

impl LedgerStore {
    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> GuardResult<()> {
        self.conn()?.execute(
            "INSERT INTO event_log (user_id, transaction_id, event_type, payload, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &entry.user_id,
                entry.transaction_id.as_deref(),
                &entry.event_type,
                &entry.payload,
                to_millis(entry.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_transaction(&self, transaction_id: &str) -> GuardResult<Vec<EventLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, transaction_id, event_type, payload, created_at_ms
             FROM event_log WHERE transaction_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![transaction_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    user_id: row.get(1)?,
                    transaction_id: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                    created_at: from_millis(row.get(5)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, user_id: &str) -> GuardResult<i64> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM event_log WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
