use super::{from_millis, to_millis, AmountStats, LedgerStore, TransactionFilter, TransactionStore};
use crate::{
    error::{GuardError, GuardResult},
    transaction::{StatusSummary, Transaction, TransactionStatus, SUSPICIOUS_THRESHOLD},
};
use chrono::DateTime;
use rusqlite::{params, params_from_iter, types::Type, types::Value, OptionalExtension};

const TRANSACTION_COLUMNS: &str = "id, user_id, amount, kind, currency, description, created_at_ms,
    transaction_date, status, risk_score, reasons, review_note, updated_at_ms, version";

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn transaction_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let kind: String = row.get(3)?;
    let transaction_date: String = row.get(7)?;
    let status: String = row.get(8)?;
    let reasons: String = row.get(10)?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        kind: kind.parse().map_err(|e| conversion_error(3, e))?,
        currency: row.get(4)?,
        description: row.get(5)?,
        created_at: from_millis(row.get(6)?)?,
        transaction_date: DateTime::parse_from_rfc3339(&transaction_date)
            .map_err(|e| conversion_error(7, e))?,
        status: status.parse().map_err(|e| conversion_error(8, e))?,
        risk_score: row.get(9)?,
        reasons: serde_json::from_str(&reasons).map_err(|e| conversion_error(10, e))?,
        review_note: row.get(11)?,
        updated_at: row.get::<_, Option<i64>>(12)?.map(from_millis).transpose()?,
        version: row.get(13)?,
    })
}

/// WHERE clause and bound values for one user's filtered rows.
fn filter_clause(user_id: &str, filter: &TransactionFilter) -> (String, Vec<Value>) {
    let mut clause = String::from("user_id = ?");
    let mut values = vec![Value::Text(user_id.to_string())];

    if let Some(from) = filter.created_from {
        clause.push_str(" AND created_at_ms >= ?");
        values.push(Value::Integer(to_millis(from)));
    }
    if let Some(to) = filter.created_to {
        clause.push_str(" AND created_at_ms <= ?");
        values.push(Value::Integer(to_millis(to)));
    }
    if let Some(since) = filter.effective_since {
        clause.push_str(" AND transaction_at_ms >= ?");
        values.push(Value::Integer(to_millis(since)));
    }
    if let Some(amount) = filter.amount {
        clause.push_str(" AND amount = ?");
        values.push(Value::Real(amount));
    }
    if let Some(description) = &filter.description {
        clause.push_str(" AND description = ?");
        values.push(Value::Text(description.clone()));
    }
    if let Some(kind) = filter.kind {
        clause.push_str(" AND kind = ?");
        values.push(Value::Text(kind.as_str().to_string()));
    }
    if let Some(status) = filter.status {
        clause.push_str(" AND status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }
    if filter.suspicious_only {
        clause.push_str(" AND risk_score > ?");
        values.push(Value::Real(SUSPICIOUS_THRESHOLD));
    }
    if let Some(id) = &filter.exclude_id {
        clause.push_str(" AND id <> ?");
        values.push(Value::Text(id.clone()));
    }
    (clause, values)
}

impl TransactionStore for LedgerStore {
    fn insert(&self, tx: &Transaction) -> GuardResult<()> {
        let reasons = serde_json::to_string(&tx.reasons)?;
        self.conn()?.execute(
            "INSERT INTO ledger_transaction (
                id, user_id, amount, kind, currency, description, created_at_ms,
                transaction_date, transaction_at_ms, status, risk_score, reasons,
                review_note, updated_at_ms, version
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                &tx.id,
                &tx.user_id,
                tx.amount,
                tx.kind.as_str(),
                &tx.currency,
                &tx.description,
                to_millis(tx.created_at),
                tx.transaction_date.to_rfc3339(),
                tx.transaction_date.timestamp_millis(),
                tx.status.as_str(),
                tx.risk_score,
                reasons,
                tx.review_note.as_deref(),
                tx.updated_at.map(to_millis),
                tx.version,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: &str, user_id: &str) -> GuardResult<Option<Transaction>> {
        self.with_deadline("get_transaction", |conn| {
            conn.query_row(
                &format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM ledger_transaction
                     WHERE id = ?1 AND user_id = ?2"
                ),
                params![id, user_id],
                transaction_row_mapper,
            )
            .optional()
        })
    }

    fn query(&self, user_id: &str, filter: &TransactionFilter) -> GuardResult<Vec<Transaction>> {
        let (clause, mut values) = filter_clause(user_id, filter);
        let mut sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM ledger_transaction
             WHERE {clause} ORDER BY created_at_ms DESC, rowid DESC"
        );
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit as i64));
        }
        self.with_deadline("query_transactions", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), transaction_row_mapper)?;
            rows.collect()
        })
    }

    fn update(&self, tx: &Transaction) -> GuardResult<Transaction> {
        let reasons = serde_json::to_string(&tx.reasons)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE ledger_transaction
             SET status = ?1, risk_score = ?2, reasons = ?3, review_note = ?4,
                 updated_at_ms = ?5, description = ?9, version = version + 1
             WHERE id = ?6 AND user_id = ?7 AND version = ?8",
            params![
                tx.status.as_str(),
                tx.risk_score,
                reasons,
                tx.review_note.as_deref(),
                tx.updated_at.map(to_millis),
                &tx.id,
                &tx.user_id,
                tx.version,
                &tx.description,
            ],
        )?;
        if changed == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM ledger_transaction WHERE id = ?1 AND user_id = ?2)",
                params![&tx.id, &tx.user_id],
                |row| row.get(0),
            )?;
            return Err(if exists {
                GuardError::Conflict { transaction_id: tx.id.clone() }
            } else {
                GuardError::transaction_not_found(&tx.id)
            });
        }
        let mut stored = tx.clone();
        stored.version += 1;
        Ok(stored)
    }

    fn count(&self, user_id: &str, filter: &TransactionFilter) -> GuardResult<i64> {
        let (clause, values) = filter_clause(user_id, filter);
        self.with_deadline("count_transactions", |conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM ledger_transaction WHERE {clause}"),
                params_from_iter(values),
                |row| row.get(0),
            )
        })
    }

    fn amount_stats(&self, user_id: &str, filter: &TransactionFilter) -> GuardResult<AmountStats> {
        let (clause, values) = filter_clause(user_id, filter);
        self.with_deadline("amount_stats", |conn| {
            conn.query_row(
                &format!(
                    "SELECT COUNT(*), COALESCE(SUM(amount), 0.0)
                     FROM ledger_transaction WHERE {clause}"
                ),
                params_from_iter(values),
                |row| Ok(AmountStats { count: row.get(0)?, sum: row.get(1)? }),
            )
        })
    }

    fn status_counts(&self, user_id: &str) -> GuardResult<StatusSummary> {
        let rows: Vec<(String, i64)> = self.with_deadline("status_counts", |conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM ledger_transaction
                 WHERE user_id = ?1 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })?;

        let mut summary = StatusSummary::default();
        for (status, count) in rows {
            summary.add(status.parse::<TransactionStatus>()?, count);
        }
        Ok(summary)
    }
}
