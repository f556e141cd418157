use std::collections::BTreeMap;

use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, OptionalExtension, Row, TransactionBehavior};

use super::Store;
use crate::error::{AppError, AppResult};
use crate::model::session::{SessionDefinition, SessionState, SessionStatus, SymbolAggregate};

const DATE_FMT: &str = "%Y-%m-%d";

const SESSION_COLUMNS: &str = "id, trading_date, session_name, start_time, end_time, status, \
     started_at_ms, completed_at_ms, symbols_data, breakouts_checked, signals_generated, \
     created_at_ms, updated_at_ms";

/// Column values as stored, before parsing into the domain type.
struct SessionRow {
    id: i64,
    trading_date: String,
    session_name: String,
    start_time: String,
    end_time: String,
    status: String,
    started_at_ms: Option<i64>,
    completed_at_ms: Option<i64>,
    symbols_data: String,
    breakouts_checked: i64,
    signals_generated: String,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl SessionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            trading_date: row.get(1)?,
            session_name: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            status: row.get(5)?,
            started_at_ms: row.get(6)?,
            completed_at_ms: row.get(7)?,
            symbols_data: row.get(8)?,
            breakouts_checked: row.get(9)?,
            signals_generated: row.get(10)?,
            created_at_ms: row.get(11)?,
            updated_at_ms: row.get(12)?,
        })
    }

    fn into_state(self) -> AppResult<SessionState> {
        let trading_date = NaiveDate::parse_from_str(&self.trading_date, DATE_FMT).map_err(|e| {
            AppError::Corrupt(format!(
                "session {} has bad trading_date '{}': {}",
                self.id, self.trading_date, e
            ))
        })?;
        Ok(SessionState {
            id: self.id,
            trading_date,
            session_name: self.session_name,
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status.parse()?,
            started_at_ms: self.started_at_ms,
            completed_at_ms: self.completed_at_ms,
            symbols: serde_json::from_str(&self.symbols_data)?,
            breakouts_checked: self.breakouts_checked != 0,
            signals_generated: serde_json::from_str(&self.signals_generated)?,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
        })
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

impl Store {
    /// Create the PENDING record for (date, name) unless one already exists.
    /// Returns whether a row was created; existing progress is never touched.
    pub fn insert_session_if_absent(
        &self,
        date: NaiveDate,
        definition: &SessionDefinition,
        now_ms: i64,
    ) -> AppResult<bool> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO session_states (
                trading_date, session_name, start_time, end_time, status,
                symbols_data, breakouts_checked, signals_generated, created_at_ms, updated_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, '{}', 0, '[]', ?6, ?6)
            ON CONFLICT(trading_date, session_name) DO NOTHING
            "#,
            params![
                date_key(date),
                definition.name,
                definition.start,
                definition.end,
                SessionStatus::Pending.as_str(),
                now_ms,
            ],
        )?;
        Ok(inserted == 1)
    }

    pub fn session(&self, id: i64) -> AppResult<Option<SessionState>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM session_states WHERE id = ?1", SESSION_COLUMNS),
                [id],
                SessionRow::read,
            )
            .optional()?;
        row.map(SessionRow::into_state).transpose()
    }

    pub fn session_by_name(&self, date: NaiveDate, name: &str) -> AppResult<Option<SessionState>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM session_states WHERE trading_date = ?1 AND session_name = ?2",
                    SESSION_COLUMNS
                ),
                params![date_key(date), name],
                SessionRow::read,
            )
            .optional()?;
        row.map(SessionRow::into_state).transpose()
    }

    pub fn sessions_for_date(&self, date: NaiveDate) -> AppResult<Vec<SessionState>> {
        self.sessions_by_status(
            date,
            &[
                SessionStatus::Pending,
                SessionStatus::Active,
                SessionStatus::Completed,
            ],
        )
    }

    pub fn sessions_by_status(
        &self,
        date: NaiveDate,
        statuses: &[SessionStatus],
    ) -> AppResult<Vec<SessionState>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..statuses.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM session_states
             WHERE trading_date = ?1 AND status IN ({})
             ORDER BY start_time ASC, id ASC",
            SESSION_COLUMNS, placeholders
        );
        let mut values = vec![date_key(date)];
        values.extend(statuses.iter().map(|s| s.as_str().to_string()));

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), SessionRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_state()?);
        }
        Ok(out)
    }

    /// Completed sessions whose breakout evaluation has not concluded yet.
    pub fn sessions_for_breakout_check(&self, date: NaiveDate) -> AppResult<Vec<SessionState>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM session_states
             WHERE trading_date = ?1 AND status = ?2 AND breakouts_checked = 0
             ORDER BY start_time ASC, id ASC",
            SESSION_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![date_key(date), SessionStatus::Completed.as_str()],
            SessionRow::read,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_state()?);
        }
        Ok(out)
    }

    /// Move a session one step along its lifecycle, guarded on `from` still
    /// being the stored status.
    ///
    /// Returns `Ok(false)` when the guard matched nothing (another observer
    /// got there first). Transitions the state machine does not allow are
    /// refused with `InvariantViolation` before touching storage.
    pub fn transition_session(
        &self,
        id: i64,
        from: SessionStatus,
        to: SessionStatus,
        at_ms: i64,
        aggregate: Option<&BTreeMap<String, SymbolAggregate>>,
    ) -> AppResult<bool> {
        if !from.can_advance_to(to) {
            return Err(AppError::InvariantViolation {
                session_id: id,
                from,
                to,
            });
        }
        let conn = self.connect()?;
        let updated = match to {
            SessionStatus::Active => conn.execute(
                r#"
                UPDATE session_states
                SET status = ?1, started_at_ms = ?2, updated_at_ms = ?2
                WHERE id = ?3 AND status = ?4
                "#,
                params![to.as_str(), at_ms, id, from.as_str()],
            )?,
            SessionStatus::Completed => {
                let symbols_data = serde_json::to_string(&aggregate.cloned().unwrap_or_default())?;
                conn.execute(
                    r#"
                    UPDATE session_states
                    SET status = ?1, completed_at_ms = ?2, symbols_data = ?3, updated_at_ms = ?2
                    WHERE id = ?4 AND status = ?5
                    "#,
                    params![to.as_str(), at_ms, symbols_data, id, from.as_str()],
                )?
            }
            SessionStatus::Pending => 0,
        };
        Ok(updated == 1)
    }

    /// Provisional aggregate for a session still inside its window.
    pub fn refresh_session_aggregate(
        &self,
        id: i64,
        aggregate: &BTreeMap<String, SymbolAggregate>,
        now_ms: i64,
    ) -> AppResult<bool> {
        let conn = self.connect()?;
        let updated = conn.execute(
            r#"
            UPDATE session_states
            SET symbols_data = ?1, updated_at_ms = ?2
            WHERE id = ?3 AND status = ?4
            "#,
            params![
                serde_json::to_string(aggregate)?,
                now_ms,
                id,
                SessionStatus::Active.as_str()
            ],
        )?;
        Ok(updated == 1)
    }

    /// Flip `breakouts_checked` to true and append `signal_ids`, once.
    ///
    /// Returns `Ok(false)` if the session was already checked or is not
    /// COMPLETED.
    pub fn mark_breakouts_checked(&self, id: i64, signal_ids: &[String], now_ms: i64) -> AppResult<bool> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row(
                r#"
                SELECT signals_generated FROM session_states
                WHERE id = ?1 AND status = ?2 AND breakouts_checked = 0
                "#,
                params![id, SessionStatus::Completed.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(false);
        };

        let mut ids: Vec<String> = serde_json::from_str(&current)?;
        for signal_id in signal_ids {
            if !ids.contains(signal_id) {
                ids.push(signal_id.clone());
            }
        }
        let updated = tx.execute(
            r#"
            UPDATE session_states
            SET breakouts_checked = 1, signals_generated = ?1, updated_at_ms = ?2
            WHERE id = ?3 AND status = ?4 AND breakouts_checked = 0
            "#,
            params![
                serde_json::to_string(&ids)?,
                now_ms,
                id,
                SessionStatus::Completed.as_str()
            ],
        )?;
        tx.commit()?;
        Ok(updated == 1)
    }
}
