use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::{AppError, AppResult};
use crate::model::signal::{BreakoutDirection, Signal, SignalStatus};

const SIGNAL_COLUMNS: &str = "id, symbol, option_type, signal_type, direction, entry_price, \
     target_price, stop_loss, quantity, confidence, status, session_state_id, session_name, \
     session_high, session_low, breakout_amount, reason, reference_symbol, reference_price, \
     created_at_ms";

struct SignalRow {
    id: String,
    symbol: String,
    option_type: String,
    signal_type: String,
    direction: String,
    entry_price: f64,
    target_price: f64,
    stop_loss: f64,
    quantity: i64,
    confidence: f64,
    status: String,
    session_state_id: i64,
    session_name: String,
    session_high: f64,
    session_low: f64,
    breakout_amount: f64,
    reason: String,
    reference_symbol: Option<String>,
    reference_price: Option<f64>,
    created_at_ms: i64,
}

impl SignalRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            symbol: row.get(1)?,
            option_type: row.get(2)?,
            signal_type: row.get(3)?,
            direction: row.get(4)?,
            entry_price: row.get(5)?,
            target_price: row.get(6)?,
            stop_loss: row.get(7)?,
            quantity: row.get(8)?,
            confidence: row.get(9)?,
            status: row.get(10)?,
            session_state_id: row.get(11)?,
            session_name: row.get(12)?,
            session_high: row.get(13)?,
            session_low: row.get(14)?,
            breakout_amount: row.get(15)?,
            reason: row.get(16)?,
            reference_symbol: row.get(17)?,
            reference_price: row.get(18)?,
            created_at_ms: row.get(19)?,
        })
    }

    fn into_signal(self) -> AppResult<Signal> {
        Ok(Signal {
            id: self.id,
            symbol: self.symbol,
            option_type: self.option_type.parse()?,
            signal_type: self.signal_type.parse()?,
            direction: self.direction.parse()?,
            entry_price: self.entry_price,
            target_price: self.target_price,
            stop_loss: self.stop_loss,
            quantity: self.quantity.clamp(0, u32::MAX as i64) as u32,
            confidence: self.confidence,
            status: self.status.parse()?,
            session_state_id: self.session_state_id,
            session_name: self.session_name,
            session_high: self.session_high,
            session_low: self.session_low,
            breakout_amount: self.breakout_amount,
            reason: self.reason,
            reference_symbol: self.reference_symbol,
            reference_price: self.reference_price,
            created_at_ms: self.created_at_ms,
        })
    }
}

impl Store {
    /// Persist a new signal. Conflicts on the id or on
    /// (session_state_id, symbol, direction) come back as `Duplicate`.
    pub fn insert_signal(&self, signal: &Signal) -> AppResult<()> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO signals ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
                 ON CONFLICT DO NOTHING",
                SIGNAL_COLUMNS
            ),
            params![
                signal.id,
                signal.symbol,
                signal.option_type.as_str(),
                signal.signal_type.as_str(),
                signal.direction.as_str(),
                signal.entry_price,
                signal.target_price,
                signal.stop_loss,
                signal.quantity as i64,
                signal.confidence,
                signal.status.as_str(),
                signal.session_state_id,
                signal.session_name,
                signal.session_high,
                signal.session_low,
                signal.breakout_amount,
                signal.reason,
                signal.reference_symbol,
                signal.reference_price,
                signal.created_at_ms,
            ],
        )?;
        if inserted == 0 {
            return Err(AppError::Duplicate {
                entity: "signal",
                key: format!(
                    "session {} {} {}",
                    signal.session_state_id, signal.symbol, signal.direction
                ),
            });
        }
        Ok(())
    }

    pub fn signal_for_breakout(
        &self,
        session_state_id: i64,
        symbol: &str,
        direction: BreakoutDirection,
    ) -> AppResult<Option<Signal>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM signals
                     WHERE session_state_id = ?1 AND symbol = ?2 AND direction = ?3",
                    SIGNAL_COLUMNS
                ),
                params![session_state_id, symbol, direction.as_str()],
                SignalRow::read,
            )
            .optional()?;
        row.map(SignalRow::into_signal).transpose()
    }

    pub fn signals_for_session(&self, session_state_id: i64) -> AppResult<Vec<Signal>> {
        self.query_signals(
            &format!(
                "SELECT {} FROM signals WHERE session_state_id = ?1 ORDER BY created_at_ms ASC, id ASC",
                SIGNAL_COLUMNS
            ),
            params![session_state_id],
        )
    }

    /// Signals still ACTIVE, newest first.
    pub fn active_signals(&self) -> AppResult<Vec<Signal>> {
        self.query_signals(
            &format!(
                "SELECT {} FROM signals WHERE status = ?1 ORDER BY created_at_ms DESC, id ASC",
                SIGNAL_COLUMNS
            ),
            params![SignalStatus::Active.as_str()],
        )
    }

    fn query_signals(&self, sql: &str, args: impl rusqlite::Params) -> AppResult<Vec<Signal>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, SignalRow::read)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_signal()?);
        }
        Ok(out)
    }
}
