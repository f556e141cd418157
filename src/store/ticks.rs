use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::{AppError, AppResult};
use crate::model::session::SymbolAggregate;
use crate::model::tick::{Tick, TickQuality};

const TICK_COLUMNS: &str = "symbol, token, exchange, price, change, change_percent, high, low, \
     open, close, volume, market_timestamp_ms, received_at_ms, source, quality, realtime";

fn tick_from_row(row: &Row<'_>) -> rusqlite::Result<Tick> {
    let quality: String = row.get(14)?;
    Ok(Tick {
        symbol: row.get(0)?,
        token: row.get(1)?,
        exchange: row.get(2)?,
        price: row.get(3)?,
        change: row.get(4)?,
        change_percent: row.get(5)?,
        high: row.get(6)?,
        low: row.get(7)?,
        open: row.get(8)?,
        close: row.get(9)?,
        volume: row.get::<_, Option<i64>>(10)?.map(|v| v.max(0) as u64),
        market_timestamp_ms: row.get(11)?,
        received_at_ms: row.get(12)?,
        source: row.get(13)?,
        quality: TickQuality::parse(&quality),
        realtime: row.get::<_, i64>(15)? != 0,
    })
}

impl Store {
    /// Append a tick. A second tick for the same (symbol, receipt time) is
    /// refused by the unique constraint and reported as `Duplicate`.
    pub fn insert_tick(&self, tick: &Tick) -> AppResult<()> {
        let conn = self.connect()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO ticks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT DO NOTHING",
                TICK_COLUMNS
            ),
            params![
                tick.symbol,
                tick.token,
                tick.exchange,
                tick.price,
                tick.change,
                tick.change_percent,
                tick.high,
                tick.low,
                tick.open,
                tick.close,
                tick.volume.map(|v| v.min(i64::MAX as u64) as i64),
                tick.market_timestamp_ms,
                tick.received_at_ms,
                tick.source,
                tick.quality.as_str(),
                tick.realtime as i64,
            ],
        )?;
        if inserted == 0 {
            return Err(AppError::Duplicate {
                entity: "tick",
                key: format!("{}@{}", tick.symbol, tick.received_at_ms),
            });
        }
        Ok(())
    }

    /// Ticks with receipt time in `[start_ms, end_ms)`, oldest first.
    pub fn ticks_in_range(&self, symbol: &str, start_ms: i64, end_ms: i64) -> AppResult<Vec<Tick>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ticks
             WHERE symbol = ?1 AND received_at_ms >= ?2 AND received_at_ms < ?3
             ORDER BY received_at_ms ASC",
            TICK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![symbol, start_ms, end_ms], tick_from_row)?;
        let mut ticks = Vec::new();
        for row in rows {
            ticks.push(row?);
        }
        Ok(ticks)
    }

    /// Extremes over `[start_ms, end_ms)`, computed entirely from persisted
    /// history.
    pub fn session_aggregate(&self, symbol: &str, start_ms: i64, end_ms: i64) -> AppResult<SymbolAggregate> {
        let conn = self.connect()?;
        let aggregate = conn.query_row(
            r#"
            SELECT MAX(price), MIN(price), COUNT(*), MIN(received_at_ms), MAX(received_at_ms)
            FROM ticks
            WHERE symbol = ?1 AND received_at_ms >= ?2 AND received_at_ms < ?3
            "#,
            params![symbol, start_ms, end_ms],
            |row| {
                Ok(SymbolAggregate {
                    high: row.get(0)?,
                    low: row.get(1)?,
                    tick_count: row.get::<_, i64>(2)?.max(0) as u64,
                    first_tick_ms: row.get(3)?,
                    last_tick_ms: row.get(4)?,
                })
            },
        )?;
        Ok(aggregate)
    }

    /// Most recent tick received at or after `since_ms`.
    pub fn latest_tick(&self, symbol: &str, since_ms: i64) -> AppResult<Option<Tick>> {
        let conn = self.connect()?;
        let tick = conn
            .query_row(
                &format!(
                    "SELECT {} FROM ticks
                     WHERE symbol = ?1 AND received_at_ms >= ?2
                     ORDER BY received_at_ms DESC
                     LIMIT 1",
                    TICK_COLUMNS
                ),
                params![symbol, since_ms],
                tick_from_row,
            )
            .optional()?;
        Ok(tick)
    }

    /// Delete ticks received before `cutoff_ms`. Session states and signals
    /// are untouched.
    pub fn purge_ticks_before(&self, cutoff_ms: i64) -> AppResult<usize> {
        let conn = self.connect()?;
        let deleted = conn.execute("DELETE FROM ticks WHERE received_at_ms < ?1", [cutoff_ms])?;
        Ok(deleted)
    }

    pub fn tick_count(&self, symbol: &str) -> AppResult<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ticks WHERE symbol = ?1",
            [symbol],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}
