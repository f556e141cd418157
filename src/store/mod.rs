//! SQLite persistence for ticks, session states and signals.
//!
//! Every call opens its own connection with a bounded busy timeout, so any
//! number of tasks or processes can share one database file. Coordination
//! between them happens only through unique constraints and status-guarded
//! `UPDATE`s.

mod sessions;
mod signals;
mod ticks;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Store {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self { path, busy_timeout };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn connect(&self) -> AppResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn init_schema(&self) -> AppResult<()> {
        let conn = self.connect()?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ticks (
                symbol TEXT NOT NULL,
                token TEXT NOT NULL,
                exchange TEXT NOT NULL,
                price REAL NOT NULL,
                change REAL,
                change_percent REAL,
                high REAL,
                low REAL,
                open REAL,
                close REAL,
                volume INTEGER,
                market_timestamp_ms INTEGER,
                received_at_ms INTEGER NOT NULL,
                source TEXT NOT NULL,
                quality TEXT NOT NULL,
                realtime INTEGER NOT NULL,
                UNIQUE(symbol, received_at_ms)
            );

            CREATE TABLE IF NOT EXISTS session_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trading_date TEXT NOT NULL,
                session_name TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at_ms INTEGER,
                completed_at_ms INTEGER,
                symbols_data TEXT NOT NULL DEFAULT '{}',
                breakouts_checked INTEGER NOT NULL DEFAULT 0,
                signals_generated TEXT NOT NULL DEFAULT '[]',
                created_at_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                UNIQUE(trading_date, session_name)
            );

            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                option_type TEXT NOT NULL,
                signal_type TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL NOT NULL,
                target_price REAL NOT NULL,
                stop_loss REAL NOT NULL,
                quantity INTEGER NOT NULL,
                confidence REAL NOT NULL,
                status TEXT NOT NULL,
                session_state_id INTEGER NOT NULL REFERENCES session_states(id),
                session_name TEXT NOT NULL,
                session_high REAL NOT NULL,
                session_low REAL NOT NULL,
                breakout_amount REAL NOT NULL,
                reason TEXT NOT NULL,
                reference_symbol TEXT,
                reference_price REAL,
                created_at_ms INTEGER NOT NULL,
                UNIQUE(session_state_id, symbol, direction)
            );

            CREATE INDEX IF NOT EXISTS idx_session_states_status
                ON session_states(trading_date, status);
            CREATE INDEX IF NOT EXISTS idx_signals_status
                ON signals(status, created_at_ms);
            "#,
        )?;
        Ok(())
    }
}
