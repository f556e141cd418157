//! Session state machine driver.
//!
//! Holds no state between iterations: every decision is taken from the
//! persisted `SessionState` and every write is a transition guarded on the
//! status this iteration observed. Several instances may run the same
//! iteration concurrently; the losers of a race update zero rows.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, Utc};

use crate::error::{AppError, AppResult};
use crate::market_hours::{minutes_of_day, TradingWindow};
use crate::model::session::{SessionState, SessionStatus, SymbolAggregate};
use crate::session_registry::SessionRegistry;
use crate::store::Store;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub started: Vec<String>,
    pub completed: Vec<String>,
    pub refreshed: usize,
    /// Guarded updates that matched nothing because another observer won.
    pub stale: usize,
    pub errors: usize,
}

pub struct SessionMonitor {
    store: Store,
    window: TradingWindow,
    tracked_symbols: Vec<String>,
    refresh_active: bool,
}

impl SessionMonitor {
    pub fn new(store: Store, window: TradingWindow, tracked_symbols: Vec<String>, refresh_active: bool) -> Self {
        Self {
            store,
            window,
            tracked_symbols,
            refresh_active,
        }
    }

    /// One pass over today's PENDING/ACTIVE sessions.
    ///
    /// A failure on one session is logged and counted; the others still
    /// advance. Only the initial fetch can fail the whole pass.
    pub fn advance_sessions(&self, registry: &SessionRegistry, now: DateTime<Utc>) -> AppResult<MonitorReport> {
        let date = self.window.trading_date(now);
        let sessions = registry.open_sessions(&self.store, date)?;
        let mut report = MonitorReport::default();
        for session in &sessions {
            if let Err(e) = self.advance_session(session, now, &mut report) {
                report.errors += 1;
                match &e {
                    AppError::InvariantViolation { .. } => tracing::error!(
                        session = %session.session_name,
                        error = %e,
                        "Refused illegal session transition"
                    ),
                    _ => tracing::warn!(
                        session = %session.session_name,
                        error = %e,
                        "Failed to advance session"
                    ),
                }
            }
        }
        Ok(report)
    }

    /// Evaluate one session against `now`, possibly walking it through both
    /// transitions in one call (e.g. first observation after a restart).
    pub fn advance_session(&self, session: &SessionState, now: DateTime<Utc>, report: &mut MonitorReport) -> AppResult<()> {
        let (start, end) = session.definition().window()?;
        let now_min = self.window.local_minutes(now);
        let now_ms = now.timestamp_millis();
        let mut status = session.status;

        if status == SessionStatus::Pending && now_min >= minutes_of_day(start) {
            if !self
                .store
                .transition_session(session.id, SessionStatus::Pending, SessionStatus::Active, now_ms, None)?
            {
                tracing::debug!(session = %session.session_name, "Stale PENDING observation, skipping");
                report.stale += 1;
                return Ok(());
            }
            tracing::info!(
                session = %session.session_name,
                trading_date = %session.trading_date,
                "Session started"
            );
            report.started.push(session.session_name.clone());
            status = SessionStatus::Active;
        }

        if status != SessionStatus::Active {
            return Ok(());
        }

        if now_min > minutes_of_day(end) {
            let aggregate = self.compute_aggregate(session, None)?;
            if !self.store.transition_session(
                session.id,
                SessionStatus::Active,
                SessionStatus::Completed,
                now_ms,
                Some(&aggregate),
            )? {
                tracing::debug!(session = %session.session_name, "Stale ACTIVE observation, skipping");
                report.stale += 1;
                return Ok(());
            }
            for (symbol, agg) in &aggregate {
                match agg.levels() {
                    Some((high, low)) => tracing::info!(
                        session = %session.session_name,
                        symbol = %symbol,
                        high,
                        low,
                        ticks = agg.tick_count,
                        "Session completed"
                    ),
                    None => tracing::info!(
                        session = %session.session_name,
                        symbol = %symbol,
                        "Session completed without ticks"
                    ),
                }
            }
            report.completed.push(session.session_name.clone());
        } else if self.refresh_active {
            let aggregate = self.compute_aggregate(session, Some(now_ms))?;
            if self.store.refresh_session_aggregate(session.id, &aggregate, now_ms)? {
                report.refreshed += 1;
            }
        }
        Ok(())
    }

    /// Per-symbol extremes over the session's `[start, end)` window, rebuilt
    /// from persisted ticks. `until_ms` truncates the window for provisional
    /// refreshes.
    pub fn compute_aggregate(
        &self,
        session: &SessionState,
        until_ms: Option<i64>,
    ) -> AppResult<BTreeMap<String, SymbolAggregate>> {
        let (start_ms, end_ms) = self.session_bounds(session)?;
        let end_ms = until_ms.map_or(end_ms, |u| u.min(end_ms));
        let mut out = BTreeMap::new();
        for symbol in &self.tracked_symbols {
            let agg = self.store.session_aggregate(symbol, start_ms, end_ms)?;
            out.insert(symbol.clone(), agg);
        }
        Ok(out)
    }

    pub fn session_bounds(&self, session: &SessionState) -> AppResult<(i64, i64)> {
        let (start, end) = session.definition().window()?;
        let resolve = |t: NaiveTime| {
            self.window
                .local_to_utc(session.trading_date, t)
                .map(|dt| dt.timestamp_millis())
                .ok_or_else(|| AppError::InvalidSessionDefinition {
                    name: session.session_name.clone(),
                    reason: format!("{} does not exist on {}", t, session.trading_date),
                })
        };
        Ok((resolve(start)?, resolve(end)?))
    }
}
