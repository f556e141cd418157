use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};

use crate::config::SignalConfig;
use crate::error::AppResult;
use crate::market_hours::{minutes_of_day, TradingWindow};
use crate::model::session::SessionState;
use crate::model::signal::{new_signal_id, BreakoutDirection, Signal, SignalStatus};
use crate::model::tick::Tick;
use crate::session_registry::SessionRegistry;
use crate::signal_emitter::SignalEmitter;
use crate::store::Store;

const MAX_CONFIDENCE: f64 = 95.0;

/// Strictly above the high breaks up, strictly below the low breaks down.
pub fn classify(price: f64, high: f64, low: f64) -> Option<BreakoutDirection> {
    if price > high {
        Some(BreakoutDirection::HighBreak)
    } else if price < low {
        Some(BreakoutDirection::LowBreak)
    } else {
        None
    }
}

/// Score in `[0, 95]` from day move, traded volume and price level.
pub fn confidence(change_percent: f64, volume: f64, price: f64) -> f64 {
    let raw = change_percent.abs() * 5.0
        + (volume / 1_000_000.0).min(1.0) * 20.0
        + (price / 10_000.0).min(1.0) * 10.0;
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, MAX_CONFIDENCE)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub target: f64,
    pub stop_loss: f64,
}

/// Target and stop placed as volatility-scaled fractions of the entry price,
/// on the profitable and losing side of the breakout respectively.
pub fn volatility_levels(
    direction: BreakoutDirection,
    entry: f64,
    change_percent: f64,
    cfg: &SignalConfig,
) -> Levels {
    let volatility = change_percent.abs() / 100.0;
    let target_mult = cfg.base_target + volatility * cfg.target_factor;
    let stop_mult = cfg.base_stop + volatility * cfg.stop_factor;
    match direction {
        BreakoutDirection::HighBreak => Levels {
            target: round2(entry * (1.0 + target_mult)),
            stop_loss: round2(entry * (1.0 - stop_mult)),
        },
        BreakoutDirection::LowBreak => Levels {
            target: round2(entry * (1.0 - target_mult)),
            stop_loss: round2(entry * (1.0 + stop_mult)),
        },
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BreakoutReport {
    /// Signal ids referenced by sessions marked in this pass.
    pub signals: Vec<String>,
    pub checked: Vec<String>,
    /// Sessions left unchecked for a later re-evaluation.
    pub deferred: Vec<String>,
    pub errors: usize,
}

enum SymbolOutcome {
    NoLevels,
    NoPrice,
    Inside,
    Broke(String),
}

pub struct BreakoutDetector {
    store: Store,
    emitter: SignalEmitter,
    window: TradingWindow,
    symbols: Vec<String>,
    reference_symbols: Vec<String>,
    cutoff: NaiveTime,
    staleness: Duration,
    signal: SignalConfig,
}

impl BreakoutDetector {
    pub fn new(
        store: Store,
        window: TradingWindow,
        symbols: Vec<String>,
        cutoff: NaiveTime,
        staleness: Duration,
        signal: SignalConfig,
    ) -> Self {
        Self {
            emitter: SignalEmitter::new(store.clone()),
            store,
            window,
            symbols,
            reference_symbols: Vec::new(),
            cutoff,
            staleness,
            signal,
        }
    }

    /// Instruments whose latest price is attached to each signal for context.
    pub fn with_reference_symbols(mut self, reference_symbols: Vec<String>) -> Self {
        self.reference_symbols = reference_symbols;
        self
    }

    /// Evaluate every completed, unchecked session of today's date.
    pub fn check_sessions(&self, registry: &SessionRegistry, now: DateTime<Utc>) -> AppResult<BreakoutReport> {
        let date = self.window.trading_date(now);
        let sessions = registry.unchecked_completed(&self.store, date)?;
        let mut report = BreakoutReport::default();
        for session in &sessions {
            if let Err(e) = self.check_session(session, now, &mut report) {
                report.errors += 1;
                tracing::warn!(session = %session.session_name, error = %e, "Breakout check failed");
            }
        }
        Ok(report)
    }

    /// The session is marked checked once any symbol breaks, once no symbol
    /// has levels to compare against, or once the cutoff is reached.
    /// Otherwise it stays unchecked and is looked at again next iteration.
    ///
    /// Signals already stored for the session (left by a run that stopped
    /// before marking it) close the session as they are, without looking at
    /// the current price.
    pub fn check_session(&self, session: &SessionState, now: DateTime<Utc>, report: &mut BreakoutReport) -> AppResult<()> {
        let now_ms = now.timestamp_millis();

        let stored = self.stored_signal_ids(session)?;
        if !stored.is_empty() {
            if self.store.mark_breakouts_checked(session.id, &stored, now_ms)? {
                tracing::info!(
                    session = %session.session_name,
                    signals = ?stored,
                    "Linked signals stored before the session was marked"
                );
                report.checked.push(session.session_name.clone());
                report.signals.extend(stored);
            }
            return Ok(());
        }

        if self.window.local_minutes(now) >= minutes_of_day(self.cutoff) {
            if self.store.mark_breakouts_checked(session.id, &[], now_ms)? {
                tracing::info!(
                    session = %session.session_name,
                    cutoff = %self.cutoff.format("%H:%M"),
                    "Breakout cutoff reached, session closed without signal"
                );
                report.checked.push(session.session_name.clone());
            }
            return Ok(());
        }

        let mut signal_ids = Vec::new();
        let mut pending = false;
        for symbol in &self.symbols {
            match self.check_symbol(session, symbol, now)? {
                SymbolOutcome::Broke(id) => signal_ids.push(id),
                SymbolOutcome::NoLevels => {
                    tracing::debug!(
                        session = %session.session_name,
                        symbol = %symbol,
                        "No session levels, skipping breakout check"
                    );
                }
                SymbolOutcome::NoPrice | SymbolOutcome::Inside => pending = true,
            }
        }

        if signal_ids.is_empty() && pending {
            report.deferred.push(session.session_name.clone());
            return Ok(());
        }

        if self.store.mark_breakouts_checked(session.id, &signal_ids, now_ms)? {
            report.checked.push(session.session_name.clone());
            report.signals.extend(signal_ids);
        } else {
            tracing::debug!(session = %session.session_name, "Session already marked by another observer");
        }
        Ok(())
    }

    fn stored_signal_ids(&self, session: &SessionState) -> AppResult<Vec<String>> {
        Ok(self
            .store
            .signals_for_session(session.id)?
            .into_iter()
            .filter(|s| self.symbols.contains(&s.symbol))
            .map(|s| s.id)
            .collect())
    }

    /// First reference instrument with a price inside the staleness window.
    fn reference_price(&self, now: DateTime<Utc>) -> AppResult<Option<(String, f64)>> {
        let since_ms = now.timestamp_millis() - self.staleness.as_millis() as i64;
        for symbol in &self.reference_symbols {
            if let Some(tick) = self.store.latest_tick(symbol, since_ms)? {
                return Ok(Some((tick.symbol, tick.price)));
            }
        }
        Ok(None)
    }

    fn check_symbol(&self, session: &SessionState, symbol: &str, now: DateTime<Utc>) -> AppResult<SymbolOutcome> {
        let Some((high, low)) = session.symbols.get(symbol).and_then(|agg| agg.levels()) else {
            return Ok(SymbolOutcome::NoLevels);
        };
        let since_ms = now.timestamp_millis() - self.staleness.as_millis() as i64;
        let Some(tick) = self.store.latest_tick(symbol, since_ms)? else {
            tracing::debug!(symbol = %symbol, "No recent price, deferring breakout check");
            return Ok(SymbolOutcome::NoPrice);
        };

        let Some(direction) = classify(tick.price, high, low) else {
            tracing::debug!(
                session = %session.session_name,
                symbol = %symbol,
                price = tick.price,
                high,
                low,
                "No breakout"
            );
            return Ok(SymbolOutcome::Inside);
        };

        tracing::info!(
            session = %session.session_name,
            symbol = %symbol,
            direction = %direction,
            price = tick.price,
            high,
            low,
            "Breakout detected"
        );
        let mut signal = self.build_signal(session, &tick, direction, high, low, now);
        if let Some((symbol, price)) = self.reference_price(now)? {
            signal.reference_symbol = Some(symbol);
            signal.reference_price = Some(price);
        }
        let emission = self.emitter.emit(&signal)?;
        Ok(SymbolOutcome::Broke(emission.id().to_string()))
    }

    fn build_signal(
        &self,
        session: &SessionState,
        tick: &Tick,
        direction: BreakoutDirection,
        high: f64,
        low: f64,
        now: DateTime<Utc>,
    ) -> Signal {
        let entry = tick.price;
        let change_percent = tick.change_percent.unwrap_or(0.0);
        let levels = volatility_levels(direction, entry, change_percent, &self.signal);
        let (breakout_amount, reason) = match direction {
            BreakoutDirection::HighBreak => {
                let amount = round2(entry - high);
                (
                    amount,
                    format!(
                        "High breakout: {:.2} broke {} high {:.2} by +{:.2}",
                        entry, session.session_name, high, amount
                    ),
                )
            }
            BreakoutDirection::LowBreak => {
                let amount = round2(low - entry);
                (
                    amount,
                    format!(
                        "Low breakout: {:.2} broke {} low {:.2} by -{:.2}",
                        entry, session.session_name, low, amount
                    ),
                )
            }
        };

        Signal {
            id: new_signal_id(),
            symbol: tick.symbol.clone(),
            option_type: direction.option_type(),
            signal_type: direction.signal_type(),
            direction,
            entry_price: entry,
            target_price: levels.target,
            stop_loss: levels.stop_loss,
            quantity: self.signal.quantity,
            confidence: confidence(change_percent, tick.volume.unwrap_or(0) as f64, entry),
            status: SignalStatus::Active,
            session_state_id: session.id,
            session_name: session.session_name.clone(),
            session_high: high,
            session_low: low,
            breakout_amount,
            reason,
            reference_symbol: None,
            reference_price: None,
            created_at_ms: now.timestamp_millis(),
        }
    }
}
