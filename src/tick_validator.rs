use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::AppResult;
use crate::market_hours::TradingWindow;
use crate::model::symbol::SymbolRegistry;
use crate::model::tick::{json_number, json_timestamp_ms, RawTick, Tick, TickQuality};
use crate::store::Store;

const DEFAULT_SOURCE: &str = "feed";

/// Stable taxonomy for tick rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    OutOfHours,
    InvalidFields,
    QualityPoor,
    Duplicate,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutOfHours => "OUT_OF_HOURS",
            Self::InvalidFields => "INVALID_FIELDS",
            Self::QualityPoor => "QUALITY_POOR",
            Self::Duplicate => "DUPLICATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted(Tick),
    Rejected(RejectReason),
}

/// Observability counters; nothing downstream branches on them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: HashMap<String, u64>,
    pub rejected: HashMap<RejectReason, u64>,
}

impl IngestStats {
    pub fn accepted_total(&self) -> u64 {
        self.accepted.values().sum()
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.values().sum()
    }
}

/// Gatekeeper between the feed adapter and the tick store.
pub struct TickValidator {
    window: TradingWindow,
    symbols: SymbolRegistry,
    stats: Mutex<IngestStats>,
}

impl TickValidator {
    pub fn new(window: TradingWindow, symbols: SymbolRegistry) -> Self {
        Self {
            window,
            symbols,
            stats: Mutex::new(IngestStats::default()),
        }
    }

    /// Normalise `raw` into a canonical tick stamped with `received_at`.
    pub fn validate(&self, raw: &RawTick, received_at: DateTime<Utc>) -> Result<Tick, RejectReason> {
        if raw.is_error_shape() || raw.flagged_poor() {
            return Err(RejectReason::QualityPoor);
        }

        let token = raw.token_text();
        let instrument = self
            .symbols
            .resolve(raw.symbol.as_deref(), token.as_deref())
            .ok_or(RejectReason::InvalidFields)?;

        let price = raw
            .price
            .as_ref()
            .and_then(json_number)
            .filter(|p| *p > 0.0)
            .ok_or(RejectReason::InvalidFields)?;
        let high = positive_price(raw.high.as_ref())?;
        let low = positive_price(raw.low.as_ref())?;
        let open = positive_price(raw.open.as_ref())?;
        let close = positive_price(raw.close.as_ref())?;
        let change = optional_number(raw.change.as_ref())?;
        let change_percent = optional_number(raw.change_percent.as_ref())?;
        let volume = match optional_number(raw.volume.as_ref())? {
            Some(v) if v < 0.0 => return Err(RejectReason::InvalidFields),
            Some(v) => Some(v as u64),
            None => None,
        };

        if !self.window.contains(received_at) {
            return Err(RejectReason::OutOfHours);
        }

        let quality = if high.is_some() && low.is_some() && open.is_some() && close.is_some() {
            TickQuality::Good
        } else {
            TickQuality::Partial
        };

        Ok(Tick {
            symbol: instrument.symbol.clone(),
            token: token.unwrap_or_else(|| instrument.token.clone()),
            exchange: raw
                .exchange
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_ascii_uppercase)
                .unwrap_or_else(|| instrument.exchange.clone()),
            price,
            change,
            change_percent,
            high,
            low,
            open,
            close,
            volume,
            market_timestamp_ms: raw.timestamp.as_ref().and_then(json_timestamp_ms),
            received_at_ms: received_at.timestamp_millis(),
            source: raw
                .source
                .clone()
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            quality,
            realtime: raw.realtime.unwrap_or(true),
        })
    }

    /// Validate and persist one payload.
    ///
    /// Rejections, including unique-constraint duplicates, are outcomes and
    /// not errors. Only storage failures are returned as `Err`.
    pub fn ingest(&self, store: &Store, raw: &RawTick, received_at: DateTime<Utc>) -> AppResult<IngestOutcome> {
        let tick = match self.validate(raw, received_at) {
            Ok(tick) => tick,
            Err(reason) => {
                tracing::debug!(
                    symbol = raw.symbol.as_deref().unwrap_or("?"),
                    reason = reason.as_str(),
                    "Tick rejected"
                );
                self.record_rejection(reason);
                return Ok(IngestOutcome::Rejected(reason));
            }
        };

        match store.insert_tick(&tick) {
            Ok(()) => {
                *self.stats.lock().accepted.entry(tick.symbol.clone()).or_insert(0) += 1;
                tracing::trace!(symbol = %tick.symbol, price = tick.price, "Tick stored");
                Ok(IngestOutcome::Accepted(tick))
            }
            Err(e) if e.is_duplicate() => {
                tracing::debug!(error = %e, "Duplicate tick dropped");
                self.record_rejection(RejectReason::Duplicate);
                Ok(IngestOutcome::Rejected(RejectReason::Duplicate))
            }
            Err(e) => Err(e),
        }
    }

    pub fn record_rejection(&self, reason: RejectReason) {
        *self.stats.lock().rejected.entry(reason).or_insert(0) += 1;
    }

    pub fn stats(&self) -> IngestStats {
        self.stats.lock().clone()
    }
}

/// Upstream sends 0 for OHLC fields it has no value for yet.
fn positive_price(value: Option<&serde_json::Value>) -> Result<Option<f64>, RejectReason> {
    match optional_number(value)? {
        Some(v) if v < 0.0 => Err(RejectReason::InvalidFields),
        Some(v) if v == 0.0 => Ok(None),
        other => Ok(other),
    }
}

/// Absent or null is fine; present but non-numeric is not.
fn optional_number(value: Option<&serde_json::Value>) -> Result<Option<f64>, RejectReason> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => json_number(v).map(Some).ok_or(RejectReason::InvalidFields),
    }
}
