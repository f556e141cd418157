use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TickQuality {
    /// Every OHLC field was present on the payload.
    Good,
    Partial,
}

impl TickQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "GOOD",
            Self::Partial => "PARTIAL",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("GOOD") {
            Self::Good
        } else {
            Self::Partial
        }
    }
}

/// Canonical, validated market-data observation. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub token: String,
    pub exchange: String,
    pub price: f64,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub open: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<u64>,
    /// Exchange-reported time, when the payload carried one.
    pub market_timestamp_ms: Option<i64>,
    /// Time this process accepted the tick.
    pub received_at_ms: i64,
    pub source: String,
    pub quality: TickQuality,
    pub realtime: bool,
}

/// Feed payload as it arrives from the adapter, before validation.
///
/// Field aliases cover the upstream streaming and REST shapes. Numeric fields
/// stay as raw JSON values because the feed sends both numbers and numeric
/// strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTick {
    #[serde(default, alias = "trading_symbol", alias = "tradingsymbol")]
    pub symbol: Option<String>,
    #[serde(default, alias = "tk")]
    pub token: Option<Value>,
    #[serde(default, alias = "e", alias = "exch_seg")]
    pub exchange: Option<String>,
    #[serde(default, alias = "ltpc", alias = "ltp", alias = "last_traded_price")]
    pub price: Option<Value>,
    #[serde(default, alias = "ch")]
    pub change: Option<Value>,
    #[serde(default, alias = "chp", alias = "percent_change")]
    pub change_percent: Option<Value>,
    #[serde(default, alias = "h", alias = "high_price_of_the_day")]
    pub high: Option<Value>,
    #[serde(default, alias = "l", alias = "low_price_of_the_day")]
    pub low: Option<Value>,
    #[serde(default, alias = "o", alias = "open_price_of_the_day")]
    pub open: Option<Value>,
    #[serde(default, alias = "c", alias = "closed_price")]
    pub close: Option<Value>,
    #[serde(default, alias = "v", alias = "volume_trade_for_the_day")]
    pub volume: Option<Value>,
    #[serde(default, alias = "exchange_timestamp", alias = "ft")]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub realtime: Option<bool>,
    #[serde(default)]
    pub quality: Option<String>,

    // Upstream error envelope.
    #[serde(default)]
    pub errorcode: Option<Value>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A single feed line: one payload or a batch of them.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FeedPayload {
    Batch(Vec<RawTick>),
    Single(Box<RawTick>),
}

impl FeedPayload {
    pub fn into_ticks(self) -> Vec<RawTick> {
        match self {
            Self::Batch(ticks) => ticks,
            Self::Single(tick) => vec![*tick],
        }
    }
}

impl RawTick {
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// True when the payload is an upstream error response rather than data.
    pub fn is_error_shape(&self) -> bool {
        let has_code = match &self.errorcode {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        let failed_status = matches!(self.status, Some(Value::Bool(false)));
        let error_message = self
            .message
            .as_deref()
            .map(|m| m.to_ascii_lowercase().contains("error"))
            .unwrap_or(false);
        has_code || failed_status || error_message
    }

    pub fn flagged_poor(&self) -> bool {
        self.quality
            .as_deref()
            .map(|q| q.eq_ignore_ascii_case("poor") || q.eq_ignore_ascii_case("bad"))
            .unwrap_or(false)
    }

    pub fn token_text(&self) -> Option<String> {
        match self.token.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Interpret a JSON value as a finite number, accepting numeric strings.
pub fn json_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Market timestamps arrive as epoch millis or RFC 3339 strings.
pub fn json_timestamp_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            if let Ok(ms) = s.trim().parse::<i64>() {
                return Some(ms);
            }
            chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp_millis())
        }
        _ => None,
    }
}
