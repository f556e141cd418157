use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::market_hours::parse_hhmm;

/// Lifecycle of a daily session. Statuses only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
        }
    }

    /// Only the single next step is a legal transition.
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active) | (Self::Active, Self::Completed)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACTIVE" => Ok(Self::Active),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(AppError::Corrupt(format!("unknown session status '{}'", other))),
        }
    }
}

/// Static exchange-local window, e.g. "Morning Opening" 09:30-09:35.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDefinition {
    pub name: String,
    pub start: String,
    pub end: String,
}

impl SessionDefinition {
    pub fn new(name: &str, start: &str, end: &str) -> Self {
        Self {
            name: name.to_string(),
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    /// Parsed `[start, end)`; rejects unparsable or inverted windows.
    pub fn window(&self) -> Result<(NaiveTime, NaiveTime), AppError> {
        let invalid = |reason: String| AppError::InvalidSessionDefinition {
            name: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        let start = parse_hhmm(&self.start).map_err(|e| invalid(format!("{:#}", e)))?;
        let end = parse_hhmm(&self.end).map_err(|e| invalid(format!("{:#}", e)))?;
        if start >= end {
            return Err(invalid(format!(
                "start {} is not before end {}",
                self.start, self.end
            )));
        }
        Ok((start, end))
    }
}

/// Per-symbol extremes observed inside a session window. `high`/`low` are
/// `None` when the window saw no ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolAggregate {
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub tick_count: u64,
    pub first_tick_ms: Option<i64>,
    pub last_tick_ms: Option<i64>,
}

impl SymbolAggregate {
    pub fn levels(&self) -> Option<(f64, f64)> {
        match (self.high, self.low) {
            (Some(high), Some(low)) if self.tick_count > 0 => Some((high, low)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub id: i64,
    pub trading_date: NaiveDate,
    pub session_name: String,
    pub start_time: String,
    pub end_time: String,
    pub status: SessionStatus,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub symbols: BTreeMap<String, SymbolAggregate>,
    pub breakouts_checked: bool,
    pub signals_generated: Vec<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl SessionState {
    pub fn definition(&self) -> SessionDefinition {
        SessionDefinition::new(&self.session_name, &self.start_time, &self.end_time)
    }
}
