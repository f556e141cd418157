use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakoutDirection {
    HighBreak,
    LowBreak,
}

impl BreakoutDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighBreak => "HIGH_BREAK",
            Self::LowBreak => "LOW_BREAK",
        }
    }

    pub fn signal_type(self) -> SignalType {
        match self {
            Self::HighBreak => SignalType::Buy,
            Self::LowBreak => SignalType::Sell,
        }
    }

    pub fn option_type(self) -> OptionType {
        match self {
            Self::HighBreak => OptionType::Ce,
            Self::LowBreak => OptionType::Pe,
        }
    }
}

impl fmt::Display for BreakoutDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakoutDirection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH_BREAK" => Ok(Self::HighBreak),
            "LOW_BREAK" => Ok(Self::LowBreak),
            other => Err(AppError::Corrupt(format!("unknown breakout direction '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
}

impl SignalType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl FromStr for SignalType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            other => Err(AppError::Corrupt(format!("unknown signal type '{}'", other))),
        }
    }
}

/// Option leg suggested by the signal: calls on upside breaks, puts on downside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    Ce,
    Pe,
}

impl OptionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ce => "CE",
            Self::Pe => "PE",
        }
    }
}

impl FromStr for OptionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CE" => Ok(Self::Ce),
            "PE" => Ok(Self::Pe),
            other => Err(AppError::Corrupt(format!("unknown option type '{}'", other))),
        }
    }
}

/// Lifecycle after creation is owned by whoever consumes the signal store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalStatus {
    Active,
    Completed,
    Cancelled,
    Expired,
}

impl SignalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl FromStr for SignalStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(AppError::Corrupt(format!("unknown signal status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub option_type: OptionType,
    pub signal_type: SignalType,
    pub direction: BreakoutDirection,
    pub entry_price: f64,
    pub target_price: f64,
    pub stop_loss: f64,
    pub quantity: u32,
    /// 0..=95
    pub confidence: f64,
    pub status: SignalStatus,
    pub session_state_id: i64,
    pub session_name: String,
    pub session_high: f64,
    pub session_low: f64,
    pub breakout_amount: f64,
    pub reason: String,
    /// Reference instrument (e.g. the front-month future) and its last price
    /// when the signal was built.
    pub reference_symbol: Option<String>,
    pub reference_price: Option<f64>,
    pub created_at_ms: i64,
}

pub fn new_signal_id() -> String {
    format!("sig-{}", uuid::Uuid::new_v4())
}
