use anyhow::{bail, Context, Result};
use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::market_hours::{parse_hhmm, parse_weekday, TradingWindow};
use crate::model::session::SessionDefinition;
use crate::model::symbol::{Instrument, SymbolRegistry};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub market: MarketConfig,
    #[serde(default)]
    pub symbols: Vec<Instrument>,
    #[serde(default)]
    pub sessions: Vec<SessionDefinition>,
    pub monitor: MonitorConfig,
    pub signal: SignalConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// IANA zone name, e.g. "Asia/Kolkata".
    pub timezone: String,
    pub open: String,
    pub close: String,
    #[serde(default = "default_trading_days")]
    pub trading_days: Vec<String>,
}

fn default_trading_days() -> Vec<String> {
    ["Mon", "Tue", "Wed", "Thu", "Fri"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_iteration_timeout_ms")]
    pub iteration_timeout_ms: u64,
    /// Exchange-local HH:MM after which unbroken sessions stop being re-checked.
    pub breakout_cutoff: String,
    #[serde(default = "default_price_staleness_secs")]
    pub price_staleness_secs: u64,
    #[serde(default = "default_true")]
    pub refresh_active_aggregates: bool,
}

fn default_error_backoff_secs() -> u64 {
    30
}

fn default_iteration_timeout_ms() -> u64 {
    5_000
}

fn default_price_staleness_secs() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

/// Volatility-adjusted target/stop multipliers, as fractions of entry price.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    pub base_target: f64,
    pub target_factor: f64,
    pub base_stop: f64,
    pub stop_factor: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Ticks older than this many days are purged at day rollover; 0 keeps
    /// everything.
    #[serde(default = "default_tick_retention_days")]
    pub tick_retention_days: u32,
}

fn default_busy_timeout_ms() -> u64 {
    2_000
}

fn default_tick_retention_days() -> u32 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl MarketConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid market.timezone '{}': {}", self.timezone, e))
    }

    pub fn trading_window(&self) -> Result<TradingWindow> {
        let open = parse_hhmm(&self.open).context("market.open is invalid")?;
        let close = parse_hhmm(&self.close).context("market.close is invalid")?;
        let days = self
            .trading_days
            .iter()
            .map(|d| parse_weekday(d))
            .collect::<Result<Vec<Weekday>>>()
            .context("market.trading_days is invalid")?;
        TradingWindow::new(self.timezone()?, open, close, days)
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_millis(self.iteration_timeout_ms)
    }

    pub fn price_staleness(&self) -> Duration {
        Duration::from_secs(self.price_staleness_secs)
    }

    pub fn breakout_cutoff_time(&self) -> Result<NaiveTime> {
        parse_hhmm(&self.breakout_cutoff).context("monitor.breakout_cutoff is invalid")
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = std::env::var("SB_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::load_from_path(&config_path)?;

        if let Ok(db_path) = std::env::var("SB_DB_PATH") {
            if !db_path.trim().is_empty() {
                config.storage.path = db_path;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&config_str).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Session definitions are not checked here; each one is validated on its
    /// own at day initialisation.
    pub fn validate(&self) -> Result<()> {
        self.market
            .trading_window()
            .context("market section is invalid")?;
        self.monitor.breakout_cutoff_time()?;
        if self.monitor.interval_secs == 0 {
            bail!("monitor.interval_secs must be > 0");
        }
        if self.monitor.iteration_timeout_ms == 0 {
            bail!("monitor.iteration_timeout_ms must be > 0");
        }
        if self.symbol_registry().instruments().is_empty() {
            bail!("at least one [[symbols]] entry is required");
        }
        if self.sessions.is_empty() {
            bail!("at least one [[sessions]] entry is required");
        }
        let s = &self.signal;
        for (name, v) in [
            ("signal.base_target", s.base_target),
            ("signal.target_factor", s.target_factor),
            ("signal.base_stop", s.base_stop),
            ("signal.stop_factor", s.stop_factor),
        ] {
            if !v.is_finite() || v < 0.0 {
                bail!("{} must be a non-negative number, got {}", name, v);
            }
        }
        if s.quantity == 0 {
            bail!("signal.quantity must be > 0");
        }
        if self.storage.path.trim().is_empty() {
            bail!("storage.path must not be empty");
        }
        Ok(())
    }

    pub fn symbol_registry(&self) -> SymbolRegistry {
        SymbolRegistry::new(self.symbols.clone())
    }
}
