#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Asia::Kolkata;
use serde_json::{json, Value};
use tempfile::TempDir;

use session_breakout::config::Config;
use session_breakout::model::tick::{RawTick, Tick, TickQuality};
use session_breakout::store::Store;

pub const CONFIG_TOML: &str = r#"
[market]
timezone = "Asia/Kolkata"
open = "09:15"
close = "15:30"

[[symbols]]
symbol = "NIFTY"
token = "99926000"
exchange = "NSE"
name = "NIFTY 50"

[[symbols]]
symbol = "NIFTY28AUG25FUT"
token = "64103"
exchange = "NFO"
breakout = false

[[sessions]]
name = "Morning Opening"
start = "09:30"
end = "09:35"

[[sessions]]
name = "Mid Morning"
start = "09:45"
end = "09:55"

[monitor]
interval_secs = 1
error_backoff_secs = 1
iteration_timeout_ms = 5000
breakout_cutoff = "15:15"
price_staleness_secs = 120

[signal]
base_target = 0.005
target_factor = 0.5
base_stop = 0.003
stop_factor = 0.25
quantity = 1

[storage]
path = "unused.sqlite"

[logging]
level = "debug"
"#;

pub const NIFTY: &str = "NIFTY";
pub const FUTURE: &str = "NIFTY28AUG25FUT";

/// A Wednesday.
pub fn trading_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 20).unwrap()
}

/// Exchange-local wall clock on `trading_date()`.
pub fn ist(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    ist_on(trading_date(), hour, minute, second)
}

pub fn ist_on(date: NaiveDate, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Kolkata
        .from_local_datetime(&date.and_hms_opt(hour, minute, second).unwrap())
        .single()
        .unwrap()
        .with_timezone(&Utc)
}

pub fn config() -> Config {
    let config: Config = toml::from_str(CONFIG_TOML).expect("test config should parse");
    config.validate().expect("test config should validate");
    config
}

pub struct TestEnv {
    pub dir: TempDir,
    pub store: Store,
    pub config: Config,
}

pub fn env() -> TestEnv {
    env_with(config())
}

pub fn env_with(mut config: Config) -> TestEnv {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("breakout.sqlite");
    config.storage.path = path.display().to_string();
    let store = Store::open(&path, config.storage.busy_timeout()).expect("store should open");
    TestEnv { dir, store, config }
}

pub fn raw(value: Value) -> RawTick {
    serde_json::from_value(value).expect("raw tick should decode")
}

pub fn raw_price(symbol: &str, price: f64) -> RawTick {
    raw(json!({ "symbol": symbol, "price": price }))
}

pub fn tick(symbol: &str, price: f64, at: DateTime<Utc>) -> Tick {
    Tick {
        symbol: symbol.to_string(),
        token: "0".to_string(),
        exchange: "NSE".to_string(),
        price,
        change: None,
        change_percent: None,
        high: None,
        low: None,
        open: None,
        close: None,
        volume: None,
        market_timestamp_ms: None,
        received_at_ms: at.timestamp_millis(),
        source: "test".to_string(),
        quality: TickQuality::Partial,
        realtime: true,
    }
}

pub fn store_tick(store: &Store, symbol: &str, price: f64, at: DateTime<Utc>) {
    store
        .insert_tick(&tick(symbol, price, at))
        .expect("tick insert should succeed");
}

/// Ticks for `symbol` between 09:30 and 09:34, high 100 and low 90.
pub fn seed_morning_range(store: &Store, symbol: &str) {
    for (minute, price) in [(30, 95.0), (31, 100.0), (32, 92.0), (33, 90.0), (34, 97.5)] {
        store_tick(store, symbol, price, ist(9, minute, 10));
    }
}
