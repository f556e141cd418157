use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

/// Parse an exchange-local wall-clock time in `HH:MM` form (e.g. "09:15").
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    let trimmed = s.trim();
    let (h, m) = trimmed
        .split_once(':')
        .with_context(|| format!("invalid time '{}': expected HH:MM", s))?;
    if h.is_empty() || h.len() > 2 || !h.bytes().all(|b| b.is_ascii_digit()) {
        bail!("invalid time '{}': hour must be one or two digits", s);
    }
    if m.len() != 2 || !m.bytes().all(|b| b.is_ascii_digit()) {
        bail!("invalid time '{}': minute must have two digits", s);
    }
    let hour: u32 = h
        .parse()
        .with_context(|| format!("invalid time '{}': hour must be numeric", s))?;
    let minute: u32 = m
        .parse()
        .with_context(|| format!("invalid time '{}': minute must be numeric", s))?;
    NaiveTime::from_hms_opt(hour, minute, 0)
        .with_context(|| format!("invalid time '{}': out of range", s))
}

pub fn parse_weekday(s: &str) -> Result<Weekday> {
    s.trim()
        .parse::<Weekday>()
        .map_err(|_| anyhow!("invalid weekday '{}'", s))
}

pub fn minutes_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Weekday plus `[open, close)` window in the exchange's own timezone.
#[derive(Debug, Clone)]
pub struct TradingWindow {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
    trading_days: Vec<Weekday>,
}

impl TradingWindow {
    pub fn new(tz: Tz, open: NaiveTime, close: NaiveTime, trading_days: Vec<Weekday>) -> Result<Self> {
        if open >= close {
            bail!("market open {} must be before close {}", open, close);
        }
        if trading_days.is_empty() {
            bail!("at least one trading day is required");
        }
        Ok(Self {
            tz,
            open,
            close,
            trading_days,
        })
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn local(&self, at: DateTime<Utc>) -> DateTime<Tz> {
        at.with_timezone(&self.tz)
    }

    pub fn trading_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local(at).date_naive()
    }

    pub fn local_minutes(&self, at: DateTime<Utc>) -> u32 {
        minutes_of_day(self.local(at).time())
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.trading_days.contains(&date.weekday())
    }

    /// Start inclusive, end exclusive.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let local = self.local(at);
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        let t = local.time();
        t >= self.open && t < self.close
    }

    /// Resolve an exchange-local date + wall-clock time to an instant.
    pub fn local_to_utc(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
