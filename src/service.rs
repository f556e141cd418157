//! Scheduler driving the session monitor and breakout detector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinError;

use crate::breakout::{BreakoutDetector, BreakoutReport};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::market_hours::TradingWindow;
use crate::monitor::{MonitorReport, SessionMonitor};
use crate::session_registry::{DayInitReport, SessionRegistry};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Starting,
    Running,
    /// Last iteration failed or timed out; the loop keeps retrying.
    Degraded,
    Stopped,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub monitoring_active: bool,
    pub market_hours: bool,
    pub service_status: ServiceState,
}

#[derive(Default)]
struct StatusInner {
    monitoring_active: AtomicBool,
    market_hours: AtomicBool,
    state: RwLock<ServiceState>,
}

/// Cheap, cloneable read handle for the administrative surface.
#[derive(Clone, Default)]
pub struct StatusHandle {
    inner: Arc<StatusInner>,
}

impl StatusHandle {
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            monitoring_active: self.inner.monitoring_active.load(Ordering::Relaxed),
            market_hours: self.inner.market_hours.load(Ordering::Relaxed),
            service_status: *self.inner.state.read(),
        }
    }

    fn set_monitoring(&self, active: bool) {
        self.inner.monitoring_active.store(active, Ordering::Relaxed);
    }

    fn set_market_hours(&self, open: bool) {
        self.inner.market_hours.store(open, Ordering::Relaxed);
    }

    fn set_state(&self, state: ServiceState) {
        *self.inner.state.write() = state;
    }
}

#[derive(Debug, Default)]
pub struct IterationReport {
    pub trading_date: Option<NaiveDate>,
    /// Present when this iteration initialised a new trading date.
    pub day_init: Option<DayInitReport>,
    pub ticks_purged: usize,
    pub monitor: MonitorReport,
    pub breakout: BreakoutReport,
}

pub struct MonitorService {
    store: Store,
    window: TradingWindow,
    registry: SessionRegistry,
    monitor: SessionMonitor,
    detector: BreakoutDetector,
    interval: Duration,
    error_backoff: Duration,
    iteration_timeout: Duration,
    tick_retention_days: u32,
    initialized_date: Mutex<Option<NaiveDate>>,
    status: StatusHandle,
}

impl MonitorService {
    pub fn from_config(config: &Config, store: Store) -> Result<Self> {
        let window = config.market.trading_window()?;
        let symbols = config.symbol_registry();
        let cutoff = config.monitor.breakout_cutoff_time()?;
        let monitor = SessionMonitor::new(
            store.clone(),
            window.clone(),
            symbols.tracked_symbols(),
            config.monitor.refresh_active_aggregates,
        );
        let detector = BreakoutDetector::new(
            store.clone(),
            window.clone(),
            symbols.breakout_symbols(),
            cutoff,
            config.monitor.price_staleness(),
            config.signal.clone(),
        )
        .with_reference_symbols(symbols.reference_symbols());
        Ok(Self {
            store,
            window,
            registry: SessionRegistry::new(config.sessions.clone()),
            monitor,
            detector,
            interval: config.monitor.interval(),
            error_backoff: config.monitor.error_backoff(),
            iteration_timeout: config.monitor.iteration_timeout(),
            tick_retention_days: config.storage.tick_retention_days,
            initialized_date: Mutex::new(None),
            status: StatusHandle::default(),
        })
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Administrative trigger; idempotent for any date.
    pub fn initialize_day(&self, date: NaiveDate, now: DateTime<Utc>) -> AppResult<DayInitReport> {
        let report = self.registry.initialize_day(&self.store, date, now)?;
        tracing::info!(
            trading_date = %date,
            created = report.created.len(),
            existing = report.existing.len(),
            failed = report.failed.len(),
            "Trading day initialized"
        );
        Ok(report)
    }

    /// Drop ticks from before the retention horizon, counted in exchange-local
    /// days back from `date`. A failure only skips the purge for this day.
    fn purge_old_ticks(&self, date: NaiveDate) -> usize {
        if self.tick_retention_days == 0 {
            return 0;
        }
        let midnight = NaiveTime::default();
        let Some(horizon) = date
            .checked_sub_days(Days::new(u64::from(self.tick_retention_days)))
            .and_then(|d| self.window.local_to_utc(d, midnight))
        else {
            return 0;
        };
        match self.store.purge_ticks_before(horizon.timestamp_millis()) {
            Ok(deleted) => {
                if deleted > 0 {
                    tracing::info!(deleted, before = %horizon, "Purged old ticks");
                }
                deleted
            }
            Err(e) => {
                tracing::warn!(error = %e, "Tick purge failed");
                0
            }
        }
    }

    /// One scheduler tick: roll the day over if needed, advance sessions,
    /// then evaluate completed sessions for breakouts.
    pub fn run_iteration(&self, now: DateTime<Utc>) -> AppResult<IterationReport> {
        let date = self.window.trading_date(now);
        self.status.set_market_hours(self.window.contains(now));

        let mut report = IterationReport::default();
        if !self.window.is_trading_day(date) {
            tracing::debug!(trading_date = %date, "Not a trading day, idle");
            return Ok(report);
        }
        report.trading_date = Some(date);

        if *self.initialized_date.lock() != Some(date) {
            report.day_init = Some(self.initialize_day(date, now)?);
            report.ticks_purged = self.purge_old_ticks(date);
            *self.initialized_date.lock() = Some(date);
        }

        report.monitor = self.monitor.advance_sessions(&self.registry, now)?;
        report.breakout = self.detector.check_sessions(&self.registry, now)?;
        Ok(report)
    }

    /// Run the loop until `shutdown` flips or its sender is dropped.
    ///
    /// Each iteration runs on the blocking pool under `iteration_timeout`. A
    /// timed-out iteration is abandoned, not cancelled: it may still finish in
    /// the background, which the guarded updates tolerate.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.status.set_monitoring(true);
        self.status.set_state(ServiceState::Running);
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            sessions = self.registry.definitions().len(),
            "Session monitor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            let svc = Arc::clone(&self);
            let now = Utc::now();
            let task = tokio::task::spawn_blocking(move || svc.run_iteration(now));

            let delay = match tokio::time::timeout(self.iteration_timeout, task).await {
                Ok(joined) => self.settle(joined),
                Err(_) => {
                    self.iteration_failed(&AppError::StorageTimeout(self.iteration_timeout));
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.status.set_monitoring(false);
        self.status.set_state(ServiceState::Stopped);
        tracing::info!("Session monitor stopped");
        Ok(())
    }

    /// Record the outcome of a finished iteration and pick the next delay.
    /// A panicked iteration counts as a failure; the loop carries on.
    fn settle(&self, joined: std::result::Result<AppResult<IterationReport>, JoinError>) -> Duration {
        match joined {
            Ok(Ok(report)) => {
                self.log_iteration(&report);
                self.status.set_state(ServiceState::Running);
                self.interval
            }
            Ok(Err(e)) => {
                self.iteration_failed(&e);
                self.error_backoff
            }
            Err(e) => {
                self.status.set_state(ServiceState::Degraded);
                tracing::error!(error = %e, backoff_secs = self.error_backoff.as_secs(), "Monitor iteration panicked");
                self.error_backoff
            }
        }
    }

    fn iteration_failed(&self, e: &AppError) {
        self.status.set_state(ServiceState::Degraded);
        if e.is_transient() {
            tracing::warn!(error = %e, backoff_secs = self.error_backoff.as_secs(), "Monitor iteration failed, retrying");
        } else {
            tracing::error!(error = %e, backoff_secs = self.error_backoff.as_secs(), "Monitor iteration failed");
        }
    }

    fn log_iteration(&self, report: &IterationReport) {
        let m = &report.monitor;
        let b = &report.breakout;
        if m.started.is_empty() && m.completed.is_empty() && b.checked.is_empty() && m.errors == 0 && b.errors == 0 {
            tracing::trace!("Monitor iteration idle");
            return;
        }
        tracing::debug!(
            started = m.started.len(),
            completed = m.completed.len(),
            refreshed = m.refreshed,
            stale = m.stale,
            checked = b.checked.len(),
            deferred = b.deferred.len(),
            signals = b.signals.len(),
            errors = m.errors + b.errors,
            "Monitor iteration done"
        );
    }
}
