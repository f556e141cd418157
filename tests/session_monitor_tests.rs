mod common;

use std::collections::BTreeMap;
use std::thread;

use common::{env, ist, seed_morning_range, store_tick, trading_date, TestEnv, FUTURE, NIFTY};
use session_breakout::error::AppError;
use session_breakout::model::session::SessionStatus;
use session_breakout::monitor::{MonitorReport, SessionMonitor};
use session_breakout::session_registry::SessionRegistry;

fn setup() -> (TestEnv, SessionRegistry, SessionMonitor) {
    let env = env();
    let registry = SessionRegistry::new(env.config.sessions.clone());
    registry
        .initialize_day(&env.store, trading_date(), ist(8, 0, 0))
        .expect("init should succeed");
    let monitor = monitor_for(&env);
    (env, registry, monitor)
}

fn monitor_for(env: &TestEnv) -> SessionMonitor {
    SessionMonitor::new(
        env.store.clone(),
        env.config.market.trading_window().unwrap(),
        env.config.symbol_registry().tracked_symbols(),
        env.config.monitor.refresh_active_aggregates,
    )
}

fn status_of(env: &TestEnv, name: &str) -> SessionStatus {
    env.store
        .session_by_name(trading_date(), name)
        .unwrap()
        .unwrap()
        .status
}

#[test]
/// Verifies the PENDING -> ACTIVE transition happens at the start minute and
/// not before.
fn session_starts_at_its_start_minute() {
    let (env, registry, monitor) = setup();

    let early = monitor.advance_sessions(&registry, ist(9, 29, 59)).unwrap();
    assert_eq!(early, MonitorReport::default());
    assert_eq!(status_of(&env, "Morning Opening"), SessionStatus::Pending);

    let report = monitor.advance_sessions(&registry, ist(9, 30, 0)).unwrap();
    assert_eq!(report.started, vec!["Morning Opening"]);
    let state = env.store.session_by_name(trading_date(), "Morning Opening").unwrap().unwrap();
    assert_eq!(state.status, SessionStatus::Active);
    assert_eq!(state.started_at_ms, Some(ist(9, 30, 0).timestamp_millis()));
    assert_eq!(status_of(&env, "Mid Morning"), SessionStatus::Pending);
}

#[test]
/// Verifies restart recovery: with ticks already persisted for a finished
/// window, the first iteration goes straight to COMPLETED with extremes
/// recomputed from history.
fn first_iteration_after_restart_completes_with_recomputed_levels() {
    let (env, registry, monitor) = setup();
    seed_morning_range(&env.store, NIFTY);
    store_tick(&env.store, FUTURE, 24_700.0, ist(9, 31, 0));
    // Outside the window on both sides.
    store_tick(&env.store, NIFTY, 150.0, ist(9, 29, 59));
    store_tick(&env.store, NIFTY, 10.0, ist(9, 35, 0));

    let report = monitor.advance_sessions(&registry, ist(9, 40, 0)).unwrap();
    assert_eq!(report.started, vec!["Morning Opening"]);
    assert_eq!(report.completed, vec!["Morning Opening"]);

    let state = env.store.session_by_name(trading_date(), "Morning Opening").unwrap().unwrap();
    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.completed_at_ms, Some(ist(9, 40, 0).timestamp_millis()));
    let nifty = &state.symbols[NIFTY];
    assert_eq!(nifty.levels(), Some((100.0, 90.0)));
    assert_eq!(nifty.tick_count, 5);
    assert_eq!(nifty.first_tick_ms, Some(ist(9, 30, 10).timestamp_millis()));
    assert_eq!(nifty.last_tick_ms, Some(ist(9, 34, 10).timestamp_millis()));
    assert_eq!(state.symbols[FUTURE].levels(), Some((24_700.0, 24_700.0)));
    assert!(!state.breakouts_checked);
}

#[test]
/// Verifies a window with no ticks completes with null extremes.
fn empty_window_completes_with_null_levels() {
    let (env, registry, monitor) = setup();

    monitor.advance_sessions(&registry, ist(9, 40, 0)).unwrap();

    let state = env.store.session_by_name(trading_date(), "Morning Opening").unwrap().unwrap();
    assert_eq!(state.status, SessionStatus::Completed);
    for symbol in [NIFTY, FUTURE] {
        let agg = &state.symbols[symbol];
        assert_eq!(agg.high, None);
        assert_eq!(agg.low, None);
        assert_eq!(agg.tick_count, 0);
    }
}

#[test]
/// Verifies the end boundary: the session stays ACTIVE through its end
/// minute and completes on the first minute after it.
fn completes_only_after_end_minute() {
    let (env, registry, monitor) = setup();
    monitor.advance_sessions(&registry, ist(9, 30, 0)).unwrap();

    monitor.advance_sessions(&registry, ist(9, 35, 59)).unwrap();
    assert_eq!(status_of(&env, "Morning Opening"), SessionStatus::Active);

    let report = monitor.advance_sessions(&registry, ist(9, 36, 0)).unwrap();
    assert_eq!(report.completed, vec!["Morning Opening"]);
    assert_eq!(status_of(&env, "Morning Opening"), SessionStatus::Completed);
}

#[test]
/// Verifies the provisional refresh while ACTIVE, and that completion
/// replaces it with the full-window recomputation.
fn active_refresh_is_replaced_at_completion() {
    let (env, registry, monitor) = setup();
    store_tick(&env.store, NIFTY, 95.0, ist(9, 30, 10));
    store_tick(&env.store, NIFTY, 98.0, ist(9, 31, 10));

    monitor.advance_sessions(&registry, ist(9, 30, 5)).unwrap();
    let report = monitor.advance_sessions(&registry, ist(9, 32, 0)).unwrap();
    assert_eq!(report.refreshed, 1);
    let provisional = env.store.session_by_name(trading_date(), "Morning Opening").unwrap().unwrap();
    assert_eq!(provisional.status, SessionStatus::Active);
    assert_eq!(provisional.symbols[NIFTY].levels(), Some((98.0, 95.0)));

    store_tick(&env.store, NIFTY, 104.0, ist(9, 33, 0));
    store_tick(&env.store, NIFTY, 91.0, ist(9, 34, 59));
    monitor.advance_sessions(&registry, ist(9, 36, 0)).unwrap();

    let done = env.store.session_by_name(trading_date(), "Morning Opening").unwrap().unwrap();
    assert_eq!(done.symbols[NIFTY].levels(), Some((104.0, 91.0)));
    assert_eq!(done.symbols[NIFTY].tick_count, 4);
}

#[test]
/// Verifies a stale observation is a no-op: acting on a snapshot another
/// instance already advanced updates nothing and raises no error.
fn stale_snapshot_is_a_safe_noop() {
    let (env, _registry, monitor) = setup();
    let stale = env.store.session_by_name(trading_date(), "Morning Opening").unwrap().unwrap();
    assert_eq!(stale.status, SessionStatus::Pending);

    let at = ist(9, 36, 0).timestamp_millis();
    env.store
        .transition_session(stale.id, SessionStatus::Pending, SessionStatus::Active, at, None)
        .unwrap();
    env.store
        .transition_session(stale.id, SessionStatus::Active, SessionStatus::Completed, at, Some(&BTreeMap::new()))
        .unwrap();

    let mut report = MonitorReport::default();
    monitor
        .advance_session(&stale, ist(9, 40, 0), &mut report)
        .expect("stale observation must not error");
    assert_eq!(report.stale, 1);
    assert!(report.started.is_empty());
    assert_eq!(status_of(&env, "Morning Opening"), SessionStatus::Completed);
}

#[test]
/// Verifies transitions outside the state machine are refused before they
/// reach storage.
fn backwards_transitions_are_invariant_violations() {
    let (env, _registry, _monitor) = setup();
    let s = env.store.session_by_name(trading_date(), "Morning Opening").unwrap().unwrap();
    let at = ist(9, 40, 0).timestamp_millis();

    for (from, to) in [
        (SessionStatus::Completed, SessionStatus::Pending),
        (SessionStatus::Active, SessionStatus::Pending),
        (SessionStatus::Pending, SessionStatus::Completed),
        (SessionStatus::Completed, SessionStatus::Active),
    ] {
        let err = env
            .store
            .transition_session(s.id, from, to, at, None)
            .expect_err("transition must be refused");
        assert!(matches!(err, AppError::InvariantViolation { .. }), "{:?}", err);
    }
    assert_eq!(status_of(&env, "Morning Opening"), SessionStatus::Pending);
}

#[test]
/// Verifies observed statuses never go backwards across a full morning of
/// iterations.
fn status_sequence_is_monotonic() {
    let (env, registry, monitor) = setup();
    seed_morning_range(&env.store, NIFTY);

    let mut seen: Vec<SessionStatus> = Vec::new();
    for minute in 0..80 {
        monitor.advance_sessions(&registry, ist(9, 20 + minute / 2, (minute % 2) * 30)).unwrap();
        seen.push(status_of(&env, "Mid Morning"));
    }
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
    assert_eq!(seen.first(), Some(&SessionStatus::Pending));
    assert_eq!(seen.last(), Some(&SessionStatus::Completed));
}

#[test]
/// Verifies redundant instances racing on one database advance each session
/// exactly once.
fn concurrent_monitors_advance_once() {
    let (env, registry, _monitor) = setup();
    seed_morning_range(&env.store, NIFTY);

    let reports: Vec<MonitorReport> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let monitor = monitor_for(&env);
                let registry = &registry;
                scope.spawn(move || monitor.advance_sessions(registry, ist(9, 40, 0)).unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let started: usize = reports.iter().map(|r| r.started.len()).sum();
    let completed: usize = reports.iter().map(|r| r.completed.len()).sum();
    assert_eq!(started, 1);
    assert_eq!(completed, 1);
    assert!(reports.iter().all(|r| r.errors == 0));
    let state = env.store.session_by_name(trading_date(), "Morning Opening").unwrap().unwrap();
    assert_eq!(state.symbols[NIFTY].levels(), Some((100.0, 90.0)));
}
