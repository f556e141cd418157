mod common;

use std::collections::BTreeMap;

use common::{env, ist, store_tick, tick, trading_date, NIFTY};
use session_breakout::error::AppError;
use session_breakout::model::session::{SessionDefinition, SessionStatus, SymbolAggregate};
use session_breakout::model::signal::{BreakoutDirection, Signal, SignalStatus};
use session_breakout::signal_emitter::{Emission, SignalEmitter};
use session_breakout::store::Store;

fn signal(id: &str, session_state_id: i64, direction: BreakoutDirection, created_at_ms: i64) -> Signal {
    Signal {
        id: id.to_string(),
        symbol: NIFTY.to_string(),
        option_type: direction.option_type(),
        signal_type: direction.signal_type(),
        direction,
        entry_price: 101.0,
        target_price: 101.5,
        stop_loss: 100.7,
        quantity: 1,
        confidence: 12.5,
        status: SignalStatus::Active,
        session_state_id,
        session_name: "Morning Opening".to_string(),
        session_high: 100.0,
        session_low: 90.0,
        breakout_amount: 1.0,
        reason: "test".to_string(),
        reference_symbol: None,
        reference_price: None,
        created_at_ms,
    }
}

#[test]
/// Verifies the emitter is idempotent per breakout: a second signal for the
/// same session, symbol and direction resolves to the first one's id.
fn emitter_returns_existing_id_for_same_breakout() {
    let env = env();
    let emitter = SignalEmitter::new(env.store.clone());

    let first = emitter
        .emit(&signal("sig-a", 7, BreakoutDirection::HighBreak, 1))
        .expect("emit should succeed");
    let again = emitter
        .emit(&signal("sig-b", 7, BreakoutDirection::HighBreak, 2))
        .expect("re-emit should succeed");
    let other_side = emitter
        .emit(&signal("sig-c", 7, BreakoutDirection::LowBreak, 3))
        .expect("other direction should succeed");

    assert_eq!(first, Emission::Created("sig-a".to_string()));
    assert!(first.is_new());
    assert_eq!(again, Emission::Existing("sig-a".to_string()));
    assert_eq!(again.id(), "sig-a");
    assert!(other_side.is_new());
    assert_eq!(env.store.signals_for_session(7).unwrap().len(), 2);
}

#[test]
/// Verifies signal read accessors: per session in creation order, and active
/// signals newest first.
fn signal_read_accessors() {
    let env = env();
    env.store.insert_signal(&signal("sig-1", 1, BreakoutDirection::HighBreak, 100)).unwrap();
    env.store.insert_signal(&signal("sig-2", 2, BreakoutDirection::LowBreak, 300)).unwrap();
    env.store.insert_signal(&signal("sig-3", 1, BreakoutDirection::LowBreak, 200)).unwrap();

    let ids: Vec<String> = env.store.active_signals().unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["sig-2", "sig-3", "sig-1"]);

    let session_one = env.store.signals_for_session(1).unwrap();
    assert_eq!(session_one.len(), 2);
    assert_eq!(session_one[0], signal("sig-1", 1, BreakoutDirection::HighBreak, 100));

    let found = env
        .store
        .signal_for_breakout(1, NIFTY, BreakoutDirection::LowBreak)
        .unwrap()
        .expect("signal should exist");
    assert_eq!(found.id, "sig-3");
    assert!(env
        .store
        .signal_for_breakout(2, NIFTY, BreakoutDirection::HighBreak)
        .unwrap()
        .is_none());
}

#[test]
/// Verifies tick reads: half-open range scans, SQL aggregates and the
/// staleness-bounded latest price.
fn tick_range_aggregate_and_latest() {
    let env = env();
    for (second, price) in [(0, 10.0), (10, 12.0), (20, 9.0), (30, 11.0)] {
        store_tick(&env.store, NIFTY, price, ist(10, 0, second));
    }
    let start = ist(10, 0, 0).timestamp_millis();
    let end = ist(10, 0, 30).timestamp_millis();

    let ticks = env.store.ticks_in_range(NIFTY, start, end).unwrap();
    assert_eq!(ticks.iter().map(|t| t.price).collect::<Vec<_>>(), vec![10.0, 12.0, 9.0]);
    assert_eq!(ticks[0], tick(NIFTY, 10.0, ist(10, 0, 0)));

    let agg = env.store.session_aggregate(NIFTY, start, end).unwrap();
    assert_eq!(agg.levels(), Some((12.0, 9.0)));
    assert_eq!(agg.tick_count, 3);

    let empty = env.store.session_aggregate("OTHER", start, end).unwrap();
    assert_eq!(empty, SymbolAggregate::default());

    let latest = env.store.latest_tick(NIFTY, start).unwrap().unwrap();
    assert_eq!(latest.price, 11.0);
    assert!(env.store.latest_tick(NIFTY, ist(10, 1, 0).timestamp_millis()).unwrap().is_none());

    let dup = env.store.insert_tick(&tick(NIFTY, 99.0, ist(10, 0, 0))).unwrap_err();
    assert!(dup.is_duplicate());
}

#[test]
/// Verifies session aggregates and signal back-references survive a reopen of
/// the database file, and checked sessions cannot be marked twice.
fn session_state_persists_across_reopen() {
    let env = env();
    let date = trading_date();
    let def = SessionDefinition::new("Morning Opening", "09:30", "09:35");
    assert!(env.store.insert_session_if_absent(date, &def, 1).unwrap());
    assert!(!env.store.insert_session_if_absent(date, &def, 2).unwrap());
    let id = env.store.session_by_name(date, &def.name).unwrap().unwrap().id;

    let mut aggregate = BTreeMap::new();
    aggregate.insert(
        NIFTY.to_string(),
        SymbolAggregate {
            high: Some(100.0),
            low: Some(90.0),
            tick_count: 5,
            first_tick_ms: Some(10),
            last_tick_ms: Some(50),
        },
    );
    assert!(env.store.transition_session(id, SessionStatus::Pending, SessionStatus::Active, 5, None).unwrap());
    assert!(!env.store.transition_session(id, SessionStatus::Pending, SessionStatus::Active, 6, None).unwrap());
    assert!(env
        .store
        .transition_session(id, SessionStatus::Active, SessionStatus::Completed, 60, Some(&aggregate))
        .unwrap());
    assert!(!env.store.refresh_session_aggregate(id, &BTreeMap::new(), 61).unwrap());
    assert!(env.store.mark_breakouts_checked(id, &["sig-x".to_string()], 70).unwrap());
    assert!(!env.store.mark_breakouts_checked(id, &["sig-y".to_string()], 71).unwrap());

    let reopened = Store::open(env.store.path(), env.config.storage.busy_timeout()).unwrap();
    let state = reopened.session(id).unwrap().unwrap();
    assert_eq!(state.status, SessionStatus::Completed);
    assert_eq!(state.started_at_ms, Some(5));
    assert_eq!(state.completed_at_ms, Some(60));
    assert_eq!(state.symbols, aggregate);
    assert!(state.breakouts_checked);
    assert_eq!(state.signals_generated, vec!["sig-x"]);
    assert_eq!(state.created_at_ms, 1);
    assert_eq!(state.updated_at_ms, 70);
}

#[test]
/// Verifies checks on non-COMPLETED sessions are refused.
fn mark_checked_requires_completed() {
    let env = env();
    let date = trading_date();
    let def = SessionDefinition::new("Mid Morning", "09:45", "09:55");
    env.store.insert_session_if_absent(date, &def, 1).unwrap();
    let id = env.store.session_by_name(date, &def.name).unwrap().unwrap().id;

    assert!(!env.store.mark_breakouts_checked(id, &[], 2).unwrap());
    assert!(!env.store.session(id).unwrap().unwrap().breakouts_checked);
    assert!(matches!(
        env.store.transition_session(id, SessionStatus::Completed, SessionStatus::Completed, 3, None),
        Err(AppError::InvariantViolation { .. })
    ));
}

#[test]
/// Verifies the purge drops only ticks before the cutoff and leaves session
/// states and signals alone.
fn purge_removes_old_ticks_only() {
    let env = env();
    let date = trading_date();
    let def = SessionDefinition::new("Morning Opening", "09:30", "09:35");
    env.store.insert_session_if_absent(date, &def, 1).unwrap();
    let id = env.store.session_by_name(date, &def.name).unwrap().unwrap().id;
    env.store.insert_signal(&signal("sig-keep", id, BreakoutDirection::HighBreak, 5)).unwrap();

    store_tick(&env.store, NIFTY, 10.0, ist(9, 0, 0));
    store_tick(&env.store, NIFTY, 11.0, ist(9, 59, 59));
    store_tick(&env.store, NIFTY, 12.0, ist(10, 0, 0));
    store_tick(&env.store, NIFTY, 13.0, ist(10, 5, 0));

    let deleted = env.store.purge_ticks_before(ist(10, 0, 0).timestamp_millis()).unwrap();
    assert_eq!(deleted, 2);
    let left = env
        .store
        .ticks_in_range(NIFTY, 0, i64::MAX)
        .unwrap()
        .into_iter()
        .map(|t| t.price)
        .collect::<Vec<_>>();
    assert_eq!(left, vec![12.0, 13.0]);

    assert_eq!(env.store.purge_ticks_before(0).unwrap(), 0);
    assert!(env.store.session(id).unwrap().is_some());
    assert_eq!(env.store.signals_for_session(id).unwrap().len(), 1);
}
