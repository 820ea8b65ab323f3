//! Event Tests
//!
//! Session subscriptions decide which events a session observer receives.

use crate::common::*;
use modelbus::EventType;

#[test]
fn session_sees_only_selected_keys() {
    let runtime = runtime();
    let a = new_item(&runtime, "a");
    let b = new_item(&runtime, "b");
    let session = runtime.open_session();
    let seen = record(&runtime, Some(&session));

    let r = runtime
        .exec_text(&format!("OBS * {}", a.0), Some(&session))
        .unwrap();
    assert!(r.is_ok(), "{:?}", r);

    runtime
        .exec_text(&format!("SET #{} price 1\nSET #{} price 2", a.0, b.0), None)
        .unwrap();
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, EventType::Chg);
    assert_eq!(seen[0].key, a.0.to_string());
}

#[test]
fn unfiltered_observer_sees_everything() {
    let runtime = runtime();
    let a = new_item(&runtime, "a");
    let seen = record(&runtime, None);
    runtime
        .exec_text(&format!("SET #{0} price 1\nSET #{0} name c", a.0), None)
        .unwrap();
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn observe_requires_a_session() {
    let runtime = runtime();
    let r = runtime.exec_text("OBS * *", None).unwrap();
    assert_eq!(
        r.error_message(),
        Some("must specify session before observing events")
    );
}

#[test]
fn unknown_event_type_is_rejected() {
    let runtime = runtime();
    let session = runtime.open_session();
    let r = runtime.exec_text("OBS 'XYZ' *", Some(&session)).unwrap();
    assert!(!r.is_ok());
}
