//! Transaction Tests
//!
//! Atomicity of compound programs and the bounds of the change log.

use crate::common::*;
use modelbus::{RuntimeConfig, Value};
use proptest::prelude::*;

#[test]
fn failing_program_leaves_no_trace() {
    init_tracing();
    let runtime = runtime();
    let id = new_item(&runtime, "a");
    let before = runtime.engine().latest_change_id();

    let r = runtime
        .exec_text(
            &format!("SET #{0} price 1\nSET #{0} name b\nSET #{0} nope 1", id.0),
            None,
        )
        .unwrap();
    assert!(!r.is_ok());
    assert_eq!(read(&runtime, id, "name"), Value::from("a"));
    assert_eq!(read(&runtime, id, "price"), Value::Null);
    assert_eq!(runtime.engine().latest_change_id(), before);

    let r = runtime.exec_text("CHG 0 0", None).unwrap();
    assert_eq!(r.value(), Some(&Value::List(vec![])));
}

#[test]
fn transaction_ids_increase() {
    let runtime = runtime();
    let id = new_item(&runtime, "a");
    let first = runtime
        .exec_text(&format!("GET #{}/name", id.0), None)
        .unwrap();
    let second = runtime
        .exec_text(&format!("SET #{} name x", id.0), None)
        .unwrap();
    assert!(second.transaction_id > first.transaction_id);
    assert_eq!(second.change_id, runtime.engine().latest_change_id());
}

#[test]
fn history_reference_feeds_later_command() {
    let runtime = runtime();
    let id = new_item(&runtime, "a");
    let r = runtime
        .exec_text(&format!("GET #{}/name\nSET #{} price $0", id.0, id.0), None)
        .unwrap();
    assert!(r.is_ok(), "{:?}", r);
    assert_eq!(read(&runtime, id, "price"), Value::from("a"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn change_log_stays_bounded(max in 1usize..6, sets in 0usize..15) {
        let runtime = runtime_with(RuntimeConfig { max_changes: max, ..RuntimeConfig::default() });
        let id = new_item(&runtime, "a");
        for i in 0..sets {
            let r = runtime.exec_text(&format!("SET #{} price {}", id.0, i), None).unwrap();
            prop_assert!(r.is_ok());
        }
        let r = runtime.exec_text("CHG 0 0", None).unwrap();
        let changes = r.value().and_then(Value::as_list).unwrap().to_vec();
        prop_assert_eq!(changes.len(), sets.min(max));
        if let Some(first) = changes.first() {
            let earliest = first.as_list().unwrap()[0].clone();
            prop_assert_eq!(earliest, Value::Int(sets.saturating_sub(max) as i64));
        }
    }
}
