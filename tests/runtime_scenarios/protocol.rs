//! Protocol Tests
//!
//! Text programs through `Runtime::exec_text`, including the reference
//! GET and SET scenarios.

use crate::common::*;
use modelbus::{des, ser, ser_value, Command, CommandKind, Query, ResultStatus, Runtime, Value};

// ============================================================================
// Reference scenarios
// ============================================================================

#[test]
fn get_decodes_to_object_path_pipeline() {
    let cmd = des("GET #1/name").unwrap();
    assert_eq!(cmd, Command::get(Query::new().obj(1).pth("name")));
    assert_eq!(ser(&cmd), "GET #1/name");
}

#[test]
fn get_returns_feature_value() {
    let runtime = runtime();
    let id = new_item(&runtime, "foo");
    let r = runtime
        .exec_text(&format!("GET #{}/name", id.0), None)
        .unwrap();
    assert_eq!(r.kind, CommandKind::Get);
    assert_eq!(r.status, ResultStatus::Oky);
    assert_eq!(r.value(), Some(&Value::from("foo")));
}

#[test]
fn set_then_changes_since_shows_one_change() {
    let runtime = runtime();
    let id = new_item(&runtime, "foo");
    let before = runtime.engine().latest_change_id();

    let r = runtime
        .exec_text(&format!("SET #{} name 'bar'", id.0), None)
        .unwrap();
    assert!(r.is_ok(), "{:?}", r);

    let r = runtime
        .exec_text(&format!("CHG {} 0", before + 1), None)
        .unwrap();
    let changes = r.value().and_then(Value::as_list).unwrap();
    assert_eq!(changes.len(), 1);
    let fields = changes[0].as_list().unwrap();
    assert_eq!(fields[1], Value::from("SET"));
    assert_eq!(fields[2], Value::Obj(id));
    assert_eq!(fields[3], Value::from("name"));
    assert_eq!(fields[4], Value::from("bar"));
}

#[test]
fn returned_object_handle_can_be_sent_back() {
    let runtime = runtime();
    let id = new_item(&runtime, "foo");
    let text = format!("GET #{}", id.0);
    assert_eq!(des(&text).unwrap(), Command::get(Value::Obj(id)));

    let r = runtime.exec_text(&text, None).unwrap();
    let handle = r.value().cloned().unwrap();
    assert_eq!(handle, Value::Obj(id));
    assert_eq!(ser_value(&handle), format!("#{}", id.0));

    let r = runtime
        .exec_text(&format!("SET {} name bar", ser_value(&handle)), None)
        .unwrap();
    assert!(r.is_ok(), "{:?}", r);
    let r = runtime
        .exec_text(&format!("GET #{}/name", id.0), None)
        .unwrap();
    assert_eq!(r.value(), Some(&Value::from("bar")));
}

// ============================================================================
// Programs
// ============================================================================

#[test]
fn multi_program_payload_runs_as_one_compound() {
    let runtime = runtime();
    let id = new_item(&runtime, "a");
    let r = runtime
        .exec_text(&format!("SET #{0} price 3\nGET #{0}/price", id.0), None)
        .unwrap();
    assert_eq!(r.kind, CommandKind::Cmp);
    let values = r.to_value();
    assert_eq!(values.as_list().map(<[Value]>::len), Some(2));
    assert_eq!(values.as_list().unwrap()[1], Value::Int(3));
}

#[test]
fn malformed_program_is_a_parse_error() {
    let runtime = runtime();
    let err = runtime.exec_text("GET (#1", None).unwrap_err();
    assert!(matches!(err, modelbus::Error::Parse { .. }));
}

#[test]
fn unknown_command_fails() {
    let runtime = runtime();
    assert!(runtime.exec_text("XYZ 1", None).is_err());
}

#[test]
fn result_value_reencodes() {
    let runtime = runtime();
    let id = new_item(&runtime, "a b");
    let r = runtime
        .exec_text(&format!("GET #{}/name", id.0), None)
        .unwrap();
    assert_eq!(Runtime::encode_value(&r), "'a b'");
}

#[test]
fn results_serialize_to_json() {
    let runtime = runtime();
    let id = new_item(&runtime, "a");
    let json = runtime
        .exec_json(&format!("GET #{}/name", id.0), None)
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["status"], "Oky");
    assert!(parsed["transaction_id"].as_u64().unwrap() > 0);
}

#[test]
fn path_reference_of_created_object() {
    let runtime = runtime();
    let id = new_item(&runtime, "a");
    let r = runtime.exec_text(&format!("QRF #{}", id.0), None).unwrap();
    let path = r.value().and_then(Value::as_query).unwrap();
    let r = runtime.exec(&Command::get(Value::Qry(path.clone())), None);
    assert_eq!(r.value(), Some(&Value::Obj(id)));
}
