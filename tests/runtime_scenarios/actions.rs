//! Action Tests
//!
//! Native and imported actions invoked with CAL and ASC.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::common::*;
use modelbus::{
    native, ActionManifest, CallStatus, Domain, ParamSpec, Result, Runtime, ScriptRunner, Value,
};
use parking_lot::Mutex;

/// Runner standing in for a script interpreter: returns the argument count
/// and remembers what it was asked to run.
#[derive(Default)]
pub struct CountingRunner {
    pub runs: Mutex<Vec<(PathBuf, String)>>,
}

impl ScriptRunner for CountingRunner {
    fn run(
        &self,
        script: &Path,
        function: &str,
        domain: &mut dyn Domain,
        args: &[Value],
    ) -> Result<Value> {
        self.runs
            .lock()
            .push((script.to_path_buf(), function.to_string()));
        domain.output("STDOUT", "counted");
        Ok(Value::Int(args.len() as i64))
    }
}

pub const COUNT_SCRIPT: &str = r#""""Counts its arguments."""

def count(domain, items: 'Obj[*]:Things to count') -> 'Int':
    return len(items)
"#;

fn with_double() -> Runtime {
    let runtime = runtime();
    runtime
        .register_action(
            ActionManifest::new("double")
                .describe("Twice the input")
                .param(ParamSpec::new("x", "Int")),
            native(|_domain, args| {
                let x = args.first().and_then(Value::as_int).unwrap_or(0);
                Ok(Value::Int(x * 2))
            }),
        )
        .unwrap();
    runtime
}

fn wait_terminal(runtime: &Runtime, id: u64) -> CallStatus {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = runtime.calls().status(id).unwrap();
        if status.is_terminal() || Instant::now() > deadline {
            return status;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn sync_call_from_text() {
    let runtime = with_double();
    let r = runtime.exec_text("CAL double (21,)", None).unwrap();
    assert_eq!(r.value(), Some(&Value::Int(42)));
}

#[test]
fn async_call_from_text() {
    let runtime = with_double();
    let r = runtime.exec_text("ASC double (4,)", None).unwrap();
    let id = r.value().and_then(Value::as_int).unwrap() as u64;
    assert_eq!(wait_terminal(&runtime, id), CallStatus::Fin);

    let r = runtime.exec_text(&format!("CST {}", id), None).unwrap();
    let status = r.value().and_then(Value::as_list).unwrap();
    assert_eq!(status[1], Value::from("FIN"));
    assert_eq!(status[3], Value::Int(8));
}

#[test]
fn unknown_action_fails() {
    let runtime = with_double();
    let r = runtime.exec_text("CAL triple (1,)", None).unwrap();
    assert_eq!(r.error_message(), Some("unknown action: triple"));
}

#[test]
fn all_actions_are_listed() {
    let runtime = with_double();
    let r = runtime.exec_text("GAA", None).unwrap();
    let actions = r.value().and_then(Value::as_list).unwrap();
    assert_eq!(actions.len(), 1);
    let descriptor = actions[0].as_list().unwrap();
    assert_eq!(descriptor[0], Value::from("double"));
    assert_eq!(descriptor[3], Value::from("Twice the input"));
}

#[test]
fn imported_script_runs_through_runner() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("count.py"), COUNT_SCRIPT).unwrap();
    let runtime = runtime();
    let runner = Arc::new(CountingRunner::default());

    let report = runtime.import_actions_from(dir.path(), runner.clone());
    assert_eq!(report.imported, vec!["count".to_string()]);

    let r = runtime.exec_text("CAL count (1,2,3)", None).unwrap();
    assert_eq!(r.value(), Some(&Value::Int(3)));
    let runs = runner.runs.lock();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].1, "count");
    assert_eq!(runtime.calls().get(0).unwrap().outputs["STDOUT"], "counted");

    let r = runtime.exec_text("GAA", None).unwrap();
    let descriptor = r.value().and_then(Value::as_list).unwrap()[0]
        .as_list()
        .unwrap()
        .to_vec();
    let params = descriptor[1].as_list().unwrap();
    assert_eq!(params[0].as_list().unwrap()[0], Value::from("items"));
    assert_eq!(descriptor[3], Value::from("Counts its arguments."));
}
