//! Call records

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};

use modelbus_core::{CallOptions, CallStatus, CallType, Value};

/// Format of timestamps in status info strings.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// `at` as it appears in status info strings.
pub fn timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// One sync or async invocation of an action.
#[derive(Debug, Clone)]
pub struct Call {
    /// Call id
    pub id: u64,
    /// Action name
    pub name: String,
    /// Evaluated arguments
    pub args: Vec<Value>,
    /// Options
    pub opts: CallOptions,
    /// Sync or async
    pub call_type: CallType,
    /// Current status
    pub status: CallStatus,
    /// Session the call runs in
    pub session: Option<String>,
    /// Session that issued the call
    pub parent_session: Option<String>,
    /// Captured output by channel
    pub outputs: BTreeMap<String, String>,
    /// Whether a value was set
    pub has_value: bool,
    /// Value set by the action
    pub value: Value,
    /// Status info
    pub info: String,
    /// Wall-clock start, set when the call starts running
    pub start_time: Option<DateTime<Local>>,
    /// Wall-clock end, set on reaching a terminal status
    pub end_time: Option<DateTime<Local>>,
    /// Whether the parent session was subscribed to the call's events
    pub autoobserved: bool,
    started: Option<Instant>,
    abort: Arc<AtomicBool>,
}

impl Call {
    pub(crate) fn new(
        id: u64,
        name: String,
        args: Vec<Value>,
        opts: CallOptions,
        call_type: CallType,
        session: Option<String>,
        parent_session: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            args,
            opts,
            call_type,
            status: CallStatus::Ini,
            session,
            parent_session,
            outputs: BTreeMap::new(),
            has_value: false,
            value: Value::Null,
            info: String::new(),
            start_time: None,
            end_time: None,
            autoobserved: false,
            started: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the call as started now.
    pub(crate) fn mark_started(&mut self) {
        let now = Local::now();
        self.start_time = Some(now);
        self.started = Some(Instant::now());
        self.info = format!("action {} started {}", self.name, timestamp(now));
    }

    /// Seconds since the call started, `0` if it never did.
    pub fn elapsed_secs(&self) -> f64 {
        self.started
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Info string extended by the end of the call.
    ///
    /// `outcome` is `ended`, `failed` or `aborted`; `detail` is appended after
    /// a colon.
    pub(crate) fn ending_info(&self, outcome: &str, detail: Option<&str>) -> String {
        let mut info = format!(
            "{} and {} {} (elapsed time: {:.6} s)",
            self.info,
            outcome,
            timestamp(Local::now()),
            self.elapsed_secs()
        );
        if let Some(detail) = detail {
            info.push_str(": ");
            info.push_str(detail);
        }
        info
    }

    /// Shared cancellation flag.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Whether abort was requested.
    pub fn is_abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// `[callId, status, info, value, outputs]` with outputs as
    /// `[[channel, text], ...]`.
    pub fn to_status_value(&self) -> Value {
        Value::List(vec![
            Value::Int(self.id as i64),
            Value::from(self.status.name()),
            Value::from(self.info.as_str()),
            self.value.clone(),
            Value::List(
                self.outputs
                    .iter()
                    .map(|(channel, text)| {
                        Value::List(vec![Value::from(channel.as_str()), Value::from(text.as_str())])
                    })
                    .collect(),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call() -> Call {
        Call::new(
            3,
            "demo".into(),
            vec![],
            CallOptions::default(),
            CallType::Syn,
            None,
            None,
        )
    }

    #[test]
    fn test_status_value_layout() {
        let mut c = call();
        c.outputs.insert("STDOUT".into(), "hi".into());
        let v = c.to_status_value();
        assert_eq!(
            v,
            Value::List(vec![
                Value::Int(3),
                "INI".into(),
                "".into(),
                Value::Null,
                Value::List(vec![Value::List(vec!["STDOUT".into(), "hi".into()])]),
            ])
        );
    }

    #[test]
    fn test_info_strings() {
        let mut c = call();
        c.mark_started();
        assert!(c.info.starts_with("action demo started "));
        let ended = c.ending_info("ended", None);
        assert!(ended.contains(" and ended "));
        assert!(ended.ends_with(" s)"));
        let failed = c.ending_info("failed", Some("boom"));
        assert!(failed.ends_with(" s): boom"));
    }
}
