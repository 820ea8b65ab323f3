//! Common test utilities for runtime scenarios

use std::sync::Arc;

use modelbus::{Event, FeatureKind, InMemoryMdb, ObjId, Runtime, RuntimeConfig, Value};
use parking_lot::Mutex;

/// Metamodel `shop` with class `Item { name, price, parts[*] }`.
pub fn shop_mdb() -> InMemoryMdb {
    let mut mdb = InMemoryMdb::new();
    let pkg = mdb.define_package("shop").unwrap();
    let item = mdb.define_class(pkg, "Item", &[]).unwrap();
    mdb.define_feature(item, "name", FeatureKind::Attribute, false)
        .unwrap();
    mdb.define_feature(item, "price", FeatureKind::Attribute, false)
        .unwrap();
    mdb.define_feature(item, "parts", FeatureKind::Containment, true)
        .unwrap();
    mdb
}

/// Route runtime logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Runtime over [`shop_mdb`] with a small poll interval.
pub fn runtime_with(config: RuntimeConfig) -> Runtime {
    Runtime::new(Box::new(shop_mdb()), config).unwrap()
}

/// Runtime with default configuration apart from fast polling.
pub fn runtime() -> Runtime {
    let mut config = RuntimeConfig::default();
    config.calls.poll_interval_ms = 5;
    config.calls.output_buffer_ms = 5;
    runtime_with(config)
}

/// Create an `Item` named `name` and return its handle.
pub fn new_item(runtime: &Runtime, name: &str) -> ObjId {
    let r = runtime
        .exec_text(&format!("CRN shop Item 1 ((name,'{}'),)", name), None)
        .unwrap();
    assert!(r.is_ok(), "{:?}", r);
    r.value().and_then(Value::as_obj).unwrap()
}

/// Current value of `feature` on `id`.
pub fn read(runtime: &Runtime, id: ObjId, feature: &str) -> Value {
    runtime.engine().inspect(|mdb| mdb.get(id, feature).unwrap())
}

/// Record every event delivered to `session` (all events when `None`).
pub fn record(runtime: &Runtime, session: Option<&str>) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    runtime.subscribe(session, Arc::new(move |e: &Event| sink.lock().push(e.clone())));
    seen
}
