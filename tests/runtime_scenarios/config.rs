//! Configuration Tests
//!
//! Runtimes built from `modelbus.toml` files.

use std::sync::Arc;

use crate::actions::{CountingRunner, COUNT_SCRIPT};
use crate::common::*;
use modelbus::{Error, Runtime, RuntimeConfig, CONFIG_FILE_NAME};
use tempfile::TempDir;

#[test]
fn default_file_builds_runtime() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    RuntimeConfig::write_default_if_missing(&path).unwrap();
    let runtime = Runtime::from_config_file(Box::new(shop_mdb()), &path).unwrap();
    assert_eq!(runtime.config(), &RuntimeConfig::default());
}

#[test]
fn custom_file_sets_capacity_and_actions() {
    let dir = TempDir::new().unwrap();
    let scripts = dir.path().join("actions");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::write(scripts.join("count.py"), COUNT_SCRIPT).unwrap();

    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        format!(
            "max_changes = 2\nactions_dir = {:?}\n\n[calls]\npoll_interval_ms = 10\n",
            scripts.display().to_string()
        ),
    )
    .unwrap();
    let runtime = Runtime::from_config_file(Box::new(shop_mdb()), &path).unwrap();
    assert_eq!(runtime.config().max_changes, 2);
    assert_eq!(runtime.config().calls.poll_interval_ms, 10);

    let report = runtime
        .import_actions(Arc::new(CountingRunner::default()))
        .unwrap();
    assert_eq!(report.imported, vec!["count".to_string()]);

    let id = new_item(&runtime, "a");
    for i in 0..4 {
        runtime
            .exec_text(&format!("SET #{} price {}", id.0, i), None)
            .unwrap();
    }
    let r = runtime.exec_text("CHG 0 0", None).unwrap();
    assert_eq!(r.value().and_then(modelbus::Value::as_list).map(<[_]>::len), Some(2));
}

#[test]
fn invalid_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "[calls]\npoll_interval_ms = 0\n").unwrap();
    let err = Runtime::from_config_file(Box::new(shop_mdb()), &path).unwrap_err();
    assert!(matches!(err, Error::Config { .. }));
}

#[test]
fn config_roundtrips_through_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    let mut config = RuntimeConfig::default();
    config.calls.default_timeout_ms = 250;
    config.write_to_file(&path).unwrap();
    let runtime = Runtime::from_config_file(Box::new(shop_mdb()), &path).unwrap();
    assert_eq!(runtime.config().calls.default_timeout_ms, 250);
}
