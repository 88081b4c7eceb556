use chrono::Utc;
use flexboard_agent::error::AgentError;
use flexboard_agent::query::QuerySpec;
use flexboard_agent::snapshot::{
    ApplyOutcome, ConfigSnapshot, ConfigSource, ConfigStore, WidgetConfig, WidgetMap,
};
use serde_json::json;
use std::sync::Arc;

fn widgets(pairs: &[(&str, &str)]) -> WidgetMap {
    pairs
        .iter()
        .map(|(id, sql)| (id.to_string(), WidgetConfig::new(*sql, "kpi")))
        .collect()
}

fn snapshot(version: u64, pairs: &[(&str, &str)]) -> ConfigSnapshot {
    ConfigSnapshot {
        version,
        widgets: widgets(pairs),
    }
}

#[test]
fn test_apply_activates_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("widget-config.json");
    let store = ConfigStore::new(&path);

    let outcome = store.apply(snapshot(5, &[("kpi1", "SELECT 1")]), Utc::now());
    assert!(matches!(
        outcome,
        ApplyOutcome::Applied {
            version: 5,
            persist_error: None
        }
    ));

    let active = store.current().unwrap();
    assert_eq!(active.version(), 5);
    assert_eq!(active.source, ConfigSource::ControlPlane);
    assert!(active.synced_at.is_some());

    // The file holds the widget map only
    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk, json!({"kpi1": {"query": "SELECT 1", "type": "kpi"}}));
}

#[test]
fn test_version_never_decreases() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("widget-config.json"));

    store.apply(snapshot(5, &[("a", "SELECT 1")]), Utc::now());
    let older = store.apply(snapshot(3, &[("b", "SELECT 2")]), Utc::now());
    assert!(matches!(
        older,
        ApplyOutcome::Stale {
            offered: 3,
            current: 5
        }
    ));

    let same = store.apply(snapshot(5, &[("c", "SELECT 3")]), Utc::now());
    assert!(matches!(same, ApplyOutcome::Stale { .. }));

    assert_eq!(store.version(), 5);
    assert!(store.current().unwrap().widget("a").is_ok());
    assert_eq!(store.read_local().unwrap(), widgets(&[("a", "SELECT 1")]));
}

#[test]
fn test_persist_failure_keeps_snapshot_active() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the parent directory should be
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let store = ConfigStore::new(blocker.join("widget-config.json"));

    let outcome = store.apply(snapshot(2, &[("kpi1", "SELECT 1")]), Utc::now());
    match outcome {
        ApplyOutcome::Applied {
            version,
            persist_error,
        } => {
            assert_eq!(version, 2);
            assert!(persist_error.is_some());
        }
        other => panic!("expected Applied, got {:?}", other),
    }
    assert_eq!(store.version(), 2);
}

#[test]
fn test_restart_resolves_from_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("widget-config.json");

    let first = ConfigStore::new(&path);
    first.apply(snapshot(7, &[("w1", "SELECT 42")]), Utc::now());
    drop(first);

    let restarted = ConfigStore::new(&path);
    assert!(restarted.current().is_none());

    let active = restarted.resolve().unwrap();
    assert_eq!(active.source, ConfigSource::LocalFile);
    assert_eq!(active.version(), 0);
    assert!(active.synced_at.is_none());
    assert_eq!(active.widget("w1").unwrap().query, QuerySpec::from("SELECT 42"));
}

#[test]
fn test_local_load_never_replaces_active_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("widget-config.json");
    std::fs::write(&path, r#"{"old": {"query": "SELECT 0", "type": "kpi"}}"#).unwrap();

    let store = ConfigStore::new(&path);
    store.apply(snapshot(1, &[("new", "SELECT 1")]), Utc::now());
    let active = store.load_local().unwrap();
    assert_eq!(active.source, ConfigSource::ControlPlane);
    assert!(active.widget("new").is_ok());
}

#[test]
fn test_first_control_plane_snapshot_replaces_local_file_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("widget-config.json");
    std::fs::write(&path, r#"{"w1": {"query": "SELECT 1", "type": "kpi"}}"#).unwrap();

    let store = ConfigStore::new(&path);
    store.load_local().unwrap();
    let outcome = store.apply(snapshot(1, &[("w2", "SELECT 2")]), Utc::now());
    assert!(matches!(outcome, ApplyOutcome::Applied { version: 1, .. }));
    assert_eq!(store.current().unwrap().source, ConfigSource::ControlPlane);
}

#[test]
fn test_no_configuration_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("missing.json"));
    assert!(matches!(store.resolve(), Err(AgentError::ConfigUnavailable)));
    assert_eq!(store.version(), 0);
}

#[test]
fn test_corrupt_local_file_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("widget-config.json");
    std::fs::write(&path, "{ truncated").unwrap();
    let store = ConfigStore::new(&path);
    assert!(matches!(store.resolve(), Err(AgentError::ConfigUnavailable)));
}

#[test]
fn test_unknown_widget_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("widget-config.json"));
    store.apply(snapshot(1, &[("kpi1", "SELECT 1")]), Utc::now());

    let err = store.current().unwrap().widget("unknown-widget").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Widget configuration not found for: unknown-widget"
    );
}

#[test]
fn test_readers_keep_captured_snapshot_across_swap() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("widget-config.json"));
    store.apply(snapshot(1, &[("w", "SELECT 1")]), Utc::now());

    let captured = store.current().unwrap();
    store.apply(snapshot(2, &[("w", "SELECT 2")]), Utc::now());

    assert_eq!(captured.version(), 1);
    assert_eq!(captured.widget("w").unwrap().query, QuerySpec::from("SELECT 1"));
    assert_eq!(store.version(), 2);
    assert_eq!(Arc::strong_count(&captured), 1);
}

#[test]
fn test_persist_leaves_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::new(dir.path().join("widget-config.json"));
    for version in 1..=3 {
        store.apply(snapshot(version, &[("w", "SELECT 1")]), Utc::now());
    }
    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}
