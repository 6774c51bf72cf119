//! Task-manager reconciliation scenarios: set/delete round-trips, runtime
//! replacement, transport outages, and bad-config rejection.

mod common;

use common::*;
use daqd::breaker;
use daqd::daq::DaqFactory;
use daqd::task::Manager;
use daqd::telem::TimeSpan;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

fn fast_breaker() -> breaker::Config {
    breaker::Config {
        name: "test.manager".into(),
        base_interval: TimeSpan::from_millis(20),
        max_retries: 50,
        scale: 1.1,
    }
}

fn start_manager(h: &Harness) -> Manager {
    let factory = DaqFactory::new(Arc::new(h.daq.clone()), 1)
        .with_scan_interval(TimeSpan::from_secs(120));
    let mut manager = Manager::new(
        1,
        Arc::new(h.cluster.clone()),
        Box::new(factory),
        fast_breaker(),
    );
    manager.start().expect("manager starts");
    manager
}

fn records_for(h: &Harness, task: u64) -> Vec<Value> {
    h.cluster
        .state_records()
        .into_iter()
        .filter(|r| r["task"] == task)
        .collect()
}

fn has_variant(h: &Harness, task: u64, variant: &str) -> bool {
    records_for(h, task).iter().any(|r| r["variant"] == variant)
}

#[test]
fn test_set_start_delete_round_trip() {
    let h = harness();
    let mut manager = start_manager(&h);

    // Set: the manager pulls the spec and configures a runtime task.
    h.cluster.add_task(analog_spec(9));
    assert!(await_until(Duration::from_secs(2), || {
        publish_task_set(&h.cluster, &[9]);
        has_variant(&h, 9, "success")
    }));

    // Start: the acknowledging record is variant=running and data flows.
    publish_task_cmd(&h.cluster, r#"{"task": 9, "type": "start", "key": "c-1"}"#);
    assert!(await_until(Duration::from_secs(2), || {
        has_variant(&h, 9, "running")
    }));
    let running = records_for(&h, 9)
        .into_iter()
        .find(|r| r["variant"] == "running")
        .unwrap();
    assert_eq!(running["key"], "c-1");
    assert!(await_until(Duration::from_secs(2), || {
        !h.cluster.frames_for(AI_DATA_CH).is_empty()
    }));

    // Delete: the task disappears, its writer closes, and the manager
    // reports the teardown.
    publish_task_delete(&h.cluster, &[9]);
    assert!(await_until(Duration::from_secs(2), || {
        has_variant(&h, 9, "deleted")
    }));
    assert!(await_until(Duration::from_secs(2), || {
        h.cluster
            .writers()
            .iter()
            .filter(|(channels, _)| channels.contains(&AI_DATA_CH))
            .all(|(_, closed)| *closed)
    }));

    // Commands for the deleted key are logged and skipped, not fatal.
    publish_task_cmd(&h.cluster, r#"{"task": 9, "type": "start"}"#);
    std::thread::sleep(Duration::from_millis(50));
    manager.stop().expect("clean shutdown");
}

#[test]
fn test_reset_replaces_runtime_task() {
    let h = harness();
    let mut manager = start_manager(&h);

    h.cluster.add_task(analog_spec(9));
    assert!(await_until(Duration::from_secs(2), || {
        publish_task_set(&h.cluster, &[9]);
        !h.daq.sessions().is_empty()
    }));
    let sessions_after_first = h.daq.sessions().len();

    // Re-sending the key atomically replaces the task: a fresh hardware
    // session is opened and a fresh configure record lands.
    publish_task_set(&h.cluster, &[9]);
    assert!(await_until(Duration::from_secs(2), || {
        h.daq.sessions().len() > sessions_after_first
    }));
    assert!(await_until(Duration::from_secs(2), || {
        records_for(&h, 9)
            .iter()
            .filter(|r| r["variant"] == "success")
            .count()
            >= 2
    }));

    manager.stop().expect("clean shutdown");
}

#[test]
fn test_manager_survives_transport_outage() {
    let h = harness();
    let mut manager = start_manager(&h);

    h.cluster.add_task(analog_spec(9));
    assert!(await_until(Duration::from_secs(2), || {
        publish_task_set(&h.cluster, &[9]);
        has_variant(&h, 9, "success")
    }));
    publish_task_cmd(&h.cluster, r#"{"task": 9, "type": "start"}"#);
    assert!(await_until(Duration::from_secs(2), || {
        has_variant(&h, 9, "running")
    }));

    // Kill the transport briefly. The manager loop must ride it out behind
    // its breaker without dropping configured tasks.
    h.cluster.set_offline(true);
    std::thread::sleep(Duration::from_millis(300));
    h.cluster.set_offline(false);

    // After recovery the same runtime task still answers commands.
    assert!(await_until(Duration::from_secs(5), || {
        publish_task_cmd(&h.cluster, r#"{"task": 9, "type": "stop", "key": "c-2"}"#);
        records_for(&h, 9)
            .iter()
            .any(|r| r["variant"] == "success" && r["key"] == "c-2")
    }));

    manager.stop().expect("clean shutdown");
}

#[test]
fn test_bad_config_reports_error_and_creates_no_task() {
    let h = harness();
    let mut manager = start_manager(&h);

    let mut spec = analog_spec(14);
    spec.config = spec
        .config
        .replace("\"stream_rate\": 100", "\"stream_rate\": 2000");
    h.cluster.add_task(spec);

    assert!(await_until(Duration::from_secs(2), || {
        publish_task_set(&h.cluster, &[14]);
        has_variant(&h, 14, "error")
    }));
    let error = records_for(&h, 14)
        .into_iter()
        .find(|r| r["variant"] == "error")
        .unwrap();
    assert!(error["details"]["stream_rate"]
        .as_str()
        .unwrap()
        .contains("less than or equal to sample rate"));

    // No data writer was ever opened for the rejected task.
    assert!(!h
        .cluster
        .writers()
        .iter()
        .any(|(channels, _)| channels.contains(&AI_DATA_CH)));

    manager.stop().expect("clean shutdown");
}

#[test]
fn test_startup_configures_declared_tasks() {
    let h = harness();
    // Declared before the manager starts: configured during startup pull.
    h.cluster.add_task(analog_spec(9));
    let mut manager = start_manager(&h);

    assert!(await_until(Duration::from_secs(2), || {
        has_variant(&h, 9, "success")
    }));
    manager.stop().expect("clean shutdown");
}
