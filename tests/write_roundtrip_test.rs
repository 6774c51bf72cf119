//! Digital write round-trip: a command frame streamed from the cluster is
//! applied to the vendor and re-emitted as an acknowledged state sample
//! within one state period.

mod common;

use common::*;
use daqd::daq::DaqFactory;
use daqd::task::{Command, Factory};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_digital_write_round_trip() {
    let h = harness();
    let factory = DaqFactory::new(Arc::new(h.daq.clone()), 1);

    let (task, ok) = factory.configure_task(&h.ctx, &write_spec(31));
    assert!(ok);
    let mut task = task.expect("write task configured");

    task.exec(&Command {
        task: 31,
        command: "start".into(),
        key: None,
        args: Value::Null,
    });

    // The control pipeline opens its command streamer asynchronously;
    // republish until the sink has applied the command.
    assert!(await_until(Duration::from_secs(2), || {
        publish_do_cmd(&h.cluster, 1);
        h.daq
            .sessions()
            .first()
            .is_some_and(|s| !s.digital_writes().is_empty())
    }));

    let sessions = h.daq.sessions();
    assert_eq!(sessions[0].digital_writes()[0], vec![1]);

    // The state mirror must re-emit the acknowledged value promptly (state
    // rate is 20 Hz, so well within a second).
    assert!(await_until(Duration::from_secs(1), || {
        h.cluster
            .frames_for(DO_STATE_CH)
            .iter()
            .any(|f| f.get(DO_STATE_CH).and_then(|s| s.uint8()) == Some(&[1u8][..]))
    }));

    // State frames pair every sample with a one-timestamp index column.
    let state_frames = h.cluster.frames_for(DO_STATE_CH);
    let acked = state_frames
        .iter()
        .find(|f| f.get(DO_STATE_CH).and_then(|s| s.uint8()) == Some(&[1u8][..]))
        .expect("acknowledged state frame");
    assert!(acked.is_aligned());
    assert_eq!(acked.get(DO_TIME_CH).unwrap().timestamps().unwrap().len(), 1);

    // Drive the line back low and observe the mirror follow.
    assert!(await_until(Duration::from_secs(2), || {
        publish_do_cmd(&h.cluster, 0);
        h.cluster
            .frames_for(DO_STATE_CH)
            .last()
            .and_then(|f| f.get(DO_STATE_CH).and_then(|s| s.uint8().map(|v| v.to_vec())))
            == Some(vec![0])
    }));

    task.stop();
}

#[test]
fn test_mirror_ticks_without_commands() {
    let h = harness();
    let factory = DaqFactory::new(Arc::new(h.daq.clone()), 1);
    let (task, _) = factory.configure_task(&h.ctx, &write_spec(32));
    let mut task = task.expect("configured");

    task.exec(&Command {
        task: 32,
        command: "start".into(),
        key: None,
        args: Value::Null,
    });

    // With no command traffic at all, the 20 Hz periodic tick still emits
    // liveness samples of the initial logic-low state.
    assert!(await_until(Duration::from_secs(2), || {
        h.cluster.frames_for(DO_STATE_CH).len() >= 3
    }));
    let frames = h.cluster.frames_for(DO_STATE_CH);
    assert!(frames
        .iter()
        .all(|f| f.get(DO_STATE_CH).and_then(|s| s.uint8()) == Some(&[0u8][..])));

    task.stop();
}
