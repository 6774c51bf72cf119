//! Shared fixture for the integration suites: a mock cluster pre-populated
//! with the control-plane channels, one device, and the data channels the
//! scenario tasks use.
#![allow(dead_code)]

use daqd::cluster::mock::MockCluster;
use daqd::cluster::{Channel, Client, Device, TaskSpec};
use daqd::hardware::mock::MockDaq;
use daqd::task::Context;
use daqd::telem::{DataType, Frame, Series};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TASK_SET_CH: u32 = 1;
pub const TASK_DELETE_CH: u32 = 2;
pub const TASK_CMD_CH: u32 = 3;
pub const TASK_STATE_CH: u32 = 4;
pub const HEARTBEAT_CH: u32 = 5;

pub const AI_DATA_CH: u32 = 42;
pub const AI_TIME_CH: u32 = 43;
pub const DI_DATA_CH: u32 = 7;
pub const DI_TIME_CH: u32 = 8;
pub const DO_CMD_CH: u32 = 16;
pub const DO_STATE_CH: u32 = 17;
pub const DO_TIME_CH: u32 = 18;

pub struct Harness {
    pub cluster: MockCluster,
    pub daq: MockDaq,
    pub ctx: Arc<Context>,
}

/// Installs a log subscriber honoring `RUST_LOG` once per test binary, so
/// failing scenarios can be rerun with driver logs visible.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness() -> Harness {
    init_tracing();
    let cluster = MockCluster::new();
    cluster.add_rack(1, "rack-1");

    let control = [
        (TASK_SET_CH, "sy_task_set", DataType::Uint64),
        (TASK_DELETE_CH, "sy_task_delete", DataType::Uint64),
        (TASK_CMD_CH, "sy_task_cmd", DataType::String),
        (TASK_STATE_CH, "sy_task_state", DataType::String),
        (HEARTBEAT_CH, "sy_rack_heartbeat", DataType::Uint64),
    ];
    for (key, name, data_type) in control {
        cluster.add_channel(Channel {
            key,
            name: name.to_string(),
            data_type,
            index: 0,
            is_index: false,
        });
    }

    cluster.add_index_channel(AI_TIME_CH, "ai_time");
    cluster.add_data_channel(AI_DATA_CH, "ai_0", DataType::Float32, AI_TIME_CH);
    cluster.add_index_channel(DI_TIME_CH, "di_time");
    cluster.add_data_channel(DI_DATA_CH, "di_0", DataType::Uint8, DI_TIME_CH);
    cluster.add_index_channel(DO_TIME_CH, "do_state_time");
    cluster.add_data_channel(DO_CMD_CH, "do_cmd", DataType::Uint8, DO_TIME_CH);
    cluster.add_data_channel(DO_STATE_CH, "do_state", DataType::Uint8, DO_TIME_CH);

    cluster
        .create_device(&Device {
            key: "dev-1".into(),
            rack: 1,
            name: "card".into(),
            make: "acme".into(),
            model: "x-series".into(),
            location: "Dev1".into(),
        })
        .expect("register device");

    let ctx = Context::new(Arc::new(cluster.clone()));
    Harness {
        cluster,
        daq: MockDaq::new(),
        ctx,
    }
}

pub fn analog_spec(key: u64) -> TaskSpec {
    TaskSpec {
        key,
        name: format!("analog {key}"),
        task_type: "daq_analog_read".into(),
        config: r#"{
            "sample_rate": 1000,
            "stream_rate": 100,
            "device": "dev-1",
            "channels": [
                {"port": 0, "channel": 42, "type": "ai_voltage", "enabled": true}
            ]
        }"#
        .into(),
    }
}

pub fn digital_spec(key: u64) -> TaskSpec {
    TaskSpec {
        key,
        name: format!("digital {key}"),
        task_type: "daq_digital_read".into(),
        config: r#"{
            "sample_rate": 1000,
            "stream_rate": 1000,
            "device": "dev-1",
            "channels": [
                {"port": 0, "line": 0, "channel": 7}
            ]
        }"#
        .into(),
    }
}

pub fn write_spec(key: u64) -> TaskSpec {
    TaskSpec {
        key,
        name: format!("write {key}"),
        task_type: "daq_digital_write".into(),
        config: r#"{
            "state_rate": 20,
            "device": "dev-1",
            "channels": [
                {"port": 0, "line": 0, "cmd_channel": 16, "state_channel": 17}
            ]
        }"#
        .into(),
    }
}

/// Polls `predicate` every few milliseconds until it holds or the timeout
/// elapses.
pub fn await_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

pub fn publish_task_set(cluster: &MockCluster, keys: &[u64]) {
    let mut frame = Frame::new();
    frame.push(TASK_SET_CH, Series::Uint64(keys.to_vec()));
    cluster.publish(frame);
}

pub fn publish_task_delete(cluster: &MockCluster, keys: &[u64]) {
    let mut frame = Frame::new();
    frame.push(TASK_DELETE_CH, Series::Uint64(keys.to_vec()));
    cluster.publish(frame);
}

pub fn publish_task_cmd(cluster: &MockCluster, raw: &str) {
    let mut frame = Frame::new();
    frame.push(TASK_CMD_CH, Series::Str(vec![raw.to_string()]));
    cluster.publish(frame);
}

pub fn publish_do_cmd(cluster: &MockCluster, value: u8) {
    let mut frame = Frame::new();
    frame.push(DO_CMD_CH, Series::Uint8(vec![value]));
    cluster.publish(frame);
}
