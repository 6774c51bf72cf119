//! Digital output sink and its state mirror.
//!
//! The sink ingests command frames, maps each command column to its
//! position in the pre-configured channel order, writes the assembled byte
//! buffer to the vendor, and on success installs the acknowledged values
//! into the state mirror. The mirror is itself a [`Source`]: an acquisition
//! pipeline samples it at the state rate, and its condition variable is
//! signalled on every successful command so acknowledgements are emitted
//! promptly in addition to the periodic tick.

use crate::cluster::{ChannelKey, TaskSpec};
use crate::config::Parser;
use crate::errors::{DriverError, Result};
use crate::hardware::DeviceSession;
use crate::pipeline::{Sink, Source};
use crate::task::{Context, State};
use crate::telem::{Frame, Rate, Series, TimeStamp};
use parking_lot::{Condvar, Mutex};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// One digital output line with its command and state channels.
#[derive(Clone, Debug)]
pub struct OutputChannel {
    /// Physical line name, e.g. `"Dev1/port0/line2"`.
    pub line: String,
    pub cmd_key: ChannelKey,
    pub state_key: ChannelKey,
}

#[derive(Clone, Debug)]
pub struct WriterTaskConfig {
    pub device_key: String,
    pub device_name: String,
    pub task_name: String,
    pub task_key: crate::cluster::TaskKey,
    pub state_rate: u64,
    pub channels: Vec<OutputChannel>,
    pub state_index_key: ChannelKey,
}

struct StateCore {
    values: Mutex<BTreeMap<ChannelKey, u8>>,
    changed: Condvar,
    period: Duration,
    index_key: ChannelKey,
}

impl StateCore {
    fn snapshot(&self, values: &BTreeMap<ChannelKey, u8>) -> Frame {
        let mut frame = Frame::with_capacity(values.len() + 1);
        frame.push(self.index_key, vec![TimeStamp::now()]);
        for (&key, &value) in values.iter() {
            frame.push(key, Series::Uint8(vec![value]));
        }
        frame
    }

    fn update(&self, modified: &[(ChannelKey, u8)]) {
        let mut values = self.values.lock();
        for &(key, value) in modified {
            values.insert(key, value);
        }
        self.changed.notify_one();
    }
}

/// Emits the commanded output states as one-sample frames: periodically at
/// the state rate, and promptly after every successful command.
pub struct StateSource {
    core: Arc<StateCore>,
}

impl Source for StateSource {
    fn channel_keys(&self) -> Vec<ChannelKey> {
        let values = self.core.values.lock();
        let mut keys = Vec::with_capacity(values.len() + 1);
        keys.push(self.core.index_key);
        keys.extend(values.keys().copied());
        keys
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        let mut values = self.core.values.lock();
        self.core.changed.wait_for(&mut values, self.core.period);
        Ok(self.core.snapshot(&values))
    }
}

pub struct DigitalWriteSink {
    ctx: Arc<Context>,
    config: WriterTaskConfig,
    session: Arc<dyn DeviceSession>,
    state: Arc<StateCore>,
    buffer: Vec<u8>,
}

impl DigitalWriteSink {
    /// Parses the config blob, creates the vendor output lines, and builds
    /// the state mirror initialized to logic low. Returns the sink together
    /// with the mirror source that shares its state map.
    pub fn configure(
        ctx: &Arc<Context>,
        session: Arc<dyn DeviceSession>,
        spec: &TaskSpec,
    ) -> Result<(DigitalWriteSink, StateSource)> {
        let mut parser = Parser::new(&spec.config);
        let state_rate: u64 = parser.required("state_rate");
        let device_key: String = parser.required("device");
        if state_rate == 0 {
            parser.record("state_rate", "state rate must be positive");
        }
        let device_name = match ctx.client().retrieve_device(&device_key) {
            Ok(device) => device.location,
            Err(err) => {
                parser.record("device", format!("failed to retrieve device: {err}"));
                String::new()
            }
        };
        let mut channels = Vec::new();
        parser.iter("channels", |cp| {
            let port: u64 = cp.required("port");
            let line: u64 = cp.required("line");
            channels.push(OutputChannel {
                line: format!("{device_name}/port{port}/line{line}"),
                cmd_key: cp.required("cmd_channel"),
                state_key: cp.required("state_channel"),
            });
        });
        if channels.is_empty() {
            parser.record("channels", "at least one channel is required");
        }
        if !parser.ok() {
            let details = parser.error_json();
            error!("failed to parse configuration for {}: {details}", spec.name);
            ctx.set_state(State::error(spec.key, details.clone()));
            return Err(DriverError::Configuration(details.to_string()));
        }

        // The state index comes from the first state channel's descriptor;
        // all state channels of one task share an index.
        let state_index_key = match ctx.client().retrieve_channel(channels[0].state_key) {
            Ok(info) => info.index,
            Err(err) => {
                ctx.set_state(State::error(spec.key, json!({ "message": err.to_string() })));
                return Err(DriverError::Configuration(format!(
                    "failed to retrieve state channel {}: {err}",
                    channels[0].state_key
                )));
            }
        };

        for channel in &channels {
            if let Err(err) = session.add_digital_output(&channel.line) {
                ctx.set_state(State::error(spec.key, json!({ "message": err.to_string() })));
                return Err(err);
            }
        }

        let mut values = BTreeMap::new();
        for channel in &channels {
            values.insert(channel.state_key, 0u8);
        }
        let core = Arc::new(StateCore {
            values: Mutex::new(values),
            changed: Condvar::new(),
            period: Rate(state_rate as f64).period().as_duration(),
            index_key: state_index_key,
        });

        let config = WriterTaskConfig {
            device_key,
            device_name,
            task_name: spec.name.clone(),
            task_key: spec.key,
            state_rate,
            channels: channels.clone(),
            state_index_key,
        };
        info!("configured digital write task {}", config.task_name);
        let buffer = vec![0u8; channels.len()];
        Ok((
            DigitalWriteSink {
                ctx: Arc::clone(ctx),
                config,
                session,
                state: Arc::clone(&core),
                buffer,
            },
            StateSource { core },
        ))
    }
}

impl Sink for DigitalWriteSink {
    fn start(&mut self) -> Result<()> {
        if let Err(err) = self.session.start() {
            self.ctx.set_state(State::error(
                self.config.task_key,
                json!({ "message": err.to_string() }),
            ));
            return Err(err);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.session.stop()
    }

    fn write(&mut self, frame: Frame) -> Result<()> {
        let mut modified = Vec::new();
        for (key, series) in frame.iter() {
            let Some(position) = self
                .config
                .channels
                .iter()
                .position(|c| c.cmd_key == key)
            else {
                continue;
            };
            let Some(value) = series.uint8().and_then(|v| v.first().copied()) else {
                warn!(
                    "ignoring non-u8 command column {key} for task {}",
                    self.config.task_name
                );
                continue;
            };
            self.buffer[position] = value;
            modified.push((self.config.channels[position].state_key, value));
        }
        if modified.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.session.write_digital(&self.buffer) {
            error!(
                "failed while writing digital data for task {}: {err}",
                self.config.task_name
            );
            self.ctx.set_state(State::error(
                self.config.task_key,
                json!({ "message": err.to_string() }),
            ));
            return Err(err);
        }
        self.state.update(&modified);
        Ok(())
    }

    fn cmd_channel_keys(&self) -> Vec<ChannelKey> {
        self.config.channels.iter().map(|c| c.cmd_key).collect()
    }

    fn state_channel_keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> =
            self.config.channels.iter().map(|c| c.state_key).collect();
        keys.push(self.config.state_index_key);
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockCluster;
    use crate::cluster::{Client, Device};
    use crate::hardware::mock::MockDaq;
    use crate::hardware::Daq;
    use crate::telem::DataType;
    use std::time::Instant;

    const CONFIG: &str = r#"{
        "state_rate": 20,
        "device": "dev-1",
        "channels": [
            {"port": 0, "line": 0, "cmd_channel": 7, "state_channel": 17}
        ]
    }"#;

    fn fixture() -> (MockCluster, Arc<Context>, MockDaq) {
        let cluster = MockCluster::new();
        cluster.add_index_channel(100, crate::task::TASK_STATE_CHANNEL);
        cluster.add_index_channel(18, "do_state_time");
        cluster.add_data_channel(7, "do_cmd", DataType::Uint8, 18);
        cluster.add_data_channel(17, "do_state", DataType::Uint8, 18);
        cluster
            .create_device(&Device {
                key: "dev-1".into(),
                rack: 1,
                name: "card".into(),
                make: "acme".into(),
                model: "x-series".into(),
                location: "Dev1".into(),
            })
            .unwrap();
        let ctx = Context::new(Arc::new(cluster.clone()));
        (cluster, ctx, MockDaq::new())
    }

    fn configure(ctx: &Arc<Context>, daq: &MockDaq) -> (DigitalWriteSink, StateSource) {
        let session = daq.open_session().unwrap();
        DigitalWriteSink::configure(
            ctx,
            session,
            &TaskSpec {
                key: 13,
                name: "write test".into(),
                task_type: super::super::DIGITAL_WRITE_TYPE.into(),
                config: CONFIG.into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_channel_key_accessors() {
        let (_cluster, ctx, daq) = fixture();
        let (sink, state) = configure(&ctx, &daq);
        assert_eq!(sink.cmd_channel_keys(), vec![7]);
        assert_eq!(sink.state_channel_keys(), vec![17, 18]);
        // Mirror column order: index first, then state keys.
        assert_eq!(state.channel_keys(), vec![18, 17]);
    }

    #[test]
    fn test_write_updates_vendor_and_mirror() {
        let (_cluster, ctx, daq) = fixture();
        let (mut sink, mut state) = configure(&ctx, &daq);
        sink.start().unwrap();

        let mut cmd = Frame::new();
        cmd.push(7, vec![1u8]);
        sink.write(cmd).unwrap();

        assert_eq!(daq.sessions()[0].digital_writes(), vec![vec![1]]);
        let frame = state.read().unwrap();
        assert_eq!(frame.get(17).unwrap().uint8(), Some(&[1u8][..]));
        assert_eq!(frame.get(18).unwrap().timestamps().unwrap().len(), 1);
        assert!(frame.is_aligned());
    }

    #[test]
    fn test_mirror_wakes_promptly_on_command() {
        let (_cluster, ctx, daq) = fixture();
        // 20 Hz state rate: a periodic tick alone takes 50ms.
        let (mut sink, mut state) = configure(&ctx, &daq);
        sink.start().unwrap();

        let handle = std::thread::spawn(move || {
            let started = Instant::now();
            let frame = state.read().unwrap();
            (started.elapsed(), frame)
        });
        std::thread::sleep(Duration::from_millis(10));
        let mut cmd = Frame::new();
        cmd.push(7, vec![1u8]);
        sink.write(cmd).unwrap();

        let (elapsed, frame) = handle.join().unwrap();
        assert!(elapsed < Duration::from_millis(45));
        assert_eq!(frame.get(17).unwrap().uint8(), Some(&[1u8][..]));
    }

    #[test]
    fn test_unknown_columns_are_ignored() {
        let (_cluster, ctx, daq) = fixture();
        let (mut sink, _state) = configure(&ctx, &daq);
        sink.start().unwrap();
        let mut cmd = Frame::new();
        cmd.push(99, vec![1u8]);
        sink.write(cmd).unwrap();
        assert!(daq.sessions()[0].digital_writes().is_empty());
    }
}
