//! Runtime tasks for DAQ hardware and the factory that configures them.

use super::{
    AnalogReadSource, DigitalReadSource, DigitalWriteSink, ScannerTask, ANALOG_READ_TYPE,
    DIGITAL_READ_TYPE, DIGITAL_WRITE_TYPE, SCAN_TYPE,
};
use crate::breaker;
use crate::cluster::{Rack, RackKey, StreamerConfig, TaskSpec, WriterConfig};
use crate::hardware::Daq;
use crate::pipeline::{Acquisition, Control, Sink, Source};
use crate::task::{Command, Context, Factory, State, Task};
use crate::telem::{TimeSpan, TimeStamp};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

fn task_breaker_config(name: &str) -> breaker::Config {
    breaker::Config {
        name: name.to_string(),
        base_interval: TimeSpan::SECOND,
        max_retries: 20,
        scale: 1.2,
    }
}

/// An input task: one acquisition pipeline pulling from a hardware source.
pub struct ReaderTask {
    ctx: Arc<Context>,
    spec: TaskSpec,
    pipe: Acquisition,
    running: bool,
}

impl ReaderTask {
    fn start(&mut self, key: Option<String>) {
        if self.running {
            return;
        }
        self.running = true;
        self.pipe.start();
        self.ctx.set_state(
            State::running(self.spec.key, json!({ "running": true })).with_key(key),
        );
        info!("started reader task {}", self.spec.name);
    }

    fn halt(&mut self, key: Option<String>) {
        if !self.running {
            return;
        }
        self.running = false;
        self.pipe.stop();
        self.ctx.set_state(
            State::success(self.spec.key, json!({ "running": false })).with_key(key),
        );
        info!("stopped reader task {}", self.spec.name);
    }
}

impl Task for ReaderTask {
    fn exec(&mut self, cmd: &Command) {
        match cmd.command.as_str() {
            "start" => self.start(cmd.key.clone()),
            "stop" => self.halt(cmd.key.clone()),
            other => error!("unknown command type for reader task: {other}"),
        }
    }

    fn stop(&mut self) {
        self.halt(None);
    }
}

/// An output task: a control pipeline applying commands to the hardware
/// sink, plus an acquisition pipeline publishing the state mirror.
pub struct WriterTask {
    ctx: Arc<Context>,
    spec: TaskSpec,
    cmd_pipe: Control,
    state_pipe: Acquisition,
    running: bool,
}

impl WriterTask {
    fn start(&mut self, key: Option<String>) {
        if self.running {
            return;
        }
        self.running = true;
        self.cmd_pipe.start();
        self.state_pipe.start();
        self.ctx.set_state(
            State::running(self.spec.key, json!({ "running": true })).with_key(key),
        );
        info!("started writer task {}", self.spec.name);
    }

    fn halt(&mut self, key: Option<String>) {
        if !self.running {
            return;
        }
        self.running = false;
        self.state_pipe.stop();
        self.cmd_pipe.stop();
        self.ctx.set_state(
            State::success(self.spec.key, json!({ "running": false })).with_key(key),
        );
        info!("stopped writer task {}", self.spec.name);
    }
}

impl Task for WriterTask {
    fn exec(&mut self, cmd: &Command) {
        match cmd.command.as_str() {
            "start" => self.start(cmd.key.clone()),
            "stop" => self.halt(cmd.key.clone()),
            other => error!("unknown command type for writer task: {other}"),
        }
    }

    fn stop(&mut self) {
        self.halt(None);
    }
}

/// Configures DAQ-card tasks (`daq_analog_read`, `daq_digital_read`,
/// `daq_digital_write`, `daq_scan`) from declarative specs. Specs of any
/// other type are silently skipped for other drivers to claim.
pub struct DaqFactory {
    daq: Arc<dyn Daq>,
    rack: RackKey,
    scan_interval: TimeSpan,
}

impl DaqFactory {
    pub fn new(daq: Arc<dyn Daq>, rack: RackKey) -> Self {
        DaqFactory {
            daq,
            rack,
            scan_interval: super::scanner::DEFAULT_SCAN_INTERVAL,
        }
    }

    pub fn with_scan_interval(mut self, interval: TimeSpan) -> Self {
        self.scan_interval = interval;
        self
    }

    fn configure_reader(
        &self,
        ctx: &Arc<Context>,
        spec: &TaskSpec,
    ) -> (Option<Box<dyn Task>>, bool) {
        let session = match self.daq.open_session() {
            Ok(session) => session,
            Err(err) => {
                ctx.set_state(State::error(spec.key, json!({ "message": err.to_string() })));
                return (None, false);
            }
        };
        let source: Box<dyn Source> = if spec.task_type == DIGITAL_READ_TYPE {
            match DigitalReadSource::configure(ctx, session, spec) {
                Ok(source) => Box::new(source),
                Err(_) => return (None, false),
            }
        } else {
            match AnalogReadSource::configure(ctx, session, spec) {
                Ok(source) => Box::new(source),
                Err(_) => return (None, false),
            }
        };
        let writer_config = WriterConfig {
            channels: source.channel_keys(),
            start: TimeStamp::now(),
            enable_auto_commit: true,
        };
        let pipe = Acquisition::new(
            Arc::clone(ctx),
            spec.key,
            writer_config,
            source,
            task_breaker_config(&spec.name),
        );
        ctx.set_state(State::success(spec.key, json!({ "running": false })));
        (
            Some(Box::new(ReaderTask {
                ctx: Arc::clone(ctx),
                spec: spec.clone(),
                pipe,
                running: false,
            })),
            true,
        )
    }

    fn configure_writer(
        &self,
        ctx: &Arc<Context>,
        spec: &TaskSpec,
    ) -> (Option<Box<dyn Task>>, bool) {
        let session = match self.daq.open_session() {
            Ok(session) => session,
            Err(err) => {
                ctx.set_state(State::error(spec.key, json!({ "message": err.to_string() })));
                return (None, false);
            }
        };
        let (sink, state_source) = match DigitalWriteSink::configure(ctx, session, spec) {
            Ok(pair) => pair,
            Err(_) => return (None, false),
        };
        let writer_config = WriterConfig {
            channels: sink.state_channel_keys(),
            start: TimeStamp::now(),
            enable_auto_commit: true,
        };
        let streamer_config = StreamerConfig {
            channels: sink.cmd_channel_keys(),
        };
        let cmd_pipe = Control::new(
            Arc::clone(ctx),
            spec.key,
            streamer_config,
            Box::new(sink),
            task_breaker_config(&spec.name),
        );
        let state_pipe = Acquisition::new(
            Arc::clone(ctx),
            spec.key,
            writer_config,
            Box::new(state_source),
            task_breaker_config(&spec.name),
        );
        ctx.set_state(State::success(spec.key, json!({ "running": false })));
        (
            Some(Box::new(WriterTask {
                ctx: Arc::clone(ctx),
                spec: spec.clone(),
                cmd_pipe,
                state_pipe,
                running: false,
            })),
            true,
        )
    }
}

impl Factory for DaqFactory {
    fn configure_task(&self, ctx: &Arc<Context>, spec: &TaskSpec) -> (Option<Box<dyn Task>>, bool) {
        match spec.task_type.as_str() {
            ANALOG_READ_TYPE | DIGITAL_READ_TYPE => self.configure_reader(ctx, spec),
            DIGITAL_WRITE_TYPE => self.configure_writer(ctx, spec),
            SCAN_TYPE => {
                let rack = Rack {
                    key: self.rack,
                    name: String::new(),
                };
                let task = ScannerTask::configure(
                    ctx,
                    Arc::clone(&self.daq),
                    &rack,
                    spec.clone(),
                    self.scan_interval,
                );
                ctx.set_state(State::success(spec.key, json!({ "running": true })));
                (Some(Box::new(task)), true)
            }
            _ => (None, true),
        }
    }

    fn configure_initial_tasks(
        &self,
        ctx: &Arc<Context>,
        rack: &Rack,
    ) -> Vec<(TaskSpec, Box<dyn Task>)> {
        let spec = ScannerTask::spec_for(0, rack);
        let task = ScannerTask::configure(
            ctx,
            Arc::clone(&self.daq),
            rack,
            spec.clone(),
            self.scan_interval,
        );
        vec![(spec, Box::new(task) as Box<dyn Task>)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockCluster;
    use crate::cluster::{Client, Device};
    use crate::hardware::mock::MockDaq;
    use crate::telem::DataType;

    fn fixture() -> (MockCluster, Arc<Context>, DaqFactory) {
        let cluster = MockCluster::new();
        cluster.add_index_channel(100, crate::task::TASK_STATE_CHANNEL);
        cluster.add_index_channel(43, "ai_time");
        cluster.add_data_channel(42, "ai_0", DataType::Float32, 43);
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
        let factory = DaqFactory::new(Arc::new(MockDaq::new()), 1);
        (cluster, ctx, factory)
    }

    fn analog_spec() -> TaskSpec {
        TaskSpec {
            key: 9,
            name: "press sensors".into(),
            task_type: ANALOG_READ_TYPE.into(),
            config: r#"{
                "sample_rate": 1000,
                "stream_rate": 100,
                "device": "dev-1",
                "channels": [{"port": 0, "channel": 42, "type": "ai_voltage"}]
            }"#
            .into(),
        }
    }

    #[test]
    fn test_configure_reader_reports_success() {
        let (cluster, ctx, factory) = fixture();
        let (task, ok) = factory.configure_task(&ctx, &analog_spec());
        assert!(ok);
        let mut task = task.unwrap();
        let last = cluster.state_records().pop().unwrap();
        assert_eq!(last["variant"], "success");
        assert_eq!(last["details"]["running"], false);
        task.stop();
    }

    #[test]
    fn test_unknown_type_is_skipped_silently() {
        let (cluster, ctx, factory) = fixture();
        let spec = TaskSpec {
            key: 9,
            name: "opc task".into(),
            task_type: "opc_read".into(),
            config: "{}".into(),
        };
        let (task, ok) = factory.configure_task(&ctx, &spec);
        assert!(ok);
        assert!(task.is_none());
        assert!(cluster.state_records().is_empty());
    }

    #[test]
    fn test_bad_config_yields_not_ok() {
        let (cluster, ctx, factory) = fixture();
        let mut spec = analog_spec();
        spec.config = r#"{"sample_rate": 100, "stream_rate": 1000, "device": "dev-1",
            "channels": [{"port": 0, "channel": 42, "type": "ai_voltage"}]}"#
            .into();
        let (task, ok) = factory.configure_task(&ctx, &spec);
        assert!(!ok);
        assert!(task.is_none());
        let last = cluster.state_records().pop().unwrap();
        assert_eq!(last["variant"], "error");
    }

    #[test]
    fn test_stop_twice_is_idempotent() {
        let (_cluster, ctx, factory) = fixture();
        let (task, _) = factory.configure_task(&ctx, &analog_spec());
        let mut task = task.unwrap();
        task.exec(&Command {
            task: 9,
            command: "start".into(),
            key: None,
            args: serde_json::Value::Null,
        });
        task.stop();
        task.stop();
    }
}
