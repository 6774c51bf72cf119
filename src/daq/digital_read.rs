//! Digital input source.
//!
//! Same acquirer/consumer split as the analog source. With no hardware
//! timing source configured the vendor task is software-timed: reads return
//! immediately and the acquirer paces itself with a sleep per stream
//! period, so `t0`/`tf` bracket only the vendor call latency.

use super::{
    assemble_frame, parse_reader_config, resolve_index_channels, Payload, ReadFlavor,
    ReaderConfig, SampleBatch,
};
use crate::cluster::{ChannelKey, TaskSpec};
use crate::config::Parser;
use crate::errors::{DriverError, Result};
use crate::hardware::DeviceSession;
use crate::pipeline::Source;
use crate::queue::BoundedQueue;
use crate::task::{Context, State};
use crate::telem::{Frame, Rate, TimeStamp};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

pub struct DigitalReadSource {
    ctx: Arc<Context>,
    config: ReaderConfig,
    session: Arc<dyn DeviceSession>,
    queue: Arc<BoundedQueue<SampleBatch>>,
    running: Arc<AtomicBool>,
    ok: Arc<AtomicBool>,
    acquirer: Option<JoinHandle<()>>,
}

impl DigitalReadSource {
    pub fn configure(
        ctx: &Arc<Context>,
        session: Arc<dyn DeviceSession>,
        spec: &TaskSpec,
    ) -> Result<Self> {
        let mut parser = Parser::new(&spec.config);
        let mut config = parse_reader_config(ctx.client(), spec, &mut parser, ReadFlavor::Digital);
        if !parser.ok() {
            let details = parser.error_json();
            error!(
                "failed to parse configuration for {}: {details}",
                config.task_name
            );
            ctx.set_state(State::error(spec.key, details.clone()));
            return Err(DriverError::Configuration(details.to_string()));
        }
        if let Err(err) = resolve_index_channels(ctx.client(), &mut config.channels) {
            ctx.set_state(State::error(spec.key, json!({ "message": err.to_string() })));
            return Err(err);
        }
        for channel in config.data_channels() {
            if let Err(err) = session.add_digital_input(&channel.name) {
                ctx.set_state(State::error(spec.key, json!({ "message": err.to_string() })));
                return Err(err);
            }
        }
        if config.timing_source != "none" {
            if let Err(err) =
                session.cfg_sample_clock(&config.timing_source, config.sample_rate as f64)
            {
                ctx.set_state(State::error(spec.key, json!({ "message": err.to_string() })));
                return Err(err);
            }
        }
        info!("configured digital read task {}", config.task_name);
        Ok(DigitalReadSource {
            ctx: Arc::clone(ctx),
            config,
            session,
            queue: Arc::new(BoundedQueue::new(super::analog_read::SAMPLE_QUEUE_CAPACITY)),
            running: Arc::new(AtomicBool::new(false)),
            ok: Arc::new(AtomicBool::new(true)),
            acquirer: None,
        })
    }
}

impl Source for DigitalReadSource {
    fn channel_keys(&self) -> Vec<ChannelKey> {
        self.config.channel_keys()
    }

    fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if !self.ok.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            warn!(
                "not starting digital read task {}: requires reconfigure",
                self.config.task_name
            );
            return Ok(());
        }
        if let Err(err) = self.session.start() {
            self.running.store(false, Ordering::SeqCst);
            self.ok.store(false, Ordering::SeqCst);
            self.ctx.set_state(State::error(
                self.config.task_key,
                json!({ "message": err.to_string() }),
            ));
            return Err(err);
        }

        let session = Arc::clone(&self.session);
        let queue = Arc::clone(&self.queue);
        let running = Arc::clone(&self.running);
        let ok = Arc::clone(&self.ok);
        let ctx = Arc::clone(&self.ctx);
        let task_key = self.config.task_key;
        let task_name = self.config.task_name.clone();
        let n = self.config.samples_per_channel();
        let lanes = self.config.data_channel_count();
        let software_paced = self.config.timing_source == "none";
        let period = Rate(self.config.stream_rate as f64).period().as_duration();
        self.acquirer = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let mut buf = vec![0u8; lanes * n];
                let t0 = TimeStamp::now();
                match session.read_digital(n, &mut buf) {
                    Ok(read) => {
                        let tf = TimeStamp::now();
                        queue.enqueue(SampleBatch {
                            payload: Payload::Digital(buf),
                            t0,
                            tf,
                            samples_per_channel: read.min(n),
                            stride: n,
                        });
                    }
                    Err(err) => {
                        error!("failed while reading digital data for task {task_name}: {err}");
                        ok.store(false, Ordering::SeqCst);
                        ctx.set_state(State::error(
                            task_key,
                            json!({ "message": err.to_string() }),
                        ));
                        break;
                    }
                }
                if software_paced {
                    std::thread::sleep(period);
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.queue.reset();
        if let Some(acquirer) = self.acquirer.take() {
            if acquirer.join().is_err() {
                error!("acquirer for task {} panicked", self.config.task_name);
            }
        }
        self.session.stop()?;
        self.queue.reset();
        info!("stopped digital read task {}", self.config.task_name);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.ok.load(Ordering::SeqCst) {
            return Err(DriverError::CriticalHardware(format!(
                "digital read task {} requires reconfigure",
                self.config.task_name
            )));
        }
        match self.queue.dequeue() {
            Some(batch) => Ok(assemble_frame(&self.config.channels, &batch)),
            None => Err(DriverError::TemporaryHardware(
                "no data available to read".into(),
            )),
        }
    }

    fn stopped_with_err(&mut self, err: &DriverError) {
        self.ok.store(false, Ordering::SeqCst);
        self.ctx.set_state(State::error(
            self.config.task_key,
            json!({ "message": err.to_string() }),
        ));
    }
}
