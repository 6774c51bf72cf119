//! Analog input source.
//!
//! An acquirer thread blocks in the vendor read for
//! `sample_rate / stream_rate` samples per enabled channel, brackets each
//! call with wall-clock captures, and enqueues the raw batch. The pipeline
//! thread dequeues batches in `read` and assembles frames, interpolating the
//! index series between the captures.

use super::{
    assemble_frame, parse_reader_config, resolve_index_channels, Payload, ReadFlavor,
    ReaderConfig, SampleBatch,
};
use crate::cluster::{ChannelKey, TaskSpec};
use crate::config::Parser;
use crate::errors::{DriverError, Result};
use crate::hardware::{AnalogInput, DeviceSession};
use crate::pipeline::Source;
use crate::queue::BoundedQueue;
use crate::task::{Context, State};
use crate::telem::{Frame, TimeStamp};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// How many vendor batches may pile up before the acquirer blocks and the
/// hardware is paced down. The single knob for how much downstream stall the
/// driver absorbs.
pub const SAMPLE_QUEUE_CAPACITY: usize = 64;

pub struct AnalogReadSource {
    ctx: Arc<Context>,
    config: ReaderConfig,
    session: Arc<dyn DeviceSession>,
    queue: Arc<BoundedQueue<SampleBatch>>,
    running: Arc<AtomicBool>,
    ok: Arc<AtomicBool>,
    acquirer: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AnalogReadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalogReadSource").finish_non_exhaustive()
    }
}

impl AnalogReadSource {
    /// Parses the config blob, resolves channels against the cluster, and
    /// creates the vendor channels and sample clock. Any failure is
    /// reported as a `variant=error` state record and the task is not
    /// instantiated.
    pub fn configure(
        ctx: &Arc<Context>,
        session: Arc<dyn DeviceSession>,
        spec: &TaskSpec,
    ) -> Result<Self> {
        let mut parser = Parser::new(&spec.config);
        let mut config = parse_reader_config(ctx.client(), spec, &mut parser, ReadFlavor::Analog);
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
            let input = AnalogInput {
                name: channel.name.clone(),
                kind: channel.kind.clone(),
                min_val: channel
                    .extra
                    .get("min_val")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
                max_val: channel
                    .extra
                    .get("max_val")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0),
                config: channel.extra.clone(),
            };
            if let Err(err) = session.add_analog_input(&input) {
                ctx.set_state(State::error(spec.key, json!({ "message": err.to_string() })));
                return Err(err);
            }
        }
        let timing = if config.timing_source == "none" {
            // Empty source selects the device's onboard clock.
            ""
        } else {
            config.timing_source.as_str()
        };
        if let Err(err) = session.cfg_sample_clock(timing, config.sample_rate as f64) {
            ctx.set_state(State::error(spec.key, json!({ "message": err.to_string() })));
            return Err(err);
        }
        info!("configured analog read task {}", config.task_name);
        Ok(AnalogReadSource {
            ctx: Arc::clone(ctx),
            config,
            session,
            queue: Arc::new(BoundedQueue::new(SAMPLE_QUEUE_CAPACITY)),
            running: Arc::new(AtomicBool::new(false)),
            ok: Arc::new(AtomicBool::new(true)),
            acquirer: None,
        })
    }
}

impl Source for AnalogReadSource {
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
                "not starting analog read task {}: requires reconfigure",
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
        self.acquirer = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let mut buf = vec![0.0f64; lanes * n];
                let t0 = TimeStamp::now();
                match session.read_analog(n, &mut buf) {
                    Ok(read) => {
                        let tf = TimeStamp::now();
                        queue.enqueue(SampleBatch {
                            payload: Payload::Analog(buf),
                            t0,
                            tf,
                            samples_per_channel: read.min(n),
                            stride: n,
                        });
                    }
                    Err(err) => {
                        error!("failed while reading analog data for task {task_name}: {err}");
                        ok.store(false, Ordering::SeqCst);
                        ctx.set_state(State::error(
                            task_key,
                            json!({ "message": err.to_string() }),
                        ));
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        // Unblock an acquirer stuck on a full queue before joining it.
        self.queue.reset();
        if let Some(acquirer) = self.acquirer.take() {
            if acquirer.join().is_err() {
                error!("acquirer for task {} panicked", self.config.task_name);
            }
        }
        self.session.stop()?;
        self.queue.reset();
        info!("stopped analog read task {}", self.config.task_name);
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        if !self.ok.load(Ordering::SeqCst) {
            return Err(DriverError::CriticalHardware(format!(
                "analog read task {} requires reconfigure",
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
