//! Cluster-streamer → sink pipeline.

use super::Sink;
use crate::breaker::{self, Breaker, BreakerHandle};
use crate::cluster::{Streamer, StreamerConfig, TaskKey};
use crate::errors::DriverError;
use crate::task::{Context, State};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

enum Exit {
    Stopped,
    Transport(DriverError),
    Fatal(DriverError),
}

/// Runs the receive/apply loop on a dedicated worker thread: start the sink,
/// open a streamer over the sink's command channels, then apply every
/// received frame as one atomic command batch. The open streamer is parked
/// in a shared slot so `stop` can close its send half and unblock the
/// worker's read.
pub struct Control {
    ctx: Arc<Context>,
    task: TaskKey,
    streamer_config: StreamerConfig,
    breaker_config: breaker::Config,
    sink: Option<Box<dyn Sink>>,
    running: Arc<AtomicBool>,
    live: Arc<Mutex<Option<Arc<dyn Streamer>>>>,
    worker: Option<JoinHandle<Box<dyn Sink>>>,
    breaker_handle: Option<BreakerHandle>,
}

impl Control {
    pub fn new(
        ctx: Arc<Context>,
        task: TaskKey,
        streamer_config: StreamerConfig,
        sink: Box<dyn Sink>,
        breaker_config: breaker::Config,
    ) -> Self {
        Control {
            ctx,
            task,
            streamer_config,
            breaker_config,
            sink: Some(sink),
            running: Arc::new(AtomicBool::new(false)),
            live: Arc::new(Mutex::new(None)),
            worker: None,
            breaker_handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let sink = match self.sink.take() {
            Some(sink) => sink,
            None => {
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        };
        let mut breaker = Breaker::new(self.breaker_config.clone());
        breaker.start();
        self.breaker_handle = Some(breaker.handle());
        let ctx = Arc::clone(&self.ctx);
        let task = self.task;
        let config = self.streamer_config.clone();
        let running = Arc::clone(&self.running);
        let live = Arc::clone(&self.live);
        self.worker = Some(thread::spawn(move || {
            run(ctx, task, config, sink, running, live, breaker)
        }));
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(streamer) = self.live.lock().as_ref() {
            streamer.close_send();
        }
        if let Some(handle) = self.breaker_handle.take() {
            handle.interrupt();
        }
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(sink) => self.sink = Some(sink),
                Err(_) => error!("control worker panicked; sink lost"),
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    ctx: Arc<Context>,
    task: TaskKey,
    config: StreamerConfig,
    mut sink: Box<dyn Sink>,
    running: Arc<AtomicBool>,
    live: Arc<Mutex<Option<Arc<dyn Streamer>>>>,
    mut breaker: Breaker,
) -> Box<dyn Sink> {
    while running.load(Ordering::SeqCst) {
        if let Err(err) = sink.start() {
            report(&ctx, task, &err);
            break;
        }
        let streamer = match ctx.client().open_streamer(config.clone()) {
            Ok(streamer) => streamer,
            Err(err) => {
                let _ = sink.stop();
                if err.is_unreachable() && breaker.wait(&err) {
                    continue;
                }
                report(&ctx, task, &err);
                break;
            }
        };
        *live.lock() = Some(Arc::clone(&streamer));
        debug!("control pipeline for task {task} operational");
        breaker.reset();
        let exit = run_inner(sink.as_mut(), streamer.as_ref(), &running);
        live.lock().take();
        let _ = streamer.close();
        let _ = sink.stop();
        match exit {
            Exit::Stopped => break,
            Exit::Transport(err) => {
                if breaker.wait(&err) {
                    continue;
                }
                report(&ctx, task, &err);
                break;
            }
            Exit::Fatal(err) => {
                error!("control pipeline for task {task} failed: {err}");
                report(&ctx, task, &err);
                break;
            }
        }
    }
    info!("control pipeline for task {task} exiting");
    sink
}

fn run_inner(sink: &mut dyn Sink, streamer: &dyn Streamer, running: &AtomicBool) -> Exit {
    while running.load(Ordering::SeqCst) {
        let frame = match streamer.read() {
            Ok(frame) => frame,
            Err(err) if err.is_stream_closed() => return Exit::Stopped,
            Err(err) if err.is_unreachable() => return Exit::Transport(err),
            Err(err) => return Exit::Fatal(err),
        };
        if let Err(err) = sink.write(frame) {
            return Exit::Fatal(err);
        }
    }
    Exit::Stopped
}

fn report(ctx: &Context, task: TaskKey, err: &DriverError) {
    ctx.set_state(State::error(task, json!({ "message": err.to_string() })));
}
