//! Source → cluster-writer pipeline.

use super::Source;
use crate::breaker::{self, Breaker, BreakerHandle};
use crate::cluster::{TaskKey, Writer, WriterConfig};
use crate::errors::DriverError;
use crate::task::{Context, State};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

enum Exit {
    /// Stop was requested.
    Stopped,
    /// The transport failed; retry behind the breaker.
    Transport(DriverError),
    /// The source failed for good; terminate this pipeline only.
    Fatal(DriverError),
}

/// Runs the pull/push loop on a dedicated worker thread: start the source,
/// open a writer over the source's channels, then forward frames until the
/// source fails, the transport drops, or a stop is requested. Transport
/// failures are retried behind the pipeline's breaker with the source
/// stopped in between, so hardware does not sample into the void.
pub struct Acquisition {
    ctx: Arc<Context>,
    task: TaskKey,
    writer_config: WriterConfig,
    breaker_config: breaker::Config,
    source: Option<Box<dyn Source>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<Box<dyn Source>>>,
    breaker_handle: Option<BreakerHandle>,
}

impl Acquisition {
    pub fn new(
        ctx: Arc<Context>,
        task: TaskKey,
        writer_config: WriterConfig,
        source: Box<dyn Source>,
        breaker_config: breaker::Config,
    ) -> Self {
        Acquisition {
            ctx,
            task,
            writer_config,
            breaker_config,
            source: Some(source),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            breaker_handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let source = match self.source.take() {
            Some(source) => source,
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
        let config = self.writer_config.clone();
        let running = Arc::clone(&self.running);
        self.worker = Some(thread::spawn(move || {
            run(ctx, task, config, source, running, breaker)
        }));
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.breaker_handle.take() {
            handle.interrupt();
        }
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(source) => self.source = Some(source),
                Err(_) => error!("acquisition worker panicked; source lost"),
            }
        }
    }
}

fn run(
    ctx: Arc<Context>,
    task: TaskKey,
    config: WriterConfig,
    mut source: Box<dyn Source>,
    running: Arc<AtomicBool>,
    mut breaker: Breaker,
) -> Box<dyn Source> {
    while running.load(Ordering::SeqCst) {
        if let Err(err) = source.start() {
            report(&ctx, task, &err);
            if err.is_unreachable() && breaker.wait(&err) {
                continue;
            }
            source.stopped_with_err(&err);
            break;
        }
        let mut writer = match ctx.client().open_writer(config.clone()) {
            Ok(writer) => writer,
            Err(err) => {
                let _ = source.stop();
                if err.is_unreachable() && breaker.wait(&err) {
                    continue;
                }
                report(&ctx, task, &err);
                break;
            }
        };
        debug!("acquisition pipeline for task {task} operational");
        breaker.reset();
        let exit = run_inner(source.as_mut(), writer.as_mut(), &running);
        let _ = writer.close();
        let _ = source.stop();
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
                error!("acquisition pipeline for task {task} failed: {err}");
                report(&ctx, task, &err);
                source.stopped_with_err(&err);
                break;
            }
        }
    }
    info!("acquisition pipeline for task {task} exiting");
    source
}

fn run_inner(source: &mut dyn Source, writer: &mut dyn Writer, running: &AtomicBool) -> Exit {
    while running.load(Ordering::SeqCst) {
        let frame = match source.read() {
            Ok(frame) => frame,
            // Nothing arrived this tick; check the stop flag and try again.
            Err(err) if err.is_temporary() => continue,
            Err(err) => return Exit::Fatal(err),
        };
        if let Err(err) = writer.write(frame) {
            return if err.is_unreachable() {
                Exit::Transport(err)
            } else {
                Exit::Fatal(err)
            };
        }
    }
    Exit::Stopped
}

fn report(ctx: &Context, task: TaskKey, err: &DriverError) {
    ctx.set_state(State::error(task, json!({ "message": err.to_string() })));
}
