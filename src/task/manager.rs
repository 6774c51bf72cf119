//! Reconciliation of the remote-declared task set against running tasks.
//!
//! The manager subscribes to three control-plane channels: `sy_task_set`
//! (task keys to (re)configure), `sy_task_delete` (task keys to tear down),
//! and `sy_task_cmd` (JSON commands for individual tasks). The task map
//! lives on the run thread and is mutated only by frame-driven events, so it
//! needs no lock. Transport failures of the loop itself are arbitrated by
//! the manager's breaker while existing tasks keep running, so hardware
//! keeps sampling through a control-plane outage.

use super::{Command, Context, Factory, State, Task};
use crate::breaker::{self, Breaker, BreakerHandle};
use crate::cluster::{Channel, Client, RackKey, Streamer, StreamerConfig, TaskKey};
use crate::errors::{DriverError, Result};
use crate::telem::Series;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

pub const TASK_SET_CHANNEL: &str = "sy_task_set";
pub const TASK_DELETE_CHANNEL: &str = "sy_task_delete";
pub const TASK_CMD_CHANNEL: &str = "sy_task_cmd";

type TaskMap = HashMap<TaskKey, Box<dyn Task>>;

struct Channels {
    set: Channel,
    delete: Channel,
    cmd: Channel,
}

pub struct Manager {
    rack_key: RackKey,
    ctx: Arc<Context>,
    factory: Option<Box<dyn Factory>>,
    breaker_config: breaker::Config,
    running: Arc<AtomicBool>,
    live: Arc<Mutex<Option<Arc<dyn Streamer>>>>,
    worker: Option<JoinHandle<(TaskMap, Result<()>)>>,
    breaker_handle: Option<BreakerHandle>,
}

impl Manager {
    pub fn new(
        rack_key: RackKey,
        client: Arc<dyn Client>,
        factory: Box<dyn Factory>,
        breaker_config: breaker::Config,
    ) -> Self {
        Manager {
            rack_key,
            ctx: Context::new(client),
            factory: Some(factory),
            breaker_config,
            running: Arc::new(AtomicBool::new(false)),
            live: Arc::new(Mutex::new(None)),
            worker: None,
            breaker_handle: None,
        }
    }

    pub fn context(&self) -> Arc<Context> {
        Arc::clone(&self.ctx)
    }

    /// Retrieves the rack and control channels, configures the declared and
    /// initial task sets, and launches the reconciliation loop. Unreachable
    /// errors during startup are retried behind the breaker.
    pub fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("[task.manager] starting up");
        let factory = match self.factory.take() {
            Some(factory) => factory,
            None => {
                self.running.store(false, Ordering::SeqCst);
                return Err(DriverError::Internal(
                    "task manager cannot be restarted".into(),
                ));
            }
        };
        let mut breaker = Breaker::new(self.breaker_config.clone());
        breaker.start();
        self.breaker_handle = Some(breaker.handle());

        let (channels, tasks) = loop {
            match self.start_guarded(factory.as_ref()) {
                Ok(boot) => break boot,
                Err(err) if err.is_unreachable() && breaker.wait(&err) => continue,
                Err(err) => {
                    self.running.store(false, Ordering::SeqCst);
                    self.factory = Some(factory);
                    return Err(err);
                }
            }
        };
        breaker.reset();

        let ctx = Arc::clone(&self.ctx);
        let running = Arc::clone(&self.running);
        let live = Arc::clone(&self.live);
        self.worker = Some(thread::spawn(move || {
            run(ctx, channels, tasks, factory, running, live, breaker)
        }));
        Ok(())
    }

    fn start_guarded(&self, factory: &dyn Factory) -> Result<(Channels, TaskMap)> {
        let client = self.ctx.client();
        let rack = client.retrieve_rack(self.rack_key)?;
        let channels = Channels {
            set: client.retrieve_channel_by_name(TASK_SET_CHANNEL)?,
            delete: client.retrieve_channel_by_name(TASK_DELETE_CHANNEL)?,
            cmd: client.retrieve_channel_by_name(TASK_CMD_CHANNEL)?,
        };

        info!("[task.manager] pulling and configuring existing tasks");
        let mut tasks: TaskMap = HashMap::new();
        for spec in client.list_tasks(rack.key)? {
            let (task, ok) = factory.configure_task(&self.ctx, &spec);
            if ok {
                if let Some(task) = task {
                    tasks.insert(spec.key, task);
                }
            } else {
                error!("[task.manager] failed to configure task {}", spec.name);
            }
        }

        info!("[task.manager] configuring initial tasks from factory");
        for (spec, task) in factory.configure_initial_tasks(&self.ctx, &rack) {
            tasks.insert(spec.key, task);
        }

        Ok((channels, tasks))
    }

    /// Closes the streamer's send half, joins the loop, then stops every
    /// task. Returns the loop's terminal error, if any.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(streamer) = self.live.lock().as_ref() {
            streamer.close_send();
        }
        if let Some(handle) = self.breaker_handle.take() {
            handle.interrupt();
        }
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let (mut tasks, run_err) = worker
            .join()
            .map_err(|_| DriverError::Internal("task manager loop panicked".into()))?;
        for (_, task) in tasks.iter_mut() {
            task.stop();
        }
        tasks.clear();
        run_err
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    ctx: Arc<Context>,
    channels: Channels,
    mut tasks: TaskMap,
    factory: Box<dyn Factory>,
    running: Arc<AtomicBool>,
    live: Arc<Mutex<Option<Arc<dyn Streamer>>>>,
    mut breaker: Breaker,
) -> (TaskMap, Result<()>) {
    let result = loop {
        match run_guarded(
            &ctx,
            &channels,
            &mut tasks,
            factory.as_ref(),
            &running,
            &live,
            &mut breaker,
        ) {
            Ok(()) => break Ok(()),
            Err(err) if err.is_unreachable() && breaker.wait(&err) => continue,
            Err(err) => break Err(err),
        }
    };
    info!("[task.manager] run thread exiting");
    (tasks, result)
}

#[allow(clippy::too_many_arguments)]
fn run_guarded(
    ctx: &Arc<Context>,
    channels: &Channels,
    tasks: &mut TaskMap,
    factory: &dyn Factory,
    running: &AtomicBool,
    live: &Mutex<Option<Arc<dyn Streamer>>>,
    breaker: &mut Breaker,
) -> Result<()> {
    let streamer = ctx.client().open_streamer(StreamerConfig {
        channels: vec![channels.set.key, channels.delete.key, channels.cmd.key],
    })?;
    *live.lock() = Some(Arc::clone(&streamer));
    info!("[task.manager] operational");
    // Reaching here after an outage means connectivity is back.
    breaker.reset();

    let result = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(());
        }
        let frame = match streamer.read() {
            Ok(frame) => frame,
            Err(err) if err.is_stream_closed() => break Ok(()),
            Err(err) => break Err(err),
        };
        for (key, series) in frame.iter() {
            if key == channels.set.key {
                process_task_set(ctx, tasks, factory, series);
            } else if key == channels.delete.key {
                process_task_delete(ctx, tasks, series);
            } else if key == channels.cmd.key {
                process_task_cmd(tasks, series);
            }
        }
    };

    live.lock().take();
    let closed = streamer.close();
    result.and(closed)
}

fn process_task_set(
    ctx: &Arc<Context>,
    tasks: &mut TaskMap,
    factory: &dyn Factory,
    series: &Series,
) {
    let Some(keys) = series.uint64() else {
        warn!("[task.manager] non-u64 series on task set channel");
        return;
    };
    for &key in keys {
        // Replace any existing runtime task for this key.
        if let Some(mut existing) = tasks.remove(&key) {
            existing.stop();
        }
        let spec = match ctx.client().retrieve_task(key) {
            Ok(spec) => spec,
            Err(err) => {
                error!("[task.manager] failed to retrieve task {key}: {err}");
                continue;
            }
        };
        info!(
            "[task.manager] configuring task {} with key {key}",
            spec.name
        );
        let (task, ok) = factory.configure_task(ctx, &spec);
        match (task, ok) {
            (Some(task), true) => {
                tasks.insert(key, task);
            }
            (None, true) => {} // not ours; leave for another driver
            (_, false) => error!("[task.manager] failed to configure task {}", spec.name),
        }
    }
}

fn process_task_delete(ctx: &Arc<Context>, tasks: &mut TaskMap, series: &Series) {
    let Some(keys) = series.uint64() else {
        warn!("[task.manager] non-u64 series on task delete channel");
        return;
    };
    for &key in keys {
        if let Some(mut task) = tasks.remove(&key) {
            task.stop();
            ctx.set_state(State::deleted(key));
            info!("[task.manager] deleted task {key}");
        }
    }
}

fn process_task_cmd(tasks: &mut TaskMap, series: &Series) {
    let Some(commands) = series.strings() else {
        warn!("[task.manager] non-string series on task command channel");
        return;
    };
    for raw in commands {
        let cmd = match Command::parse(raw) {
            Ok(cmd) => cmd,
            Err(err) => {
                warn!("[task.manager] failed to parse command: {err}");
                continue;
            }
        };
        info!(
            "[task.manager] processing command {} for task {}",
            cmd.command, cmd.task
        );
        match tasks.get_mut(&cmd.task) {
            Some(task) => task.exec(&cmd),
            None => warn!(
                "[task.manager] could not find task to execute command: {}",
                cmd.task
            ),
        }
    }
}
