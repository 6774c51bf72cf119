//! Task runtime: lifecycle records, the shared context, and the seams the
//! manager reconciles through.

pub mod manager;

pub use manager::Manager;

use crate::cluster::{Channel, Client, TaskKey, TaskSpec, Writer, WriterConfig};
use crate::errors::{DriverError, Result};
use crate::telem::{Frame, TimeStamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Channel the driver publishes task lifecycle records to.
pub const TASK_STATE_CHANNEL: &str = "sy_task_state";

/// A command addressed to one task, JSON-encoded on `sy_task_cmd`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Command {
    pub task: TaskKey,
    #[serde(rename = "type")]
    pub command: String,
    /// Correlation key echoed back in the acknowledging state record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub args: Value,
}

impl Command {
    pub fn parse(raw: &str) -> Result<Command> {
        serde_json::from_str(raw).map_err(|err| DriverError::Internal(format!("bad command: {err}")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Success,
    Error,
    Running,
    Deleted,
}

/// One lifecycle record, JSON-encoded on `sy_task_state`. Every transition a
/// task goes through (configure ok/fail, start, stop, command ack, fatal
/// error, delete) writes exactly one of these.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct State {
    pub task: TaskKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub variant: Variant,
    #[serde(default)]
    pub details: Value,
}

impl State {
    pub fn success(task: TaskKey, details: Value) -> State {
        State {
            task,
            key: None,
            variant: Variant::Success,
            details,
        }
    }

    pub fn error(task: TaskKey, details: Value) -> State {
        State {
            task,
            key: None,
            variant: Variant::Error,
            details,
        }
    }

    pub fn running(task: TaskKey, details: Value) -> State {
        State {
            task,
            key: None,
            variant: Variant::Running,
            details,
        }
    }

    pub fn deleted(task: TaskKey) -> State {
        State {
            task,
            key: None,
            variant: Variant::Deleted,
            details: Value::Null,
        }
    }

    pub fn with_key(mut self, key: Option<String>) -> State {
        self.key = key;
        self
    }
}

struct StateSink {
    channel: Channel,
    writer: Box<dyn Writer>,
}

/// Process-wide handle shared by the manager, factories, and every pipeline:
/// the cluster client plus the task-state sink.
///
/// The state writer is opened lazily and dropped on write failure so the
/// next report reopens it; losing a state record during an outage is
/// acceptable, blocking a pipeline on one is not.
pub struct Context {
    client: Arc<dyn Client>,
    state: Mutex<Option<StateSink>>,
}

impl Context {
    pub fn new(client: Arc<dyn Client>) -> Arc<Context> {
        Arc::new(Context {
            client,
            state: Mutex::new(None),
        })
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    /// Publishes a task lifecycle record. Failures are logged, never
    /// propagated.
    pub fn set_state(&self, state: State) {
        let payload = match serde_json::to_string(&state) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode state record: {err}");
                return;
            }
        };
        let mut sink = self.state.lock();
        if sink.is_none() {
            match self.open_sink() {
                Ok(opened) => *sink = Some(opened),
                Err(err) => {
                    warn!("dropping state record for task {}: {err}", state.task);
                    return;
                }
            }
        }
        let Some(opened) = sink.as_mut() else { return };
        let mut frame = Frame::with_capacity(1);
        frame.push(opened.channel.key, vec![payload]);
        if let Err(err) = opened.writer.write(frame) {
            warn!("dropping state record for task {}: {err}", state.task);
            // Reopen on the next report.
            *sink = None;
        }
    }

    fn open_sink(&self) -> Result<StateSink> {
        let channel = self.client.retrieve_channel_by_name(TASK_STATE_CHANNEL)?;
        let writer = self.client.open_writer(WriterConfig {
            channels: vec![channel.key],
            start: TimeStamp::now(),
            enable_auto_commit: true,
        })?;
        Ok(StateSink { channel, writer })
    }
}

/// A runtime task: one hardware handle plus its streaming contract, driven
/// by lifecycle commands.
pub trait Task: Send {
    fn exec(&mut self, cmd: &Command);

    /// Idempotent teardown. Releases the hardware handle before returning.
    fn stop(&mut self);
}

/// Turns declarative task specs into runtime tasks.
pub trait Factory: Send {
    /// Returns `(task, ok)`. `(None, true)` means the spec belongs to some
    /// other driver and is silently skipped; `(None, false)` means
    /// configuration failed (already reported via the context).
    fn configure_task(&self, ctx: &Arc<Context>, spec: &TaskSpec) -> (Option<Box<dyn Task>>, bool);

    /// Tasks the driver always runs (e.g. the device scanner), registered at
    /// startup before the reconciliation loop begins.
    fn configure_initial_tasks(
        &self,
        ctx: &Arc<Context>,
        rack: &crate::cluster::Rack,
    ) -> Vec<(TaskSpec, Box<dyn Task>)>;
}
