//! Cluster data model and transport seams.
//!
//! The cluster transport itself (RPC, authentication, frame serialization)
//! is an external collaborator: this module defines only the types the
//! driver exchanges with it and the capability traits the rest of the crate
//! programs against. `mock` provides the in-memory implementation the test
//! suite runs on.

pub mod mock;

use crate::errors::Result;
use crate::telem::{DataType, Frame, TimeStamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type ChannelKey = u32;
pub type TaskKey = u64;
pub type RackKey = u32;

/// A logical grouping of tasks managed by one driver process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rack {
    pub key: RackKey,
    pub name: String,
}

/// A cluster channel descriptor. `index` names the TIMESTAMP channel that
/// supplies this channel's time axis; index channels reference themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub key: ChannelKey,
    pub name: String,
    pub data_type: DataType,
    pub index: ChannelKey,
    pub is_index: bool,
}

/// A declarative task as authored on the control plane. `config` is an
/// opaque JSON blob interpreted by the matching factory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub key: TaskKey,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub config: String,
}

/// A hardware device registered with the cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub key: String,
    pub rack: RackKey,
    pub name: String,
    pub make: String,
    pub model: String,
    /// Host-local address the vendor binding resolves, e.g. `"Dev1"`.
    pub location: String,
}

/// Configuration for a data-plane writer: the union of a task's data and
/// index channels.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub channels: Vec<ChannelKey>,
    pub start: TimeStamp,
    pub enable_auto_commit: bool,
}

/// Configuration for a streamer over a task's command channels or the
/// manager's control channels.
#[derive(Clone, Debug)]
pub struct StreamerConfig {
    pub channels: Vec<ChannelKey>,
}

/// A streaming write session. Used by exactly one pipeline thread. Writers
/// are opened with `enable_auto_commit` set and commit periodically on
/// their own; the driver only writes and closes.
pub trait Writer: Send {
    fn write(&mut self, frame: Frame) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// A streaming read session. `read` blocks until a frame arrives; methods
/// take `&self` so another thread can call `close_send` to unblock it, after
/// which `read` drains buffered frames and then returns
/// [`DriverError::StreamClosed`](crate::errors::DriverError::StreamClosed).
pub trait Streamer: Send + Sync {
    fn read(&self) -> Result<Frame>;

    fn close_send(&self);

    fn close(&self) -> Result<()>;
}

/// The driver's view of the cluster.
pub trait Client: Send + Sync {
    fn retrieve_rack(&self, key: RackKey) -> Result<Rack>;

    fn retrieve_channel(&self, key: ChannelKey) -> Result<Channel>;

    fn retrieve_channel_by_name(&self, name: &str) -> Result<Channel>;

    fn retrieve_device(&self, key: &str) -> Result<Device>;

    fn create_device(&self, device: &Device) -> Result<()>;

    fn list_tasks(&self, rack: RackKey) -> Result<Vec<TaskSpec>>;

    fn retrieve_task(&self, key: TaskKey) -> Result<TaskSpec>;

    fn open_writer(&self, config: WriterConfig) -> Result<Box<dyn Writer>>;

    fn open_streamer(&self, config: StreamerConfig) -> Result<Arc<dyn Streamer>>;
}
