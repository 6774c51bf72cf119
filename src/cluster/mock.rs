//! In-memory cluster used by the test suite.
//!
//! Faithful to the seams the driver cares about: writers log every frame and
//! validate it against their channel set, streamers are fed with `publish`,
//! and `set_offline` makes every transport call fail unreachable until the
//! "network" comes back, waking any blocked streamer read.

use super::{
    Channel, ChannelKey, Client, Device, Rack, RackKey, Streamer, StreamerConfig, TaskKey,
    TaskSpec, Writer, WriterConfig,
};
use crate::errors::{DriverError, Result};
use crate::telem::{DataType, Frame};
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One frame accepted by a mock writer, tagged with that writer's channel
/// set.
#[derive(Clone, Debug)]
pub struct WrittenFrame {
    pub writer_channels: Vec<ChannelKey>,
    pub frame: Frame,
}

struct WriterRecord {
    channels: Vec<ChannelKey>,
    closed: AtomicBool,
}

struct StreamerState {
    channels: Vec<ChannelKey>,
    inbox: Mutex<VecDeque<Frame>>,
    signal: Condvar,
    send_closed: AtomicBool,
    offline: Arc<AtomicBool>,
}

struct Inner {
    offline: Arc<AtomicBool>,
    racks: Mutex<HashMap<RackKey, Rack>>,
    channels: Mutex<HashMap<ChannelKey, Channel>>,
    tasks: Mutex<HashMap<TaskKey, TaskSpec>>,
    devices: Mutex<HashMap<String, Device>>,
    streamers: Mutex<Vec<Arc<StreamerState>>>,
    writers: Mutex<Vec<Arc<WriterRecord>>>,
    written: Mutex<Vec<WrittenFrame>>,
}

#[derive(Clone)]
pub struct MockCluster {
    inner: Arc<Inner>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        MockCluster {
            inner: Arc::new(Inner {
                offline: Arc::new(AtomicBool::new(false)),
                racks: Mutex::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
                devices: Mutex::new(HashMap::new()),
                streamers: Mutex::new(Vec::new()),
                writers: Mutex::new(Vec::new()),
                written: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn add_rack(&self, key: RackKey, name: &str) -> Rack {
        let rack = Rack {
            key,
            name: name.to_string(),
        };
        self.inner.racks.lock().insert(key, rack.clone());
        rack
    }

    pub fn add_channel(&self, channel: Channel) -> Channel {
        self.inner
            .channels
            .lock()
            .insert(channel.key, channel.clone());
        channel
    }

    pub fn add_index_channel(&self, key: ChannelKey, name: &str) -> Channel {
        self.add_channel(Channel {
            key,
            name: name.to_string(),
            data_type: DataType::Timestamp,
            index: key,
            is_index: true,
        })
    }

    pub fn add_data_channel(
        &self,
        key: ChannelKey,
        name: &str,
        data_type: DataType,
        index: ChannelKey,
    ) -> Channel {
        self.add_channel(Channel {
            key,
            name: name.to_string(),
            data_type,
            index,
            is_index: false,
        })
    }

    pub fn add_task(&self, spec: TaskSpec) {
        self.inner.tasks.lock().insert(spec.key, spec);
    }

    pub fn remove_task(&self, key: TaskKey) {
        self.inner.tasks.lock().remove(&key);
    }

    /// Flips the simulated transport. Going offline wakes every blocked
    /// streamer read so it can fail unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
        if offline {
            for streamer in self.inner.streamers.lock().iter() {
                let _guard = streamer.inbox.lock();
                streamer.signal.notify_all();
            }
        }
    }

    /// Delivers a frame to every open streamer subscribed to at least one of
    /// its channels.
    pub fn publish(&self, frame: Frame) {
        for streamer in self.inner.streamers.lock().iter() {
            if frame
                .channels()
                .iter()
                .any(|k| streamer.channels.contains(k))
            {
                let mut inbox = streamer.inbox.lock();
                inbox.push_back(frame.clone());
                streamer.signal.notify_all();
            }
        }
    }

    /// Every frame accepted by any writer, in arrival order.
    pub fn written(&self) -> Vec<WrittenFrame> {
        self.inner.written.lock().clone()
    }

    /// Frames containing a column for the given channel.
    pub fn frames_for(&self, key: ChannelKey) -> Vec<Frame> {
        self.inner
            .written
            .lock()
            .iter()
            .filter(|w| w.frame.channels().contains(&key))
            .map(|w| w.frame.clone())
            .collect()
    }

    /// Parsed task-state records, oldest first.
    pub fn state_records(&self) -> Vec<Value> {
        let state_key = {
            let channels = self.inner.channels.lock();
            match channels
                .values()
                .find(|c| c.name == crate::task::TASK_STATE_CHANNEL)
            {
                Some(c) => c.key,
                None => return Vec::new(),
            }
        };
        let mut records = Vec::new();
        for written in self.inner.written.lock().iter() {
            if let Some(series) = written.frame.get(state_key) {
                if let Some(strings) = series.strings() {
                    for raw in strings {
                        if let Ok(value) = serde_json::from_str(raw) {
                            records.push(value);
                        }
                    }
                }
            }
        }
        records
    }

    /// `(channel set, closed)` for every writer opened so far.
    pub fn writers(&self) -> Vec<(Vec<ChannelKey>, bool)> {
        self.inner
            .writers
            .lock()
            .iter()
            .map(|w| (w.channels.clone(), w.closed.load(Ordering::SeqCst)))
            .collect()
    }

    pub fn device(&self, key: &str) -> Option<Device> {
        self.inner.devices.lock().get(key).cloned()
    }

    fn check_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(DriverError::Unreachable("mock cluster offline".into()));
        }
        Ok(())
    }
}

impl Client for MockCluster {
    fn retrieve_rack(&self, key: RackKey) -> Result<Rack> {
        self.check_online()?;
        self.inner
            .racks
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| DriverError::Internal(format!("rack {key} not found")))
    }

    fn retrieve_channel(&self, key: ChannelKey) -> Result<Channel> {
        self.check_online()?;
        self.inner
            .channels
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| DriverError::Internal(format!("channel {key} not found")))
    }

    fn retrieve_channel_by_name(&self, name: &str) -> Result<Channel> {
        self.check_online()?;
        self.inner
            .channels
            .lock()
            .values()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| DriverError::Internal(format!("channel {name:?} not found")))
    }

    fn retrieve_device(&self, key: &str) -> Result<Device> {
        self.check_online()?;
        self.inner
            .devices
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| DriverError::Internal(format!("device {key:?} not found")))
    }

    fn create_device(&self, device: &Device) -> Result<()> {
        self.check_online()?;
        self.inner
            .devices
            .lock()
            .insert(device.key.clone(), device.clone());
        Ok(())
    }

    fn list_tasks(&self, _rack: RackKey) -> Result<Vec<TaskSpec>> {
        self.check_online()?;
        let mut tasks: Vec<TaskSpec> = self.inner.tasks.lock().values().cloned().collect();
        tasks.sort_by_key(|t| t.key);
        Ok(tasks)
    }

    fn retrieve_task(&self, key: TaskKey) -> Result<TaskSpec> {
        self.check_online()?;
        self.inner
            .tasks
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| DriverError::Internal(format!("task {key} not found")))
    }

    fn open_writer(&self, config: WriterConfig) -> Result<Box<dyn Writer>> {
        self.check_online()?;
        let record = Arc::new(WriterRecord {
            channels: config.channels,
            closed: AtomicBool::new(false),
        });
        self.inner.writers.lock().push(Arc::clone(&record));
        Ok(Box::new(MockWriter {
            inner: Arc::clone(&self.inner),
            record,
        }))
    }

    fn open_streamer(&self, config: StreamerConfig) -> Result<Arc<dyn Streamer>> {
        self.check_online()?;
        let state = Arc::new(StreamerState {
            channels: config.channels,
            inbox: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
            send_closed: AtomicBool::new(false),
            offline: Arc::clone(&self.inner.offline),
        });
        self.inner.streamers.lock().push(Arc::clone(&state));
        Ok(Arc::new(MockStreamer { state }))
    }
}

struct MockWriter {
    inner: Arc<Inner>,
    record: Arc<WriterRecord>,
}

impl Writer for MockWriter {
    fn write(&mut self, frame: Frame) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(DriverError::Unreachable("mock cluster offline".into()));
        }
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Internal("write on closed writer".into()));
        }
        if !frame.is_aligned() {
            return Err(DriverError::Internal("ragged frame".into()));
        }
        for key in frame.channels() {
            if !self.record.channels.contains(key) {
                return Err(DriverError::Internal(format!(
                    "channel {key} not in writer config"
                )));
            }
        }
        self.inner.written.lock().push(WrittenFrame {
            writer_channels: self.record.channels.clone(),
            frame,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.record.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockStreamer {
    state: Arc<StreamerState>,
}

impl Streamer for MockStreamer {
    fn read(&self) -> Result<Frame> {
        let mut inbox = self.state.inbox.lock();
        loop {
            if self.state.offline.load(Ordering::SeqCst) {
                return Err(DriverError::Unreachable("mock cluster offline".into()));
            }
            if let Some(frame) = inbox.pop_front() {
                return Ok(frame);
            }
            if self.state.send_closed.load(Ordering::SeqCst) {
                return Err(DriverError::StreamClosed);
            }
            self.state.signal.wait(&mut inbox);
        }
    }

    fn close_send(&self) {
        let _guard = self.state.inbox.lock();
        self.state.send_closed.store(true, Ordering::SeqCst);
        self.state.signal.notify_all();
    }

    fn close(&self) -> Result<()> {
        self.close_send();
        Ok(())
    }
}
