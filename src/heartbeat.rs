//! Per-rack liveness writer.
//!
//! Publishes one heartbeat word per second to the rack heartbeat channel:
//! the rack key in the high 32 bits, a beat counter in the low 32. A
//! transport failure drops the writer and reopens it on a later beat, so a
//! brief outage costs heartbeats but never the thread.

use crate::cluster::{Client, RackKey, Writer, WriterConfig};
use crate::errors::Result;
use crate::telem::{Frame, TimeSpan, TimeStamp};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{info, warn};

pub const RACK_HEARTBEAT_CHANNEL: &str = "sy_rack_heartbeat";

const BEAT_INTERVAL: TimeSpan = TimeSpan::SECOND;

pub struct Heartbeat {
    rack_key: RackKey,
    client: Arc<dyn Client>,
    shared: Arc<(Mutex<bool>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn new(rack_key: RackKey, client: Arc<dyn Client>) -> Self {
        Heartbeat {
            rack_key,
            client,
            shared: Arc::new((Mutex::new(false), Condvar::new())),
            worker: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let channel = self.client.retrieve_channel_by_name(RACK_HEARTBEAT_CHANNEL)?;
        let client = Arc::clone(&self.client);
        let shared = Arc::clone(&self.shared);
        let rack_key = self.rack_key;
        *shared.0.lock() = true;
        self.worker = Some(std::thread::spawn(move || {
            let mut writer: Option<Box<dyn Writer>> = None;
            let mut beat: u32 = 0;
            loop {
                {
                    let (running, stop) = &*shared;
                    let mut running = running.lock();
                    if !*running {
                        break;
                    }
                    stop.wait_for(&mut running, BEAT_INTERVAL.as_duration());
                    if !*running {
                        break;
                    }
                }
                if writer.is_none() {
                    match client.open_writer(WriterConfig {
                        channels: vec![channel.key],
                        start: TimeStamp::now(),
                        enable_auto_commit: true,
                    }) {
                        Ok(opened) => writer = Some(opened),
                        Err(err) => {
                            warn!("heartbeat writer unavailable: {err}");
                            continue;
                        }
                    }
                }
                let word = ((rack_key as u64) << 32) | beat as u64;
                beat = beat.wrapping_add(1);
                let mut frame = Frame::with_capacity(1);
                frame.push(channel.key, vec![word]);
                if let Some(w) = writer.as_mut() {
                    if let Err(err) = w.write(frame) {
                        warn!("dropping heartbeat: {err}");
                        writer = None;
                    }
                }
            }
            if let Some(mut w) = writer {
                let _ = w.close();
            }
            info!("heartbeat for rack {rack_key} exiting");
        }));
        Ok(())
    }

    pub fn stop(&mut self) {
        {
            let (running, stop) = &*self.shared;
            let mut running = running.lock();
            if !*running {
                return;
            }
            *running = false;
            stop.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
