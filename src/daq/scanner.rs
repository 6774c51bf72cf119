//! Periodic device discovery.
//!
//! Invokes the vendor's system-configuration enumerator on an interval,
//! publishes the inventory through the task-state channel, and registers
//! devices the cluster has not seen before. An explicit `scan` command runs
//! one pass synchronously.

use super::SCAN_TYPE;
use crate::cluster::{Device, Rack, RackKey, TaskSpec};
use crate::errors::Result;
use crate::hardware::{Daq, DeviceInfo};
use crate::task::{Command, Context, State, Task};
use crate::telem::TimeSpan;
use parking_lot::{Condvar, Mutex};
use serde_json::json;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

pub const DEFAULT_SCAN_INTERVAL: TimeSpan = TimeSpan::from_secs(5);

pub struct Scanner {
    ctx: Arc<Context>,
    daq: Arc<dyn Daq>,
    rack: RackKey,
}

impl Scanner {
    pub fn new(ctx: Arc<Context>, daq: Arc<dyn Daq>, rack: RackKey) -> Self {
        Scanner { ctx, daq, rack }
    }

    /// Enumerates devices and registers any the cluster does not know yet.
    /// Registration failures are logged but do not fail the scan; the next
    /// pass retries.
    pub fn scan(&self) -> Result<Vec<DeviceInfo>> {
        let devices = self.daq.enumerate_devices()?;
        for info in &devices {
            if self.ctx.client().retrieve_device(&info.key).is_ok() {
                continue;
            }
            let device = Device {
                key: info.key.clone(),
                rack: self.rack,
                name: info.name.clone(),
                make: info.make.clone(),
                model: info.model.clone(),
                location: info.location.clone(),
            };
            if let Err(err) = self.ctx.client().create_device(&device) {
                warn!("failed to register device {}: {err}", info.key);
            } else {
                info!("registered device {} at {}", info.key, info.location);
            }
        }
        Ok(devices)
    }
}

/// Always-on task wrapping a [`Scanner`] in a periodic thread. Scanning
/// begins on construction; `stop` joins within one scan interval.
pub struct ScannerTask {
    spec: TaskSpec,
    ctx: Arc<Context>,
    scanner: Arc<Scanner>,
    shared: Arc<(Mutex<bool>, Condvar)>,
    worker: Option<JoinHandle<()>>,
}

impl ScannerTask {
    pub fn configure(
        ctx: &Arc<Context>,
        daq: Arc<dyn Daq>,
        rack: &Rack,
        spec: TaskSpec,
        interval: TimeSpan,
    ) -> ScannerTask {
        let scanner = Arc::new(Scanner::new(Arc::clone(ctx), daq, rack.key));
        let shared = Arc::new((Mutex::new(true), Condvar::new()));
        let worker = {
            let scanner = Arc::clone(&scanner);
            let ctx = Arc::clone(ctx);
            let shared = Arc::clone(&shared);
            let task_key = spec.key;
            std::thread::spawn(move || loop {
                {
                    let (running, tick) = &*shared;
                    let mut running = running.lock();
                    if !*running {
                        break;
                    }
                    tick.wait_for(&mut running, interval.as_duration());
                    if !*running {
                        break;
                    }
                }
                run_scan(&ctx, &scanner, task_key, None);
            })
        };
        info!("started scanner task {}", spec.name);
        ScannerTask {
            spec,
            ctx: Arc::clone(ctx),
            scanner,
            shared,
            worker: Some(worker),
        }
    }

    pub fn spec_for(key: crate::cluster::TaskKey, rack: &Rack) -> TaskSpec {
        TaskSpec {
            key,
            name: format!("{} scanner", rack.name),
            task_type: SCAN_TYPE.to_string(),
            config: "{}".to_string(),
        }
    }
}

fn run_scan(ctx: &Arc<Context>, scanner: &Scanner, task: crate::cluster::TaskKey, key: Option<String>) {
    match scanner.scan() {
        Ok(devices) => ctx.set_state(
            State::success(task, json!({ "devices": devices })).with_key(key),
        ),
        Err(err) => {
            error!("scan failed: {err}");
            ctx.set_state(
                State::error(task, json!({ "message": err.to_string() })).with_key(key),
            );
        }
    }
}

impl Task for ScannerTask {
    fn exec(&mut self, cmd: &Command) {
        match cmd.command.as_str() {
            "scan" => run_scan(&self.ctx, &self.scanner, self.spec.key, cmd.key.clone()),
            "stop" => self.stop(),
            other => error!("unknown command type for scanner task: {other}"),
        }
    }

    fn stop(&mut self) {
        {
            let (running, tick) = &*self.shared;
            let mut running = running.lock();
            if !*running {
                return;
            }
            *running = false;
            tick.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        info!("stopped scanner task {}", self.spec.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockCluster;
    use crate::hardware::mock::MockDaq;
    use std::time::{Duration, Instant};

    fn device_info() -> DeviceInfo {
        DeviceInfo {
            key: "dev-9".into(),
            name: "card".into(),
            make: "acme".into(),
            model: "x-series".into(),
            location: "Dev9".into(),
        }
    }

    #[test]
    fn test_scan_registers_unseen_devices() {
        let cluster = MockCluster::new();
        cluster.add_index_channel(100, crate::task::TASK_STATE_CHANNEL);
        let ctx = Context::new(Arc::new(cluster.clone()));
        let daq = MockDaq::new();
        daq.add_device(device_info());

        let scanner = Scanner::new(ctx, Arc::new(daq), 1);
        let devices = scanner.scan().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(cluster.device("dev-9").unwrap().location, "Dev9");
        // A second scan leaves the registration alone.
        scanner.scan().unwrap();
        assert_eq!(cluster.device("dev-9").unwrap().rack, 1);
    }

    #[test]
    fn test_scan_command_publishes_inventory() {
        let cluster = MockCluster::new();
        cluster.add_index_channel(100, crate::task::TASK_STATE_CHANNEL);
        let ctx = Context::new(Arc::new(cluster.clone()));
        let daq = MockDaq::new();
        daq.add_device(device_info());
        let rack = cluster.add_rack(1, "rack-1");

        let mut task = ScannerTask::configure(
            &ctx,
            Arc::new(daq),
            &rack,
            ScannerTask::spec_for(0, &rack),
            TimeSpan::from_secs(60),
        );
        task.exec(&Command {
            task: 0,
            command: "scan".into(),
            key: Some("corr-1".into()),
            args: serde_json::Value::Null,
        });
        task.stop();

        let records = cluster.state_records();
        let last = records.last().unwrap();
        assert_eq!(last["variant"], "success");
        assert_eq!(last["key"], "corr-1");
        assert_eq!(last["details"]["devices"][0]["key"], "dev-9");
    }

    #[test]
    fn test_failed_scan_reports_error() {
        let cluster = MockCluster::new();
        cluster.add_index_channel(100, crate::task::TASK_STATE_CHANNEL);
        let ctx = Context::new(Arc::new(cluster.clone()));
        let daq = MockDaq::new();
        daq.set_fail_enumerate(true);
        let rack = cluster.add_rack(1, "rack-1");

        let mut task = ScannerTask::configure(
            &ctx,
            Arc::new(daq),
            &rack,
            ScannerTask::spec_for(0, &rack),
            TimeSpan::from_secs(60),
        );
        task.exec(&Command {
            task: 0,
            command: "scan".into(),
            key: None,
            args: serde_json::Value::Null,
        });
        task.stop();

        let records = cluster.state_records();
        assert_eq!(records.last().unwrap()["variant"], "error");
    }

    #[test]
    fn test_stop_joins_promptly() {
        let cluster = MockCluster::new();
        cluster.add_index_channel(100, crate::task::TASK_STATE_CHANNEL);
        let ctx = Context::new(Arc::new(cluster.clone()));
        let rack = cluster.add_rack(1, "rack-1");
        let mut task = ScannerTask::configure(
            &ctx,
            Arc::new(MockDaq::new()),
            &rack,
            ScannerTask::spec_for(0, &rack),
            TimeSpan::from_secs(60),
        );
        let started = Instant::now();
        task.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        // Idempotent.
        task.stop();
    }
}
