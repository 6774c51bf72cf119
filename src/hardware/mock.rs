//! Software-paced mock DAQ used by the test suite.
//!
//! Analog reads block for `samples_per_channel / sample_rate`, mimicking a
//! vendor-clocked continuous acquisition; digital reads return immediately,
//! mimicking a software-timed task. Digital writes are recorded for
//! assertion. `set_fail_reads` injects a vendor fault on the next read.

use super::{AnalogInput, Daq, DeviceInfo, DeviceSession};
use crate::errors::{DriverError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct DaqInner {
    devices: Mutex<Vec<DeviceInfo>>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    fail_reads: Arc<AtomicBool>,
    fail_enumerate: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MockDaq {
    inner: Arc<DaqInner>,
}

impl MockDaq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: DeviceInfo) {
        self.inner.devices.lock().push(device);
    }

    /// Sessions opened so far, oldest first.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.inner.sessions.lock().clone()
    }

    /// When set, every subsequent read on every session fails with a
    /// critical hardware error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_enumerate(&self, fail: bool) {
        self.inner.fail_enumerate.store(fail, Ordering::SeqCst);
    }
}

impl Daq for MockDaq {
    fn open_session(&self) -> Result<Arc<dyn DeviceSession>> {
        let session = Arc::new(MockSession {
            state: Mutex::new(SessionState::default()),
            writes: Mutex::new(Vec::new()),
            fail_reads: Arc::clone(&self.inner.fail_reads),
            phase: AtomicU64::new(0),
        });
        self.inner.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }

    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        if self.inner.fail_enumerate.load(Ordering::SeqCst) {
            return Err(DriverError::CriticalHardware(
                "system configuration unavailable".into(),
            ));
        }
        Ok(self.inner.devices.lock().clone())
    }
}

#[derive(Default)]
struct SessionState {
    analog_inputs: Vec<AnalogInput>,
    digital_inputs: Vec<String>,
    digital_outputs: Vec<String>,
    sample_rate: f64,
    started: bool,
}

pub struct MockSession {
    state: Mutex<SessionState>,
    writes: Mutex<Vec<Vec<u8>>>,
    fail_reads: Arc<AtomicBool>,
    phase: AtomicU64,
}

impl MockSession {
    /// Every byte buffer handed to `write_digital`, oldest first.
    pub fn digital_writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub fn started(&self) -> bool {
        self.state.lock().started
    }

    pub fn analog_input_names(&self) -> Vec<String> {
        self.state
            .lock()
            .analog_inputs
            .iter()
            .map(|i| i.name.clone())
            .collect()
    }

    pub fn digital_output_lines(&self) -> Vec<String> {
        self.state.lock().digital_outputs.clone()
    }

    fn check_fault(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DriverError::CriticalHardware("vendor read fault".into()));
        }
        Ok(())
    }
}

impl DeviceSession for MockSession {
    fn add_analog_input(&self, input: &AnalogInput) -> Result<()> {
        self.state.lock().analog_inputs.push(input.clone());
        Ok(())
    }

    fn add_digital_input(&self, line: &str) -> Result<()> {
        self.state.lock().digital_inputs.push(line.to_string());
        Ok(())
    }

    fn add_digital_output(&self, line: &str) -> Result<()> {
        self.state.lock().digital_outputs.push(line.to_string());
        Ok(())
    }

    fn cfg_sample_clock(&self, _source: &str, rate_hz: f64) -> Result<()> {
        self.state.lock().sample_rate = rate_hz;
        Ok(())
    }

    fn start(&self) -> Result<()> {
        self.state.lock().started = true;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.state.lock().started = false;
        Ok(())
    }

    fn read_analog(&self, samples_per_channel: usize, buf: &mut [f64]) -> Result<usize> {
        self.check_fault()?;
        let (lanes, rate) = {
            let state = self.state.lock();
            (state.analog_inputs.len(), state.sample_rate)
        };
        if rate > 0.0 {
            thread::sleep(Duration::from_secs_f64(samples_per_channel as f64 / rate));
        }
        self.check_fault()?;
        let phase = self
            .phase
            .fetch_add(samples_per_channel as u64, Ordering::SeqCst);
        for lane in 0..lanes {
            for i in 0..samples_per_channel {
                let index = lane * samples_per_channel + i;
                if index < buf.len() {
                    buf[index] = lane as f64 + (phase + i as u64) as f64 * 1e-3;
                }
            }
        }
        Ok(samples_per_channel)
    }

    fn read_digital(&self, samples_per_channel: usize, buf: &mut [u8]) -> Result<usize> {
        self.check_fault()?;
        let lanes = self.state.lock().digital_inputs.len();
        let phase = self
            .phase
            .fetch_add(samples_per_channel as u64, Ordering::SeqCst);
        for lane in 0..lanes {
            for i in 0..samples_per_channel {
                let index = lane * samples_per_channel + i;
                if index < buf.len() {
                    buf[index] = ((phase + i as u64) % 2) as u8;
                }
            }
        }
        Ok(samples_per_channel)
    }

    fn write_digital(&self, values: &[u8]) -> Result<usize> {
        self.check_fault()?;
        self.writes.lock().push(values.to_vec());
        Ok(1)
    }
}
