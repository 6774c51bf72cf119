//! Vendor driver seams.
//!
//! The actual DAQ vendor SDK and the system-configuration scanner are
//! external collaborators; the driver programs against these capability
//! traits. A session maps to one opened vendor task on a device: channels
//! are added, the sample clock is configured, then the session is started
//! and read from (or written to) by exactly one thread until `stop`.

pub mod mock;

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A device discovered by the vendor's system-configuration enumerator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub key: String,
    pub name: String,
    pub make: String,
    pub model: String,
    /// Host-local address, e.g. `"Dev1"`.
    pub location: String,
}

/// One analog input to add to a session. `kind` selects the vendor channel
/// flavour (voltage, thermocouple, bridge, ...); `config` carries the
/// flavour-specific options opaquely from the task config blob.
#[derive(Clone, Debug)]
pub struct AnalogInput {
    /// Physical channel name, e.g. `"Dev1/ai0"`.
    pub name: String,
    pub kind: String,
    pub min_val: f64,
    pub max_val: f64,
    pub config: Value,
}

/// One opened vendor task on a device.
///
/// Reads block until the requested number of samples per channel is
/// available (vendor-clocked) or return immediately what is there
/// (software-paced). Buffers are laid out grouped by channel: all samples
/// for lane 0, then all samples for lane 1, in channel-creation order.
pub trait DeviceSession: Send + Sync {
    fn add_analog_input(&self, input: &AnalogInput) -> Result<()>;

    /// Adds a digital input line, e.g. `"Dev1/port0/line2"`.
    fn add_digital_input(&self, line: &str) -> Result<()>;

    /// Adds a digital output line.
    fn add_digital_output(&self, line: &str) -> Result<()>;

    /// Configures the hardware sample clock. An empty `source` selects the
    /// device's onboard clock.
    fn cfg_sample_clock(&self, source: &str, rate_hz: f64) -> Result<()>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Reads `samples_per_channel` samples for every analog lane into `buf`
    /// (length `lanes * samples_per_channel`). Returns the samples read per
    /// channel.
    fn read_analog(&self, samples_per_channel: usize, buf: &mut [f64]) -> Result<usize>;

    /// Digital counterpart of [`read_analog`](Self::read_analog), one byte
    /// per sample per line.
    fn read_digital(&self, samples_per_channel: usize, buf: &mut [u8]) -> Result<usize>;

    /// Writes one sample per digital output line, `values` indexed in
    /// channel-creation order. Returns samples written per channel.
    fn write_digital(&self, values: &[u8]) -> Result<usize>;
}

/// Entry point to the vendor binding.
pub trait Daq: Send + Sync {
    fn open_session(&self) -> Result<Arc<dyn DeviceSession>>;

    /// Enumerates devices visible to the vendor's system configuration.
    fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;
}
