//! DAQ-card task integration: hardware-bound sources and sinks, the device
//! scanner, and the factory that assembles them into runtime tasks.
//!
//! Shared here: reader config parsing, index-channel resolution against the
//! cluster, and the batch-to-frame assembly (timestamp interpolation plus
//! lane copying) used by both the analog and digital read sources.

pub mod analog_read;
pub mod digital_read;
pub mod digital_write;
pub mod scanner;
pub mod task;

pub use analog_read::AnalogReadSource;
pub use digital_read::DigitalReadSource;
pub use digital_write::{DigitalWriteSink, StateSource};
pub use scanner::ScannerTask;
pub use task::{DaqFactory, ReaderTask, WriterTask};

use crate::cluster::{ChannelKey, Client, TaskKey, TaskSpec};
use crate::config::Parser;
use crate::errors::{DriverError, Result};
use crate::telem::{DataType, Frame, Series, TimeStamp};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const ANALOG_READ_TYPE: &str = "daq_analog_read";
pub const DIGITAL_READ_TYPE: &str = "daq_digital_read";
pub const DIGITAL_WRITE_TYPE: &str = "daq_digital_write";
pub const SCAN_TYPE: &str = "daq_scan";

/// Channel kind tag for synthesized timestamp columns.
pub const INDEX_KIND: &str = "index";

/// One channel of a read task, after parsing and cluster resolution.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub key: ChannelKey,
    /// Physical name handed to the vendor, e.g. `"Dev1/ai0"`.
    pub name: String,
    /// Vendor channel flavour (`"ai_voltage"`, ...), or [`INDEX_KIND`].
    pub kind: String,
    pub data_type: DataType,
    /// Flavour-specific options passed through to the vendor binding.
    pub extra: Value,
}

#[derive(Clone, Debug)]
pub struct ReaderConfig {
    pub device_key: String,
    pub device_name: String,
    pub task_name: String,
    pub task_key: TaskKey,
    pub sample_rate: u64,
    pub stream_rate: u64,
    pub timing_source: String,
    /// Data channels in config order, index channels appended after
    /// resolution. This is frame column order.
    pub channels: Vec<ChannelConfig>,
}

impl ReaderConfig {
    /// Samples requested from the vendor per channel per frame, sized so
    /// frames leave at the stream rate.
    pub fn samples_per_channel(&self) -> usize {
        (self.sample_rate / self.stream_rate.max(1)) as usize
    }

    pub fn channel_keys(&self) -> Vec<ChannelKey> {
        self.channels.iter().map(|c| c.key).collect()
    }

    pub fn data_channels(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.iter().filter(|c| c.kind != INDEX_KIND)
    }

    pub fn data_channel_count(&self) -> usize {
        self.data_channels().count()
    }
}

pub(crate) enum ReadFlavor {
    Analog,
    Digital,
}

/// Parses the shared portion of a read-task config blob. Rate rules are
/// recorded on the parser so they surface in the same path-keyed error map
/// as field errors. Disabled channels are dropped here and never reach the
/// vendor or the frame layout.
pub(crate) fn parse_reader_config(
    client: &Arc<dyn Client>,
    spec: &TaskSpec,
    parser: &mut Parser,
    flavor: ReadFlavor,
) -> ReaderConfig {
    let sample_rate: u64 = parser.required("sample_rate");
    let stream_rate: u64 = parser.required("stream_rate");
    let device_key: String = parser.required("device");
    let timing_source: String = parser.optional("timing_source", "none".to_string());

    if sample_rate == 0 {
        parser.record("sample_rate", "sample rate must be positive");
    }
    if stream_rate == 0 {
        parser.record("stream_rate", "stream rate must be positive");
    } else if stream_rate > sample_rate {
        parser.record(
            "stream_rate",
            "stream rate must be less than or equal to sample rate",
        );
    } else if sample_rate % stream_rate != 0 {
        parser.record("stream_rate", "stream rate must divide sample rate");
    }

    let device_name = match client.retrieve_device(&device_key) {
        Ok(device) => device.location,
        Err(err) => {
            parser.record("device", format!("failed to retrieve device: {err}"));
            String::new()
        }
    };

    let mut channels = Vec::new();
    parser.iter("channels", |cp| {
        let enabled: bool = cp.optional("enabled", true);
        let key: ChannelKey = cp.required("channel");
        let (name, kind) = match flavor {
            ReadFlavor::Analog => {
                let port: u64 = cp.required("port");
                (
                    format!("{device_name}/ai{port}"),
                    cp.required::<String>("type"),
                )
            }
            ReadFlavor::Digital => {
                let port: u64 = cp.required("port");
                let line: u64 = cp.required("line");
                (
                    format!("{device_name}/port{port}/line{line}"),
                    "di".to_string(),
                )
            }
        };
        if !enabled {
            return;
        }
        channels.push(ChannelConfig {
            key,
            name,
            kind,
            data_type: match flavor {
                ReadFlavor::Analog => DataType::Float32,
                ReadFlavor::Digital => DataType::Uint8,
            },
            extra: cp.value().clone(),
        });
    });
    if channels.is_empty() {
        parser.record("channels", "at least one enabled channel is required");
    }

    ReaderConfig {
        device_key,
        device_name,
        task_name: spec.name.clone(),
        task_key: spec.key,
        sample_rate,
        stream_rate,
        timing_source,
        channels,
    }
}

/// Resolves each data channel against the cluster to learn its data type
/// and index channel, then appends one index `ChannelConfig` per distinct
/// index, in key order.
pub(crate) fn resolve_index_channels(
    client: &Arc<dyn Client>,
    channels: &mut Vec<ChannelConfig>,
) -> Result<()> {
    let mut index_keys = BTreeSet::new();
    for channel in channels.iter_mut() {
        let info = client.retrieve_channel(channel.key).map_err(|err| {
            DriverError::Configuration(format!(
                "failed to retrieve channel {}: {err}",
                channel.key
            ))
        })?;
        channel.data_type = info.data_type;
        if info.index != 0 {
            index_keys.insert(info.index);
        }
    }
    for key in index_keys {
        let info = client.retrieve_channel(key).map_err(|err| {
            DriverError::Configuration(format!("failed to retrieve index channel {key}: {err}"))
        })?;
        channels.push(ChannelConfig {
            key,
            name: info.name,
            kind: INDEX_KIND.to_string(),
            data_type: DataType::Timestamp,
            extra: Value::Null,
        });
    }
    Ok(())
}

/// Raw vendor payload of one acquirer iteration, grouped by channel.
#[derive(Clone, Debug)]
pub enum Payload {
    Analog(Vec<f64>),
    Digital(Vec<u8>),
}

/// One vendor read bracketed by wall-clock captures: `t0` immediately
/// before the call, `tf` immediately after.
#[derive(Clone, Debug)]
pub struct SampleBatch {
    pub payload: Payload,
    pub t0: TimeStamp,
    pub tf: TimeStamp,
    /// Samples actually read per channel.
    pub samples_per_channel: usize,
    /// Lane stride within the payload (samples requested per channel).
    pub stride: usize,
}

/// Synthesizes the time axis for a batch by linear interpolation between
/// `t0` and `tf`. When `tf == t0` (possible on very fast reads) every
/// timestamp equals `t0`.
pub(crate) fn interpolate_timestamps(t0: TimeStamp, tf: TimeStamp, n: usize) -> Vec<TimeStamp> {
    if n == 0 {
        return Vec::new();
    }
    let incr = (tf - t0).nanos() / n as i64;
    (0..n).map(|i| t0 + crate::telem::TimeSpan(incr * i as i64)).collect()
}

/// Builds the frame for one batch: a timestamp series for every index
/// channel and a lane copy (in the channel's data type) for every data
/// channel, in `channels` order. Every series has the same length.
pub(crate) fn assemble_frame(channels: &[ChannelConfig], batch: &SampleBatch) -> Frame {
    let n = batch.samples_per_channel;
    let timestamps = interpolate_timestamps(batch.t0, batch.tf, n);
    let mut frame = Frame::with_capacity(channels.len());
    let mut lane = 0usize;
    for channel in channels {
        if channel.kind == INDEX_KIND {
            frame.push(channel.key, timestamps.clone());
            continue;
        }
        let offset = lane * batch.stride;
        let series = match &batch.payload {
            Payload::Analog(data) => {
                let samples = &data[offset..offset + n];
                match channel.data_type {
                    DataType::Float64 => Series::Float64(samples.to_vec()),
                    _ => Series::Float32(samples.iter().map(|v| *v as f32).collect()),
                }
            }
            Payload::Digital(data) => Series::Uint8(data[offset..offset + n].to_vec()),
        };
        frame.push(channel.key, series);
        lane += 1;
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_brackets_batch() {
        let t0 = TimeStamp(1_000);
        let tf = TimeStamp(2_000);
        let ts = interpolate_timestamps(t0, tf, 10);
        assert_eq!(ts.len(), 10);
        assert_eq!(ts[0], t0);
        assert!(ts.windows(2).all(|w| w[1] >= w[0]));
        assert!(*ts.last().unwrap() <= tf);
        assert_eq!(ts[1] - ts[0], crate::telem::TimeSpan(100));
    }

    #[test]
    fn test_interpolation_tie_break() {
        let t0 = TimeStamp(5_000);
        let ts = interpolate_timestamps(t0, t0, 4);
        assert!(ts.iter().all(|t| *t == t0));
    }

    #[test]
    fn test_assemble_frame_layout() {
        let channels = vec![
            ChannelConfig {
                key: 42,
                name: "Dev1/ai0".into(),
                kind: "ai_voltage".into(),
                data_type: DataType::Float32,
                extra: Value::Null,
            },
            ChannelConfig {
                key: 43,
                name: "time".into(),
                kind: INDEX_KIND.into(),
                data_type: DataType::Timestamp,
                extra: Value::Null,
            },
        ];
        let batch = SampleBatch {
            payload: Payload::Analog(vec![0.5, 1.5, 2.5]),
            t0: TimeStamp(0),
            tf: TimeStamp(300),
            samples_per_channel: 3,
            stride: 3,
        };
        let frame = assemble_frame(&channels, &batch);
        assert_eq!(frame.channels(), &[42, 43]);
        assert!(frame.is_aligned());
        assert_eq!(frame.get(42).unwrap().float32().unwrap(), &[0.5, 1.5, 2.5]);
        assert_eq!(frame.get(43).unwrap().timestamps().unwrap().len(), 3);
    }

    #[test]
    fn test_assemble_frame_multi_lane_digital() {
        let channels = vec![
            ChannelConfig {
                key: 1,
                name: "l0".into(),
                kind: "di".into(),
                data_type: DataType::Uint8,
                extra: Value::Null,
            },
            ChannelConfig {
                key: 2,
                name: "l1".into(),
                kind: "di".into(),
                data_type: DataType::Uint8,
                extra: Value::Null,
            },
        ];
        let batch = SampleBatch {
            payload: Payload::Digital(vec![1, 0, 1, 1]),
            t0: TimeStamp(0),
            tf: TimeStamp(4),
            samples_per_channel: 2,
            stride: 2,
        };
        let frame = assemble_frame(&channels, &batch);
        assert_eq!(frame.get(1).unwrap().uint8().unwrap(), &[1, 0]);
        assert_eq!(frame.get(2).unwrap().uint8().unwrap(), &[1, 1]);
    }
}
