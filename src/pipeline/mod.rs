//! Acquisition and control pipelines.
//!
//! A pipeline pairs a frame producer with a frame consumer across the
//! cluster boundary and owns the worker thread that shuttles between them.
//! `Source` and `Sink` are the seams hardware integrations implement; each
//! exposes one narrow capability so output tasks can compose into the same
//! acquisition machinery as input tasks (the state mirror is just another
//! `Source`).

mod acquisition;
mod control;

pub use acquisition::Acquisition;
pub use control::Control;

use crate::cluster::ChannelKey;
use crate::errors::{DriverError, Result};
use crate::telem::Frame;

/// Produces frames for an acquisition pipeline.
pub trait Source: Send {
    /// The full set of channels this source emits, index channels included,
    /// in frame column order.
    fn channel_keys(&self) -> Vec<ChannelKey>;

    /// Idempotent. After success the source is producing samples.
    fn start(&mut self) -> Result<()>;

    /// Idempotent. After success the source is quiescent and its hardware
    /// handle is released.
    fn stop(&mut self) -> Result<()>;

    /// Returns the next frame, blocking until samples are available or a
    /// stop is requested. Never returns a partial frame: every series has
    /// the same length, or the call errors.
    fn read(&mut self) -> Result<Frame>;

    /// Invoked once when the pipeline terminates on a fatal error, before
    /// the final `stop`.
    fn stopped_with_err(&mut self, _err: &DriverError) {}
}

/// Consumes command frames for a control pipeline.
pub trait Sink: Send {
    /// Idempotent; readies the hardware for writes.
    fn start(&mut self) -> Result<()>;

    /// Idempotent; releases the hardware.
    fn stop(&mut self) -> Result<()>;

    /// Applies one frame as an atomic command batch.
    fn write(&mut self, frame: Frame) -> Result<()>;

    /// The command channels this sink listens on.
    fn cmd_channel_keys(&self) -> Vec<ChannelKey>;

    /// The state channels (plus their index) this sink acknowledges on.
    fn state_channel_keys(&self) -> Vec<ChannelKey>;
}
