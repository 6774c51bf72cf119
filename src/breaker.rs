//! Exponential-backoff retry gate.
//!
//! Each long-lived loop (the task manager, every pipeline) owns one breaker;
//! it is consulted only for transport-unreachable errors. The backoff sleep
//! runs on a condition variable so shutdown can interrupt it instead of
//! waiting out the remainder of the interval.

use crate::errors::DriverError;
use crate::telem::TimeSpan;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::warn;

/// Breaker tuning: the wait after attempt `n` is `base_interval * scale^n`,
/// for at most `max_retries` attempts.
#[derive(Clone, Debug)]
pub struct Config {
    pub name: String,
    pub base_interval: TimeSpan,
    pub max_retries: u32,
    pub scale: f64,
}

impl Config {
    /// Derives a config for a subsystem, e.g. `"driver" -> "driver.task.manager"`.
    pub fn child(&self, name: &str) -> Config {
        Config {
            name: format!("{}.{}", self.name, name),
            ..self.clone()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: "breaker".to_string(),
            base_interval: TimeSpan::SECOND,
            max_retries: 20,
            scale: 1.2,
        }
    }
}

#[derive(Default)]
struct Shared {
    lock: Mutex<bool>, // true once interrupted
    signal: Condvar,
}

/// Wakes a breaker out of its backoff sleep from another thread. Once
/// interrupted, every subsequent `wait` returns `false` until `start` is
/// called again.
#[derive(Clone)]
pub struct BreakerHandle(Arc<Shared>);

impl BreakerHandle {
    pub fn interrupt(&self) {
        let mut interrupted = self.0.lock.lock();
        *interrupted = true;
        self.0.signal.notify_all();
    }
}

pub struct Breaker {
    config: Config,
    attempt: u32,
    shared: Arc<Shared>,
}

impl Breaker {
    pub fn new(config: Config) -> Self {
        Breaker {
            config,
            attempt: 0,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn handle(&self) -> BreakerHandle {
        BreakerHandle(Arc::clone(&self.shared))
    }

    /// Arms the breaker, clearing any previous interruption.
    pub fn start(&mut self) {
        *self.shared.lock.lock() = false;
    }

    /// Returns the attempt counter to zero. Called after a successful
    /// re-open so the next outage starts from the base interval.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Sleeps for the current backoff interval and advances the attempt
    /// counter. Returns `false` once the retry budget is exhausted or the
    /// breaker was interrupted, in which case no (further) sleep occurs.
    pub fn wait(&mut self, err: &DriverError) -> bool {
        if self.attempt >= self.config.max_retries {
            warn!(
                "[{}] exceeded {} retries, giving up: {}",
                self.config.name, self.config.max_retries, err
            );
            return false;
        }
        let interval = TimeSpan(
            (self.config.base_interval.nanos() as f64 * self.config.scale.powi(self.attempt as i32))
                as i64,
        );
        self.attempt += 1;
        warn!(
            "[{}] retry {}/{} in {:?}: {}",
            self.config.name,
            self.attempt,
            self.config.max_retries,
            interval.as_duration(),
            err
        );
        let mut interrupted = self.shared.lock.lock();
        if *interrupted {
            return false;
        }
        self.shared
            .signal
            .wait_for(&mut interrupted, interval.as_duration());
        !*interrupted
    }
}
