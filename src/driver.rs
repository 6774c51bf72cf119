//! Process composition: one task manager plus one heartbeat per rack.

use crate::breaker;
use crate::cluster::{Client, RackKey};
use crate::errors::Result;
use crate::heartbeat::Heartbeat;
use crate::task::{Factory, Manager};
use std::sync::Arc;
use tracing::info;

pub struct Driver {
    manager: Manager,
    heartbeat: Heartbeat,
}

impl Driver {
    pub fn new(
        rack_key: RackKey,
        client: Arc<dyn Client>,
        factory: Box<dyn Factory>,
        breaker_config: breaker::Config,
    ) -> Self {
        Driver {
            manager: Manager::new(
                rack_key,
                Arc::clone(&client),
                factory,
                breaker_config.child("task.manager"),
            ),
            heartbeat: Heartbeat::new(rack_key, client),
        }
    }

    /// Starts the manager, then the heartbeat. If the heartbeat fails to
    /// start the manager is torn down again so the driver never runs half
    /// composed.
    pub fn start(&mut self) -> Result<()> {
        self.manager.start()?;
        if let Err(err) = self.heartbeat.start() {
            let _ = self.manager.stop();
            return Err(err);
        }
        info!("driver started; waiting for control-plane events");
        Ok(())
    }

    /// Stops both halves and surfaces the manager loop's terminal error.
    pub fn stop(&mut self) -> Result<()> {
        self.heartbeat.stop();
        self.manager.stop()
    }
}
