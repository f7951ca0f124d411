use async_trait::async_trait;
use std::time::Duration;

use crate::swallow_panic;

/// A periodic background job. Every iteration is panic-isolated, so one
/// poisoned run never kills the loop.
#[async_trait]
pub trait Worker: Send {
    async fn run(&mut self);

    /// Pause between runs. An instance method so the interval can be
    /// configured per worker rather than fixed per type.
    fn interval(&self) -> Duration;
}

pub fn start<W: Worker + 'static>(mut worker: W) {
    tokio::spawn(async move {
        loop {
            swallow_panic(worker.run()).await;
            tokio::time::sleep(worker.interval()).await;
        }
    });
}
