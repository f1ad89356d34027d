//! Wire-level loopback to a simulated kernel

use super::SimulatedKernel;
use crate::channel::CorrelatedChannel;
use crate::config::EngineConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Connect a [`CorrelatedChannel`] to `kernel` through the wire envelope
///
/// Every request is answered on its own task, so responses can arrive out
/// of order when the kernel has latency. The loop ends once the returned
/// channel is dropped.
#[must_use]
pub fn spawn_loopback(
    kernel: Arc<SimulatedKernel>,
    config: &EngineConfig,
) -> (Arc<CorrelatedChannel>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(config.channel_buffer);
    let channel = Arc::new(CorrelatedChannel::new(tx, config.channel_timeout()));
    let weak = Arc::downgrade(&channel);

    let task = tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let kernel = kernel.clone();
            let channel = weak.clone();
            tokio::spawn(async move {
                let response = kernel.handle(request).await;
                if let Some(channel) = channel.upgrade() {
                    channel.dispatch(response);
                }
            });
        }
        tracing::debug!("loopback transport closed");
    });

    (channel, task)
}
