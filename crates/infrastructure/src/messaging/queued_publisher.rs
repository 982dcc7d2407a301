use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use domain::event::{EventPublisher, GatewayEvent, PublishError};

use super::aggregating_queue::AggregatingQueue;

/// Absorbs bursts in front of a slow publisher.
///
/// `publish` only enqueues. A background flusher pops coalesced events and
/// hands them to the downstream publisher one at a time.
pub struct QueuedPublisher {
    queue: Arc<AggregatingQueue<GatewayEvent>>,
    downstream: Arc<dyn EventPublisher>,
    cancel_token: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedPublisher {
    pub fn new(downstream: Arc<dyn EventPublisher>, soft_capacity: usize) -> Self {
        let queue = Arc::new(AggregatingQueue::with_soft_capacity(soft_capacity));
        let cancel_token = CancellationToken::new();
        let flusher = tokio::spawn(run_flusher(
            queue.clone(),
            downstream.clone(),
            cancel_token.clone(),
        ));

        Self {
            queue,
            downstream,
            cancel_token,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    /// Stops the flusher and forwards whatever is still queued.
    pub async fn stop(&self) {
        self.cancel_token.cancel();
        if let Some(flusher) = self.flusher.lock().await.take() {
            if let Err(e) = flusher.await {
                warn!(error = %e, "Queue flusher ended abnormally");
            }
        }

        let remaining = self.queue.drain();
        if !remaining.is_empty() {
            info!(count = remaining.len(), "Flushing queued events");
        }
        for event in remaining {
            forward(self.downstream.as_ref(), event).await;
        }
    }
}

async fn run_flusher(
    queue: Arc<AggregatingQueue<GatewayEvent>>,
    downstream: Arc<dyn EventPublisher>,
    cancel_token: CancellationToken,
) {
    debug!("Starting queue flusher");
    while let Ok(event) = queue.pop(&cancel_token).await {
        forward(downstream.as_ref(), event).await;
    }
    debug!("Queue flusher stopped");
}

async fn forward(downstream: &dyn EventPublisher, event: GatewayEvent) {
    let kind = event.event_type().to_string();
    let device_id = event.device_id().to_string();
    if let Err(e) = downstream.publish(event).await {
        warn!(device_id = %device_id, event = %kind, error = %e, "Dropping event, downstream publish failed");
    }
}

#[async_trait]
impl EventPublisher for QueuedPublisher {
    async fn publish(&self, event: GatewayEvent) -> Result<(), PublishError> {
        self.queue.push(event);
        Ok(())
    }
}
