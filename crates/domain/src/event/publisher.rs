use crate::event::GatewayEvent;
use async_trait::async_trait;

pub type PublishError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: GatewayEvent) -> Result<(), PublishError>;

    async fn publish_batch(&self, events: Vec<GatewayEvent>) -> Result<(), PublishError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}
