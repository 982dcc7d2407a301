pub mod aggregating_queue;
pub mod mqtt_client;
pub mod mqtt_connector;
pub mod queued_publisher;

pub use aggregating_queue::AggregatingQueue;
pub use queued_publisher::QueuedPublisher;
