//! Durable queue seam.
//!
//! Defines the producer and consumer interfaces the rest of the engine is
//! written against, plus the consumer loop bridging deliveries into the
//! in-process dispatch queue. Implementations:
//!
//! - `jetstream`: NATS JetStream (durable, survives restarts)
//! - `memory`: in-process queue with the same at-least-once contract

mod consumer;
pub mod jetstream;
pub mod memory;

pub use consumer::run_consumer;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::QueueMessage;

/// Stream holding every published chat record.
pub const STREAM_NAME: &str = "EVENTS";

/// Subject namespace captured by the stream.
pub const STREAM_SUBJECTS: &str = "events.>";

/// Subject chat records are published under.
pub const SUBJECT: &str = "events.chat";

/// Durable consumer name; instances sharing it compete for deliveries.
pub const CONSUMER_NAME: &str = "chat-dispatch";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to connect to queue: {0}")]
    Connect(String),
    #[error("failed to publish record: {0}")]
    Publish(String),
    #[error("failed to subscribe: {0}")]
    Subscribe(String),
    #[error("failed to receive delivery: {0}")]
    Receive(String),
    #[error("failed to acknowledge delivery: {0}")]
    Ack(String),
}

/// Producer side of the durable queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish one record and wait for the queue to accept it.
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError>;
}

/// One at-least-once delivery.
///
/// Acknowledging is a separate, explicit step so the consumer can hand the
/// record off before confirming it; an unacknowledged delivery comes back.
#[async_trait]
pub trait QueueDelivery: Send {
    fn payload(&self) -> &[u8];

    /// Confirm the delivery. Acknowledging the same delivery twice must
    /// succeed (or be a no-op).
    async fn ack(&self) -> Result<(), QueueError>;
}

/// Consumer side of the durable queue: the delivery stream seen by one
/// member of the consumer group.
#[async_trait]
pub trait QueueSubscriber: Send {
    type Delivery: QueueDelivery;

    /// Wait for the next delivery. `None` means the subscription ended.
    async fn next(&mut self) -> Option<Result<Self::Delivery, QueueError>>;
}
