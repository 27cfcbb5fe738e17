//! NATS JetStream implementation of the queue seam.
//!
//! Records are published to a work-queue stream and consumed through a named
//! durable pull consumer, so multiple server instances sharing the consumer
//! name compete for deliveries.

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull;
use async_nats::jetstream::stream::RetentionPolicy;
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::message::QueueMessage;

use super::{
    CONSUMER_NAME, MessagePublisher, QueueDelivery, QueueError, QueueSubscriber, STREAM_NAME,
    STREAM_SUBJECTS, SUBJECT,
};

/// Connection to the JetStream-backed queue.
pub struct JetStreamQueue {
    context: jetstream::Context,
}

impl JetStreamQueue {
    /// Connect to the NATS server and ensure the chat stream exists.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;
        let context = jetstream::new(client);

        context
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![STREAM_SUBJECTS.to_string()],
                retention: RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;

        tracing::info!("Connected to NATS at {}", url);
        Ok(Self { context })
    }

    /// Bind the named durable consumer and open its delivery stream.
    pub async fn subscriber(&self) -> Result<JetStreamSubscriber, QueueError> {
        let stream = self
            .context
            .get_stream(STREAM_NAME)
            .await
            .map_err(|e| QueueError::Subscribe(e.to_string()))?;
        let consumer = stream
            .get_or_create_consumer(
                CONSUMER_NAME,
                pull::Config {
                    durable_name: Some(CONSUMER_NAME.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| QueueError::Subscribe(e.to_string()))?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| QueueError::Subscribe(e.to_string()))?;
        Ok(JetStreamSubscriber { messages })
    }
}

#[async_trait]
impl MessagePublisher for JetStreamQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let payload =
            serde_json::to_vec(message).map_err(|e| QueueError::Publish(e.to_string()))?;
        self.context
            .publish(SUBJECT, payload.into())
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        Ok(())
    }
}

/// Delivery stream for one consumer-group member.
pub struct JetStreamSubscriber {
    messages: pull::Stream,
}

#[async_trait]
impl QueueSubscriber for JetStreamSubscriber {
    type Delivery = JetStreamDelivery;

    async fn next(&mut self) -> Option<Result<JetStreamDelivery, QueueError>> {
        self.messages.next().await.map(|result| {
            result
                .map(JetStreamDelivery)
                .map_err(|e| QueueError::Receive(e.to_string()))
        })
    }
}

/// One JetStream delivery pending double acknowledgment.
pub struct JetStreamDelivery(jetstream::Message);

#[async_trait]
impl QueueDelivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        &self.0.payload
    }

    /// Two-phase acknowledgment: waits for the server to confirm the ack, so
    /// a crash before this point means redelivery rather than loss.
    async fn ack(&self) -> Result<(), QueueError> {
        self.0
            .double_ack()
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }
}
