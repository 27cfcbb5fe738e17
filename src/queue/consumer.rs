//! Bridge from the durable queue to the in-process dispatch queue.

use tokio::sync::mpsc;

use crate::message::QueueMessage;

use super::{QueueDelivery, QueueSubscriber};

/// Drain a subscription into the dispatch queue.
///
/// Every delivery is decoded and handed to the dispatch queue *before* it is
/// acknowledged; a crash in between leaves the record unacknowledged and the
/// queue redelivers it to another consumer, giving at-least-once delivery
/// across the whole pipeline. Undecodable payloads are acknowledged and
/// dropped so they are not redelivered forever. `send` on a full dispatch
/// queue waits, which backpressures into the queue's own flow control.
pub async fn run_consumer<S: QueueSubscriber>(
    mut subscriber: S,
    dispatch: mpsc::Sender<QueueMessage>,
) {
    while let Some(delivery) = subscriber.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::warn!("Failed to receive delivery: {}", e);
                continue;
            }
        };

        let message: QueueMessage = match serde_json::from_slice(delivery.payload()) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping undecodable record: {}", e);
                if let Err(e) = delivery.ack().await {
                    tracing::warn!("Failed to acknowledge poison record: {}", e);
                }
                continue;
            }
        };

        let chat_id = message.chat_id;
        if dispatch.send(message).await.is_err() {
            // Dispatch queue closed: we are shutting down. Leave the record
            // unacknowledged so another consumer instance picks it up.
            tracing::warn!(
                "Dispatch queue closed, leaving record for chat {} unacknowledged",
                chat_id
            );
            return;
        }

        if let Err(e) = delivery.ack().await {
            tracing::warn!("Failed to acknowledge delivery for chat {}: {}", chat_id, e);
        }
    }
    tracing::info!("Queue subscription ended");
}
