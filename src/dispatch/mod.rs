//! Bounded dispatch queue and the fixed pool of broadcast workers.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::message::{DisplayMessage, QueueMessage};
use crate::registry::Registry;

/// Default number of broadcast workers.
pub const DEFAULT_WORKERS: usize = 3;

/// Default dispatch queue capacity; the queue consumer blocks when full.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 100;

/// Receiving end of the dispatch queue, shared by the worker pool.
pub type DispatchQueue = Arc<Mutex<mpsc::Receiver<QueueMessage>>>;

/// Create the bounded hand-off queue between the consumer and the workers.
pub fn dispatch_queue(capacity: usize) -> (mpsc::Sender<QueueMessage>, DispatchQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, Arc::new(Mutex::new(rx)))
}

/// Spawn the fixed worker pool. Workers run until the dispatch queue closes.
pub fn spawn_workers(
    count: usize,
    registry: Arc<Registry>,
    queue: DispatchQueue,
) -> Vec<JoinHandle<()>> {
    (1..=count)
        .map(|id| tokio::spawn(run_worker(id, registry.clone(), queue.clone())))
        .collect()
}

/// One worker: take a message, fan it out, repeat.
pub async fn run_worker(id: usize, registry: Arc<Registry>, queue: DispatchQueue) {
    loop {
        // Waiting holds the queue lock, so idle workers line up behind the
        // one currently waiting; each message still goes to exactly one
        // worker, and broadcasts themselves run concurrently.
        let message = { queue.lock().await.recv().await };
        let Some(message) = message else { break };
        tracing::debug!("Worker {} took message for chat {}", id, message.chat_id);
        broadcast(id, &registry, &message).await;
    }
    tracing::info!("Worker {} stopped", id);
}

/// Fan one message out to every connection of its target chat.
///
/// A missing chat means it was deleted after the message was queued; the
/// message is discarded silently. A write failure on one connection is
/// logged and never aborts the rest of the fan-out; removing a dead
/// connection is its own receive loop's job, not the worker's.
pub async fn broadcast(worker_id: usize, registry: &Registry, message: &QueueMessage) {
    let Some(connections) = registry.connections_for(message.chat_id).await else {
        tracing::debug!(
            "Worker {}: chat {} is gone, dropping message",
            worker_id,
            message.chat_id
        );
        return;
    };

    let frame = match serde_json::to_string(&DisplayMessage::from_queued(message)) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!("Worker {}: failed to encode frame: {}", worker_id, e);
            return;
        }
    };

    for connection in &connections {
        if let Err(e) = connection.send(frame.clone()) {
            tracing::warn!("Worker {}: write failed: {}", worker_id, e);
        }
    }
    tracing::debug!(
        "Worker {} broadcast to {} connection(s) in chat {}",
        worker_id,
        connections.len(),
        message.chat_id
    );
}
