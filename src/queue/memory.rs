//! In-process queue implementation.
//!
//! Carries the same at-least-once, explicit-acknowledgment contract as the
//! JetStream implementation, for single-instance runs and for tests: records
//! stay pending until acknowledged, and delivered-but-unacknowledged records
//! can be returned to the pending state the way a real queue redelivers them.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::message::QueueMessage;

use super::{MessagePublisher, QueueDelivery, QueueError, QueueSubscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Pending,
    Delivered,
    Acked,
}

#[derive(Debug)]
struct Record {
    seq: u64,
    payload: Vec<u8>,
    state: RecordState,
}

#[derive(Default)]
struct Inner {
    records: VecDeque<Record>,
    next_seq: u64,
    /// Running total of acknowledged records; they are purged from
    /// `records`, so a scan cannot count them.
    acked: u64,
    closed: bool,
}

/// Shared in-process queue. Clones refer to the same queue.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw payload, bypassing record encoding.
    pub async fn publish_raw(&self, payload: Vec<u8>) {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.records.push_back(Record {
            seq,
            payload,
            state: RecordState::Pending,
        });
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Open a delivery stream over this queue.
    pub fn subscriber(&self) -> MemorySubscriber {
        MemorySubscriber {
            queue: self.clone(),
        }
    }

    /// End all subscriptions once everything pending has been delivered.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Return delivered-but-unacknowledged records to pending, as a queue
    /// does when a consumer dies before acknowledging.
    pub async fn redeliver_unacked(&self) {
        let mut inner = self.inner.lock().await;
        for record in inner.records.iter_mut() {
            if record.state == RecordState::Delivered {
                record.state = RecordState::Pending;
            }
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    pub async fn acked_count(&self) -> u64 {
        self.inner.lock().await.acked
    }

    /// Records delivered to a subscriber but not yet acknowledged.
    pub async fn unacked_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .records
            .iter()
            .filter(|r| r.state == RecordState::Delivered)
            .count()
    }

    async fn next_pending(&self) -> Option<(u64, Vec<u8>)> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking state, so a publish racing with the
            // check still wakes this waiter.
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().await;
                if let Some(record) = inner
                    .records
                    .iter_mut()
                    .find(|r| r.state == RecordState::Pending)
                {
                    record.state = RecordState::Delivered;
                    return Some((record.seq, record.payload.clone()));
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, seq: u64) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        if let Some(record) = inner.records.iter_mut().find(|r| r.seq == seq) {
            if record.state != RecordState::Acked {
                record.state = RecordState::Acked;
                inner.acked += 1;
            }
        }
        // Acknowledged records are done; drop them so the backlog only holds
        // pending and delivered-but-unacked ones. Purging stops at the first
        // record still awaiting its acknowledgment, which must stay in place
        // for redelivery.
        while inner
            .records
            .front()
            .is_some_and(|r| r.state == RecordState::Acked)
        {
            inner.records.pop_front();
        }
    }
}

#[async_trait]
impl MessagePublisher for MemoryQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let payload =
            serde_json::to_vec(message).map_err(|e| QueueError::Publish(e.to_string()))?;
        self.publish_raw(payload).await;
        Ok(())
    }
}

/// Delivery stream over a [`MemoryQueue`].
pub struct MemorySubscriber {
    queue: MemoryQueue,
}

#[async_trait]
impl QueueSubscriber for MemorySubscriber {
    type Delivery = MemoryDelivery;

    async fn next(&mut self) -> Option<Result<MemoryDelivery, QueueError>> {
        self.queue
            .next_pending()
            .await
            .map(|(seq, payload)| {
                Ok(MemoryDelivery {
                    seq,
                    payload,
                    queue: self.queue.clone(),
                })
            })
    }
}

/// One delivery pending acknowledgment.
pub struct MemoryDelivery {
    seq: u64,
    payload: Vec<u8>,
    queue: MemoryQueue,
}

#[async_trait]
impl QueueDelivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.queue.ack(self.seq).await;
        Ok(())
    }
}
