//! In-process transport.
//!
//! Queues live in memory for the lifetime of the transport. Every consumer
//! gets its own prefetch semaphore; a permit travels with each delivery and is
//! released when the delivery is settled or dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use super::{Acker, Acknowledger, Delivery, Subscription, Transport, TransportError};
use crate::message::Message;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct QueueState {
    ready: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl QueueState {
    fn push(&self, message: Message) {
        lock(&self.ready).push_back(message);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Message {
        loop {
            if let Some(message) = lock(&self.ready).pop_front() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    fn len(&self) -> usize {
        lock(&self.ready).len()
    }
}

/// Transport whose queues are held in process memory.
///
/// Clones share the same queues. Queues are created on first use, so
/// publishing before any consumer is attached keeps the message.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    queues: Arc<Mutex<HashMap<String, Arc<QueueState>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &str) -> Arc<QueueState> {
        lock(&self.queues)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Number of messages waiting on a queue, excluding handed-out deliveries.
    pub fn depth(&self, queue: &str) -> usize {
        lock(&self.queues).get(queue).map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn declare_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.queue(queue);
        debug!(queue = %queue, "Queue declared");
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), TransportError> {
        trace!(queue = %message.queue, message_id = %message.message_id, "Publishing message");
        self.queue(&message.queue).push(message);
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: usize) -> Result<Subscription, TransportError> {
        if prefetch == 0 {
            return Err(TransportError::InvalidPrefetch(prefetch));
        }

        let state = self.queue(queue);
        let permits = Arc::new(Semaphore::new(prefetch));
        let (tx, rx) = mpsc::channel(prefetch);

        tokio::spawn(async move {
            loop {
                let permit = tokio::select! {
                    permit = permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                    _ = tx.closed() => break,
                };

                let message = tokio::select! {
                    message = state.pop() => message,
                    _ = tx.closed() => break,
                };

                let acker = MemoryAcker {
                    queue: state.clone(),
                    message: Some(message.clone()),
                    permit: Some(permit),
                };
                let delivery = Delivery::new(message, Acknowledger::new(acker));

                // On failure the rejected delivery is dropped here, which puts
                // its message back on the queue.
                if tx.send(delivery).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(queue, rx))
    }
}

struct MemoryAcker {
    queue: Arc<QueueState>,
    message: Option<Message>,
    permit: Option<OwnedSemaphorePermit>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(mut self: Box<Self>) -> Result<(), TransportError> {
        self.message = None;
        self.permit = None;
        Ok(())
    }

    async fn requeue(mut self: Box<Self>, delay: Duration) -> Result<(), TransportError> {
        self.permit = None;
        let Some(mut message) = self.message.take() else {
            return Ok(());
        };
        message.redeliveries += 1;

        let queue = self.queue.clone();
        if delay.is_zero() {
            queue.push(message);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.push(message);
            });
        }
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            debug!(message_id = %message.message_id, "Unsettled delivery returned to queue");
            self.queue.push(message);
        }
    }
}
