//! Durable queue transport.
//!
//! A transport provides publish, subscribe with a prefetch bound, and
//! per-delivery acknowledgement. Delivery is at-least-once: a delivery that is
//! dropped without being settled goes back onto its queue.

mod amqp;
mod memory;

pub use amqp::{retry_queue, AmqpTransport, REDELIVERIES_HEADER};
pub use memory::MemoryTransport;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::Message;

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Invalid prefetch count: {0}")]
    InvalidPrefetch(usize),

    #[error("Transport error: {0}")]
    Other(String),
}

/// A queueing backend.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Declares a durable queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&self, queue: &str) -> Result<(), TransportError>;

    /// Declares a private queue for one client's replies. Backends may tie
    /// its lifetime to the connection.
    async fn declare_reply_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.declare_queue(queue).await
    }

    /// Publishes a message to `message.queue`.
    async fn publish(&self, message: Message) -> Result<(), TransportError>;

    /// Subscribes to a queue. At most `prefetch` deliveries are handed out
    /// and left unsettled at any moment.
    async fn consume(&self, queue: &str, prefetch: usize) -> Result<Subscription, TransportError>;
}

/// Settles a delivery with the transport.
#[async_trait]
pub trait Acker: Send + 'static {
    async fn ack(self: Box<Self>) -> Result<(), TransportError>;

    /// Returns the message to its queue after `delay` with its redelivery
    /// count incremented.
    async fn requeue(self: Box<Self>, delay: Duration) -> Result<(), TransportError>;
}

/// Handle used to settle one delivery.
pub struct Acknowledger {
    inner: Box<dyn Acker>,
}

impl Acknowledger {
    pub fn new(inner: impl Acker) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    pub async fn ack(self) -> Result<(), TransportError> {
        self.inner.ack().await
    }

    pub async fn requeue(self, delay: Duration) -> Result<(), TransportError> {
        self.inner.requeue(delay).await
    }
}

/// A message handed out by a subscription, pending settlement.
pub struct Delivery {
    message: Message,
    acker: Acknowledger,
}

impl Delivery {
    pub fn new(message: Message, acker: Acknowledger) -> Self {
        Self { message, acker }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_parts(self) -> (Message, Acknowledger) {
        (self.message, self.acker)
    }

    pub async fn ack(self) -> Result<(), TransportError> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries from one queue. Dropping it cancels the consumer.
pub struct Subscription {
    queue: String,
    rx: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, rx: mpsc::Receiver<Delivery>) -> Self {
        Self {
            queue: queue.into(),
            rx,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Waits for the next delivery. `None` once the transport stops the
    /// subscription.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}
