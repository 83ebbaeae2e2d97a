//! Queue message envelope.

use uuid::Uuid;

/// A message travelling through a queue.
///
/// Requests carry a `correlation_id` and a `reply_to` queue; the reply to a
/// request carries the same `correlation_id` and is published to `reply_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_id: Uuid,
    pub queue: String,
    pub correlation_id: Option<Uuid>,
    pub reply_to: Option<String>,
    /// How many times this message was put back after a transient failure.
    pub redeliveries: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(queue: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            queue: queue.into(),
            correlation_id: None,
            reply_to: None,
            redeliveries: 0,
            payload,
        }
    }

    /// Tags the message as a request expecting a reply on `reply_to`.
    pub fn with_reply_to(mut self, correlation_id: Uuid, reply_to: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id);
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Builds the reply to this message, if it asked for one.
    pub fn reply(&self, payload: Vec<u8>) -> Option<Message> {
        let reply_to = self.reply_to.as_ref()?;
        let mut reply = Message::new(reply_to.clone(), payload);
        reply.correlation_id = self.correlation_id;
        Some(reply)
    }
}
