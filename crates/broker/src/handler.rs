//! Queue handlers.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::Span;
use uuid::Uuid;
use validator::Validate;

use crate::message::Message;
use crate::reply::{Failure, FailureCode, Reply};

/// Name of the delivery span field holding the tenant subdomain.
pub const SUBDOMAIN_FIELD: &str = "subdomain";

/// Per-delivery metadata visible to middleware and handlers.
///
/// Carries the delivery span so handlers can attach fields learned from the
/// decoded payload to every event of this delivery.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub queue: String,
    pub message_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub redeliveries: u32,
    pub span: Span,
}

impl MessageContext {
    /// 1-based attempt number of this delivery.
    pub fn attempt(&self) -> u32 {
        self.redeliveries + 1
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Records the tenant on the delivery span.
    pub fn record_subdomain(&self, subdomain: &str) {
        self.span.record(SUBDOMAIN_FIELD, subdomain);
    }
}

impl From<&Message> for MessageContext {
    fn from(message: &Message) -> Self {
        Self {
            queue: message.queue.clone(),
            message_id: message.message_id,
            correlation_id: message.correlation_id,
            redeliveries: message.redeliveries,
            span: Span::none(),
        }
    }
}

/// Handler outcome other than success.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// May succeed on another attempt (storage outage, lock conflict).
    /// The failure is what the caller gets once retries run out.
    #[error("Transient failure: {0}")]
    Transient(Failure),

    /// Will fail the same way every time.
    #[error("{0}")]
    Permanent(Failure),

    /// Put the message back on its queue after `delay`. Produced by
    /// [`RetryMiddleware`](crate::middleware::RetryMiddleware).
    #[error("Retry in {delay:?}: {failure}")]
    Retry {
        delay: std::time::Duration,
        failure: Failure,
    },
}

impl HandlerError {
    /// Transient failure reported as `unavailable` if it persists.
    pub fn transient(reason: impl Into<String>) -> Self {
        HandlerError::Transient(Failure::new(FailureCode::Unavailable, reason))
    }

    /// Transient failure reported as `conflict` if it persists.
    pub fn conflict(reason: impl Into<String>) -> Self {
        HandlerError::Transient(Failure::new(FailureCode::Conflict, reason))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        HandlerError::Permanent(Failure::invalid(message))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerError::Permanent(Failure::not_found(message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        HandlerError::Permanent(Failure::internal(message))
    }

    /// The failure reported to the caller when this error is final.
    pub fn into_failure(self) -> Failure {
        match self {
            HandlerError::Permanent(failure)
            | HandlerError::Transient(failure)
            | HandlerError::Retry { failure, .. } => failure,
        }
    }
}

/// Raw handler: request bytes in, reply body out.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: &MessageContext, payload: &[u8]) -> Result<Vec<u8>, HandlerError>;
}

/// Handler for one JSON request type.
///
/// Wrap it in [`Json`] to bind it to a queue. Requests that do not decode or
/// fail validation never reach `handle` and are answered with an `invalid`
/// failure without retrying.
#[async_trait]
pub trait QueueHandler: Send + Sync + 'static {
    type Request: DeserializeOwned + Validate + Send + Sync;
    type Response: Serialize + Send;

    async fn handle(
        &self,
        ctx: &MessageContext,
        request: Self::Request,
    ) -> Result<Self::Response, HandlerError>;
}

/// Adapts a [`QueueHandler`] to a raw [`Handler`] speaking the reply envelope.
///
/// A response that serialises to `null` produces `{"success": true}` with no
/// `data` field.
pub struct Json<H>(pub H);

#[async_trait]
impl<H: QueueHandler> Handler for Json<H> {
    async fn call(&self, ctx: &MessageContext, payload: &[u8]) -> Result<Vec<u8>, HandlerError> {
        let request: H::Request = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::invalid(format!("Malformed payload: {}", e)))?;
        request
            .validate()
            .map_err(|e| HandlerError::invalid(e.to_string()))?;

        let response = self.0.handle(ctx, request).await?;

        let value = serde_json::to_value(response)
            .map_err(|e| HandlerError::internal(format!("Failed to encode response: {}", e)))?;
        let reply = if value.is_null() {
            Reply::ok_empty()
        } else {
            Reply::ok(value)
        };
        serde_json::to_vec(&reply)
            .map_err(|e| HandlerError::internal(format!("Failed to encode reply: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, Validate)]
    struct Greet {
        #[validate(length(min = 1))]
        name: String,
    }

    struct Greeter;

    #[async_trait]
    impl QueueHandler for Greeter {
        type Request = Greet;
        type Response = String;

        async fn handle(&self, _ctx: &MessageContext, request: Greet) -> Result<String, HandlerError> {
            Ok(format!("hello {}", request.name))
        }
    }

    struct Silent;

    #[async_trait]
    impl QueueHandler for Silent {
        type Request = Greet;
        type Response = ();

        async fn handle(&self, _ctx: &MessageContext, _request: Greet) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn ctx() -> MessageContext {
        MessageContext::from(&Message::new("greet", Vec::new()))
    }

    #[tokio::test]
    async fn test_json_handler_wraps_response() {
        let body = Json(Greeter)
            .call(&ctx(), br#"{"name":"ann"}"#)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"success": true, "data": "hello ann"}));
    }

    #[tokio::test]
    async fn test_unit_response_has_no_data() {
        let body = Json(Silent).call(&ctx(), br#"{"name":"ann"}"#).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"success": true}));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_permanent() {
        let err = Json(Greeter).call(&ctx(), b"not json").await.unwrap_err();
        match err {
            HandlerError::Permanent(failure) => assert_eq!(failure.code, FailureCode::Invalid),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_failure_is_permanent() {
        let err = Json(Greeter)
            .call(&ctx(), br#"{"name":""}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Permanent(ref f) if f.code == FailureCode::Invalid));
    }

    #[test]
    fn test_transient_becomes_unavailable_failure() {
        let failure = HandlerError::transient("db down").into_failure();
        assert_eq!(failure.code, FailureCode::Unavailable);
        assert_eq!(failure.message, "db down");
    }

    #[test]
    fn test_conflict_keeps_its_code() {
        let failure = HandlerError::conflict("concurrent update").into_failure();
        assert_eq!(failure.code, FailureCode::Conflict);
        assert_eq!(failure.message, "concurrent update");
    }

    #[test]
    fn test_attempt_is_one_based() {
        let mut message = Message::new("q", Vec::new());
        message.redeliveries = 2;
        assert_eq!(MessageContext::from(&message).attempt(), 3);
    }
}
