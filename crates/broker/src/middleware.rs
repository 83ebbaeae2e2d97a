//! Middleware wrapped around every handler invocation.
//!
//! Stages run in registration order, outermost first. The consumer installs
//! retry outside logging, so every attempt is logged and only the retry stage
//! decides whether a transient failure goes back on the queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::handler::{Handler, HandlerError, MessageContext};
use crate::reply::{Failure, FailureCode};

/// Default number of redeliveries after the first attempt.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Default delay before a transiently failed message is redelivered.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// One stage of the handler pipeline.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(
        &self,
        ctx: &MessageContext,
        payload: &[u8],
        next: Next<'_>,
    ) -> Result<Vec<u8>, HandlerError>;
}

/// The rest of the pipeline after the current stage.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn new(middleware: &'a [Arc<dyn Middleware>], handler: &'a dyn Handler) -> Self {
        Self {
            middleware,
            handler,
        }
    }

    pub async fn run(self, ctx: &MessageContext, payload: &[u8]) -> Result<Vec<u8>, HandlerError> {
        match self.middleware.split_first() {
            Some((stage, rest)) => {
                stage
                    .handle(ctx, payload, Next::new(rest, self.handler))
                    .await
            }
            None => self.handler.call(ctx, payload).await,
        }
    }
}

/// Bounds on redelivery of transiently failed messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRY_COUNT,
            delay: RETRY_DELAY,
        }
    }
}

/// Turns transient failures into delayed redeliveries until the policy's
/// retries are used up, then into a terminal `unavailable` failure.
///
/// Permanent failures pass through untouched.
#[derive(Debug, Clone, Default)]
pub struct RetryMiddleware {
    policy: RetryPolicy,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    async fn handle(
        &self,
        ctx: &MessageContext,
        payload: &[u8],
        next: Next<'_>,
    ) -> Result<Vec<u8>, HandlerError> {
        match next.run(ctx, payload).await {
            Err(HandlerError::Transient(failure)) if ctx.redeliveries < self.policy.max_retries => {
                warn!(
                    attempt = ctx.attempt(),
                    max_retries = self.policy.max_retries,
                    delay_ms = self.policy.delay.as_millis() as u64,
                    error = %failure,
                    "Transient failure, scheduling redelivery"
                );
                Err(HandlerError::Retry {
                    delay: self.policy.delay,
                    failure,
                })
            }
            Err(HandlerError::Transient(failure)) => {
                error!(
                    attempt = ctx.attempt(),
                    error = %failure,
                    "Retries exhausted"
                );
                Err(HandlerError::Transient(Failure::new(
                    failure.code,
                    format!(
                        "{} (gave up after {} retries)",
                        failure.message, self.policy.max_retries
                    ),
                )))
            }
            other => other,
        }
    }
}

/// Logs receipt and outcome of every attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        ctx: &MessageContext,
        payload: &[u8],
        next: Next<'_>,
    ) -> Result<Vec<u8>, HandlerError> {
        let start = Instant::now();
        debug!(bytes = payload.len(), "Message received");

        let result = next.run(ctx, payload).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => info!(elapsed_ms, "Message handled"),
            Err(HandlerError::Permanent(failure)) if failure.code == FailureCode::NotFound => {
                info!(elapsed_ms, reason = %failure.message, "Nothing found")
            }
            Err(HandlerError::Permanent(failure)) => {
                warn!(elapsed_ms, code = %failure.code, error = %failure.message, "Message rejected")
            }
            Err(e) => warn!(elapsed_ms, error = %e, "Message handling failed"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Failing {
        calls: AtomicU32,
        error: HandlerError,
    }

    #[async_trait]
    impl Handler for Failing {
        async fn call(&self, _ctx: &MessageContext, _payload: &[u8]) -> Result<Vec<u8>, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(self.error.clone())
        }
    }

    fn ctx(redeliveries: u32) -> MessageContext {
        let mut message = Message::new("q", Vec::new());
        message.redeliveries = redeliveries;
        MessageContext::from(&message)
    }

    fn pipeline() -> Vec<Arc<dyn Middleware>> {
        vec![
            Arc::new(RetryMiddleware::new(RetryPolicy {
                max_retries: 3,
                delay: Duration::from_millis(10),
            })),
            Arc::new(LoggingMiddleware),
        ]
    }

    #[tokio::test]
    async fn test_transient_within_limit_requests_retry() {
        let handler = Failing {
            calls: AtomicU32::new(0),
            error: HandlerError::transient("db down"),
        };
        let stages = pipeline();

        for redeliveries in 0..3 {
            let result = Next::new(&stages, &handler).run(&ctx(redeliveries), b"").await;
            assert!(matches!(result, Err(HandlerError::Retry { delay, .. }) if delay == Duration::from_millis(10)));
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_after_limit_is_final() {
        let handler = Failing {
            calls: AtomicU32::new(0),
            error: HandlerError::transient("db down"),
        };
        let stages = pipeline();

        let result = Next::new(&stages, &handler).run(&ctx(3), b"").await;
        let failure = result.unwrap_err().into_failure();
        assert_eq!(failure.code, FailureCode::Unavailable);
        assert!(failure.message.contains("gave up after 3 retries"));
    }

    #[tokio::test]
    async fn test_exhausted_conflict_keeps_conflict_code() {
        let handler = Failing {
            calls: AtomicU32::new(0),
            error: HandlerError::conflict("concurrent update"),
        };
        let stages = pipeline();

        let result = Next::new(&stages, &handler).run(&ctx(3), b"").await;
        let failure = result.unwrap_err().into_failure();
        assert_eq!(failure.code, FailureCode::Conflict);
        assert!(failure.message.starts_with("concurrent update"));
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let handler = Failing {
            calls: AtomicU32::new(0),
            error: HandlerError::invalid("bad"),
        };
        let stages = pipeline();

        let result = Next::new(&stages, &handler).run(&ctx(0), b"").await;
        assert!(matches!(result, Err(HandlerError::Permanent(_))));
    }

    #[tokio::test]
    async fn test_empty_pipeline_calls_handler() {
        let handler = Failing {
            calls: AtomicU32::new(0),
            error: HandlerError::internal("boom"),
        };
        let result = Next::new(&[], &handler).run(&ctx(0), b"").await;
        assert!(result.is_err());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_secs(5));
    }
}
