//! Request/reply messaging over durable queues.
//!
//! This crate turns an at-least-once publish/subscribe/ack transport into
//! correlated, timeout-bounded calls:
//! - [`transport`]: the transport abstraction and its in-process implementation
//! - [`rpc`]: caller side, publishes a request and waits for its reply
//! - [`consumer`]: handler side, binds queues to handlers with bounded concurrency
//! - [`middleware`]: ordered stages wrapped around every handler invocation
//! - [`handler`]: raw and typed JSON handlers
//! - [`reply`]: the `{success, data, error}` reply envelope

pub mod consumer;
pub mod handler;
pub mod message;
pub mod middleware;
pub mod reply;
pub mod rpc;
pub mod transport;

pub use consumer::{Consumer, DEFAULT_PREFETCH};
pub use handler::{Handler, HandlerError, Json, MessageContext, QueueHandler};
pub use message::Message;
pub use middleware::{LoggingMiddleware, Middleware, Next, RetryMiddleware, RetryPolicy};
pub use reply::{Failure, FailureCode, Reply};
pub use rpc::{RpcClient, RpcError, DEFAULT_RPC_TIMEOUT};
pub use transport::{
    Acknowledger, AmqpTransport, Delivery, MemoryTransport, Subscription, Transport,
    TransportError,
};
