//! Caller side of request/reply.
//!
//! Each client owns a private reply queue and a table of pending requests
//! keyed by correlation id. A background task drains the reply queue and
//! completes the matching entry; replies nobody waits for any more are
//! acknowledged and dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::Message;
use crate::reply::{Failure, FailureCode, Reply};
use crate::transport::{Subscription, Transport, TransportError};

/// Default time a caller waits for a reply.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Deliveries the reply pump may hold at once.
const REPLY_PREFETCH: usize = 256;

/// Errors surfaced to RPC callers.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("No reply from {queue} within {timeout:?}")]
    Timeout { queue: String, timeout: Duration },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The handler replied with `success: false`.
    #[error("{0}")]
    Remote(Failure),

    #[error("RPC client closed")]
    Closed,
}

impl RpcError {
    /// Failure code of a remote failure, if this is one.
    pub fn remote_code(&self) -> Option<FailureCode> {
        match self {
            RpcError::Remote(failure) => Some(failure.code),
            _ => None,
        }
    }
}

type PendingMap = HashMap<Uuid, oneshot::Sender<Message>>;

#[derive(Default)]
struct Pending {
    waiters: Mutex<PendingMap>,
}

impl Pending {
    fn waiters(&self) -> MutexGuard<'_, PendingMap> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, correlation_id: &Uuid) -> Option<oneshot::Sender<Message>> {
        self.waiters().remove(correlation_id)
    }

    fn len(&self) -> usize {
        self.waiters().len()
    }
}

/// Removes a pending entry when the waiting call finishes for any reason.
struct PendingGuard<'a> {
    pending: &'a Pending,
    correlation_id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.take(&self.correlation_id);
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    reply_queue: String,
    pending: Arc<Pending>,
    default_timeout: Duration,
    reply_pump: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.reply_pump.abort();
    }
}

/// Correlated request/reply client. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    /// Declares a private reply queue and starts listening on it.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        default_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let reply_queue = format!("rpc.reply.{}", Uuid::new_v4());
        transport.declare_reply_queue(&reply_queue).await?;
        let subscription = transport.consume(&reply_queue, REPLY_PREFETCH).await?;

        let pending = Arc::new(Pending::default());
        let reply_pump = tokio::spawn(pump_replies(subscription, pending.clone()));

        debug!(reply_queue = %reply_queue, "RPC client connected");

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                reply_queue,
                pending,
                default_timeout,
                reply_pump,
            }),
        })
    }

    pub fn reply_queue(&self) -> &str {
        &self.inner.reply_queue
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Publishes `payload` to `queue` and waits up to `timeout` for the reply
    /// carrying the same correlation id.
    pub async fn request(
        &self,
        queue: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Message, RpcError> {
        let correlation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.waiters().insert(correlation_id, tx);
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            correlation_id,
        };

        let message =
            Message::new(queue, payload).with_reply_to(correlation_id, &self.inner.reply_queue);
        self.inner.transport.publish(message).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => {
                warn!(queue = %queue, correlation_id = %correlation_id, ?timeout, "RPC request timed out");
                counter!(
                    "broker_rpc_requests_total",
                    "queue" => queue.to_string(),
                    "result" => "timeout"
                )
                .increment(1);
                Err(RpcError::Timeout {
                    queue: queue.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Sends a JSON request with the default timeout and unwraps the reply
    /// envelope. A `success: false` reply becomes [`RpcError::Remote`].
    pub async fn call<Req, Resp>(&self, queue: &str, request: &Req) -> Result<Option<Resp>, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.call_with_timeout(queue, request, self.inner.default_timeout)
            .await
    }

    /// Like [`call`](Self::call) with an explicit timeout.
    pub async fn call_with_timeout<Req, Resp>(
        &self,
        queue: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Option<Resp>, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;
        let reply = self.request(queue, payload, timeout).await?;
        let envelope: Reply<Resp> = serde_json::from_slice(&reply.payload)?;

        let result = if envelope.success { "ok" } else { "failed" };
        counter!(
            "broker_rpc_requests_total",
            "queue" => queue.to_string(),
            "result" => result
        )
        .increment(1);

        envelope.into_result().map_err(RpcError::Remote)
    }
}

async fn pump_replies(mut subscription: Subscription, pending: Arc<Pending>) {
    while let Some(delivery) = subscription.recv().await {
        let (message, acker) = delivery.into_parts();
        if let Err(e) = acker.ack().await {
            warn!(error = %e, "Failed to acknowledge reply");
        }

        let waiter = message
            .correlation_id
            .and_then(|correlation_id| pending.take(&correlation_id));

        match waiter {
            // The caller may have given up in the meantime; nothing to do then.
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!(
                correlation_id = ?message.correlation_id,
                "Discarding reply with no pending request"
            ),
        }
    }
    debug!(queue = %subscription.queue(), "Reply subscription ended");
}
