//! Queue consumer.
//!
//! Binds queues to handlers and runs each delivery through the middleware
//! pipeline on its own task. The transport's prefetch bound caps how many
//! deliveries of one queue are in flight at once.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, info_span, warn, Instrument};

use crate::handler::{Handler, HandlerError, MessageContext};
use crate::middleware::{Middleware, Next};
use crate::reply::Reply;
use crate::transport::{Delivery, Subscription, Transport, TransportError};

/// Default prefetch (concurrency ceiling) per queue.
pub const DEFAULT_PREFETCH: usize = 10;

type Pipeline = Arc<[Arc<dyn Middleware>]>;

struct Route {
    queue: String,
    prefetch: usize,
    handler: Arc<dyn Handler>,
}

/// Runs handlers for a set of queues until shut down.
pub struct Consumer {
    transport: Arc<dyn Transport>,
    middleware: Vec<Arc<dyn Middleware>>,
    routes: Vec<Route>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Consumer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            transport,
            middleware: Vec::new(),
            routes: Vec::new(),
            shutdown_tx,
            shutdown_rx,
            handles: Vec::new(),
        }
    }

    /// Appends a middleware stage. The first stage added is the outermost.
    pub fn with_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Binds `handler` to `queue` with at most `prefetch` deliveries in flight.
    pub fn register<H: Handler>(&mut self, queue: impl Into<String>, prefetch: usize, handler: H) {
        self.routes.push(Route {
            queue: queue.into(),
            prefetch,
            handler: Arc::new(handler),
        });
    }

    /// Queues with a registered handler.
    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.queue.as_str())
    }

    /// Declares every registered queue and starts consuming.
    pub async fn start(&mut self) -> Result<(), TransportError> {
        info!("Starting consumer with {} queues", self.routes.len());

        let pipeline: Pipeline = self.middleware.clone().into();

        for route in &self.routes {
            self.transport.declare_queue(&route.queue).await?;
            let subscription = self.transport.consume(&route.queue, route.prefetch).await?;

            info!(queue = %route.queue, prefetch = route.prefetch, "Queue consumer started");

            let handle = tokio::spawn(run_queue(
                subscription,
                self.transport.clone(),
                pipeline.clone(),
                route.handler.clone(),
                self.shutdown_rx.clone(),
            ));
            self.handles.push(handle);
        }

        Ok(())
    }

    /// Stops taking new deliveries. Returns immediately.
    pub fn shutdown(&self) {
        info!("Initiating consumer shutdown");
        let _ = self.shutdown_tx.send(true);
    }

    /// Waits for in-flight deliveries to finish, up to `timeout`.
    pub async fn wait_for_shutdown(self, timeout: Duration) {
        info!("Waiting for consumers to drain (timeout: {:?})", timeout);

        let drain = async {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!("Consumer task panicked: {}", e);
                }
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => info!("All consumers stopped"),
            Err(_) => warn!("Consumer shutdown timed out after {:?}", timeout),
        }
    }
}

async fn run_queue(
    mut subscription: Subscription,
    transport: Arc<dyn Transport>,
    pipeline: Pipeline,
    handler: Arc<dyn Handler>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let queue = subscription.queue().to_string();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            delivery = subscription.recv() => match delivery {
                Some(delivery) => {
                    in_flight.spawn(process(
                        delivery,
                        transport.clone(),
                        pipeline.clone(),
                        handler.clone(),
                    ));
                }
                None => {
                    warn!(queue = %queue, "Subscription closed by transport");
                    break;
                }
            },
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!(queue = %queue, error = %e, "Delivery task failed");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    // Undelivered buffered messages go back to the queue with the subscription.
    drop(subscription);
    info!(queue = %queue, in_flight = in_flight.len(), "Queue consumer draining");
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(queue = %queue, error = %e, "Delivery task failed");
        }
    }
    info!(queue = %queue, "Queue consumer stopped");
}

async fn process(
    delivery: Delivery,
    transport: Arc<dyn Transport>,
    pipeline: Pipeline,
    handler: Arc<dyn Handler>,
) {
    let (message, acker) = delivery.into_parts();
    let ctx = MessageContext::from(&message);
    let span = info_span!(
        "delivery",
        queue = %ctx.queue,
        message_id = %ctx.message_id,
        correlation_id = ?ctx.correlation_id,
        attempt = ctx.attempt(),
        subdomain = tracing::field::Empty,
    );
    let ctx = ctx.with_span(span.clone());

    async move {
        let outcome = invoke(ctx.clone(), message.payload.clone(), pipeline, handler).await;

        let (body, label) = match outcome {
            Ok(body) => (body, "ok"),
            Err(HandlerError::Retry { delay, .. }) => {
                if let Err(e) = acker.requeue(delay).await {
                    error!(error = %e, "Failed to requeue message");
                }
                record_outcome(&ctx.queue, "retried");
                return;
            }
            Err(e) => {
                let failure = e.into_failure();
                let body = serde_json::to_vec(&Reply::<()>::failure(&failure))
                    .unwrap_or_else(|_| br#"{"success":false}"#.to_vec());
                (body, "failed")
            }
        };

        if let Some(reply) = message.reply(body) {
            if let Err(e) = transport.publish(reply).await {
                error!(error = %e, "Failed to publish reply");
            }
        }
        if let Err(e) = acker.ack().await {
            error!(error = %e, "Failed to acknowledge message");
        }
        record_outcome(&ctx.queue, label);
    }
    .instrument(span)
    .await
}

/// Runs the pipeline on its own task so a panicking handler becomes a
/// terminal failure instead of taking the consumer down.
async fn invoke(
    ctx: MessageContext,
    payload: Vec<u8>,
    pipeline: Pipeline,
    handler: Arc<dyn Handler>,
) -> Result<Vec<u8>, HandlerError> {
    let task = tokio::spawn(
        async move {
            Next::new(&pipeline, handler.as_ref())
                .run(&ctx, &payload)
                .await
        }
        .in_current_span(),
    );

    match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            error!("Handler panicked");
            Err(HandlerError::internal("handler panicked"))
        }
        Err(e) => Err(HandlerError::internal(format!("Handler task failed: {}", e))),
    }
}

fn record_outcome(queue: &str, outcome: &'static str) {
    counter!(
        "broker_messages_total",
        "queue" => queue.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
