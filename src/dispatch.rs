// dispatch.rs
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{routing_key, Notification};

pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("malformed notification envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("unsupported subscription type: {0}")]
    UnsupportedType(String),

    #[error("malformed {route} event: {source}")]
    Payload {
        route: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("dispatch queue is full ({limit} handlers admitted)")]
    Saturated { limit: usize },
}

/// Typed handler for one subscription kind.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Event: DeserializeOwned + Send + 'static;
    type Condition: DeserializeOwned + Send + 'static;

    async fn handle(
        &self,
        notification: Notification<Self::Event, Self::Condition>,
    ) -> anyhow::Result<()>;
}

pub trait Route: Send + Sync {
    fn decode(&self, body: &[u8]) -> Result<HandlerFuture, serde_json::Error>;
}

struct TypedRoute<H> {
    handler: Arc<H>,
}

impl<H: EventHandler> Route for TypedRoute<H> {
    fn decode(&self, body: &[u8]) -> Result<HandlerFuture, serde_json::Error> {
        let notification: Notification<H::Event, H::Condition> = serde_json::from_slice(body)?;
        let handler = Arc::clone(&self.handler);
        Ok(Box::pin(async move { handler.handle(notification).await }))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionDescriptor {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    #[serde(default)]
    pub status: String,
}

impl SubscriptionDescriptor {
    pub fn routing_key(&self) -> String {
        routing_key(&self.kind, &self.version)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub subscription: SubscriptionDescriptor,
    #[serde(default)]
    pub event: serde_json::Value,
}

pub fn peek_envelope(body: &[u8]) -> Result<Envelope, DispatchError> {
    serde_json::from_slice(body).map_err(DispatchError::Envelope)
}

pub enum Resolution<'a> {
    Routed { key: String, route: &'a dyn Route },
    Unrecognized { kind: String },
}

#[derive(Default)]
pub struct RouteTableBuilder {
    routes: HashMap<String, Arc<dyn Route>>,
}

impl RouteTableBuilder {
    /// Registers `handler` for a routing key such as `channel.chat.message.v1`.
    pub fn route<H: EventHandler>(mut self, key: &str, handler: H) -> Self {
        let route = TypedRoute {
            handler: Arc::new(handler),
        };
        self.routes.insert(key.to_lowercase(), Arc::new(route));
        self
    }

    pub fn build(self) -> RouteTable {
        RouteTable {
            routes: self.routes,
        }
    }
}

pub struct RouteTable {
    routes: HashMap<String, Arc<dyn Route>>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    pub fn resolve(&self, subscription: &SubscriptionDescriptor) -> Resolution<'_> {
        let key = subscription.routing_key();
        match self.routes.get(&key) {
            Some(route) => Resolution::Routed {
                key,
                route: route.as_ref(),
            },
            None => Resolution::Unrecognized {
                kind: subscription.kind.clone(),
            },
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.routes.keys()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

/// Handle for one spawned handler run.
#[derive(Debug)]
pub struct DispatchTicket {
    pub id: Uuid,
    pub route: String,
    completion: oneshot::Receiver<DispatchOutcome>,
}

impl DispatchTicket {
    /// Waits for the handler to finish. `None` if the task died without reporting.
    pub async fn completion(self) -> Option<DispatchOutcome> {
        self.completion.await.ok()
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Dispatcher {
    routes: RouteTable,
    // Running handlers.
    permits: Arc<Semaphore>,
    // Running plus waiting handlers; taken before a task is spawned.
    admission: Arc<Semaphore>,
    admission_limit: usize,
    handler_timeout: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(
        routes: RouteTable,
        max_concurrent: usize,
        max_queued: usize,
        handler_timeout: Option<Duration>,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let admission_limit = max_concurrent.saturating_add(max_queued);
        Self {
            routes,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            admission: Arc::new(Semaphore::new(admission_limit)),
            admission_limit,
            handler_timeout,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Routes `body` and spawns its handler. Returns once the task is queued,
    /// or `Saturated` when the running and waiting handlers fill the queue.
    pub fn dispatch(&self, body: &[u8]) -> Result<DispatchTicket, DispatchError> {
        let envelope = peek_envelope(body)?;

        let (key, route) = match self.routes.resolve(&envelope.subscription) {
            Resolution::Routed { key, route } => (key, route),
            Resolution::Unrecognized { kind } => return Err(DispatchError::UnsupportedType(kind)),
        };
        debug!(route = %key, "resolved subscription route");

        let future = route.decode(body).map_err(|source| DispatchError::Payload {
            route: key.clone(),
            source,
        })?;

        self.spawn(key, future)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Waits up to `limit` for in-flight handlers to finish; `false` on timeout.
    pub async fn drain(&self, limit: Duration) -> bool {
        let wait = async {
            while self.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        };
        tokio::time::timeout(limit, wait).await.is_ok()
    }

    fn spawn(&self, route: String, future: HandlerFuture) -> Result<DispatchTicket, DispatchError> {
        let admitted = match Arc::clone(&self.admission).try_acquire_owned() {
            Ok(admitted) => admitted,
            Err(_) => {
                warn!(route = %route, limit = self.admission_limit, "dispatch queue full, rejecting notification");
                return Err(DispatchError::Saturated {
                    limit: self.admission_limit,
                });
            }
        };

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();

        if self.permits.available_permits() == 0 {
            debug!(dispatch_id = %id, route = %route, "dispatch pool saturated, queueing handler");
        }

        let guard = InFlight::enter(&self.in_flight);
        let permits = Arc::clone(&self.permits);
        let handler_timeout = self.handler_timeout;
        let span = info_span!("dispatch", dispatch_id = %id, route = %route);

        tokio::spawn(
            async move {
                let permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        error!("dispatch pool closed");
                        drop(admitted);
                        drop(guard);
                        let _ = tx.send(DispatchOutcome::Failed("dispatch pool closed".to_string()));
                        return;
                    }
                };

                let result = match handler_timeout {
                    Some(limit) => tokio::time::timeout(limit, future).await.ok(),
                    None => Some(future.await),
                };

                let outcome = match result {
                    Some(Ok(())) => {
                        debug!("handler completed");
                        DispatchOutcome::Completed
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "handler failed");
                        DispatchOutcome::Failed(e.to_string())
                    }
                    None => {
                        warn!(timeout = ?handler_timeout, "handler timed out");
                        DispatchOutcome::TimedOut
                    }
                };

                // Release before reporting so observers see the slot free.
                drop(permit);
                drop(admitted);
                drop(guard);
                let _ = tx.send(outcome);
            }
            .instrument(span),
        );

        Ok(DispatchTicket {
            id,
            route,
            completion: rx,
        })
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes)
            .field("admission_limit", &self.admission_limit)
            .field("handler_timeout", &self.handler_timeout)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
