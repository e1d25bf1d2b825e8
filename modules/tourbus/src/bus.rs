//! The bus handle: registration, posting, lifecycle.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument};

use crate::config::BusConfig;
use crate::dispatch::Dispatcher;
use crate::error::{BusError, Result};
use crate::handler::BoxedHandler;
use crate::payload::SharedPayload;
use crate::registry::{DeliveryQueue, Registry};
use crate::rider::{Envelope, Rider};

const NO_HANDLERS: &str = "Argument error: at least one handler must be registered.";

/// Publish/subscribe dispatcher.
///
/// Cloning is cheap and every clone talks to the same dispatch loop. The loop
/// stops when [`Bus::shutdown`] is called or when the last clone is dropped.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

struct Inner {
    inbound: mpsc::Sender<Envelope>,
    registry: Arc<Registry>,
    shutdown: Arc<Notify>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    /// Create a bus with default settings and start its dispatch loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        let (inbound, receiver) = mpsc::channel(config.effective_capacity());
        let registry = Arc::new(Registry::new());
        let shutdown = Arc::new(Notify::new());

        info!(
            name = config.name.as_str(),
            capacity = config.effective_capacity(),
            "Creating bus"
        );

        let dispatcher = Dispatcher::new(receiver, Arc::clone(&registry), Arc::clone(&shutdown));
        let handle = tokio::spawn(
            dispatcher
                .run()
                .instrument(info_span!("bus", name = config.name.as_str())),
        );

        Self {
            inner: Arc::new(Inner {
                inbound,
                registry,
                shutdown,
                dispatcher: Mutex::new(Some(handle)),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register one or more handlers for a payload type, after any already
    /// registered. Registering none is an argument error and changes nothing.
    pub fn add_handlers(
        &self,
        payload_type: &str,
        handlers: impl IntoIterator<Item = BoxedHandler>,
    ) -> Result<()> {
        let handlers: Vec<BoxedHandler> = handlers.into_iter().collect();
        if handlers.is_empty() {
            return Err(BusError::argument(NO_HANDLERS));
        }

        debug!(payload_type, count = handlers.len(), "Adding handlers");
        self.inner.registry.add_handlers(payload_type, handlers);
        Ok(())
    }

    /// Register a delivery queue for a payload type. The bus only ever sends
    /// into it; a full queue makes delivery wait.
    pub fn add_channel(&self, payload_type: &str, queue: DeliveryQueue) {
        debug!(payload_type, "Adding channel");
        self.inner.registry.add_queue(payload_type, queue);
    }

    pub fn handler_count(&self, payload_type: &str) -> usize {
        self.inner.registry.handler_count(payload_type)
    }

    pub fn channel_count(&self, payload_type: &str) -> usize {
        self.inner.registry.queue_count(payload_type)
    }

    /// Every payload type with at least one handler or channel, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        self.inner.registry.types()
    }

    // -----------------------------------------------------------------------
    // Posting
    // -----------------------------------------------------------------------

    /// Hand a payload to the dispatch loop for asynchronous delivery.
    ///
    /// Returns once the payload is queued. Waits only while the inbound queue
    /// is full.
    pub async fn post(&self, payload: SharedPayload) -> Result<()> {
        debug!(payload_type = payload.payload_type(), "Posting payload");
        self.send(Envelope::Rider(Rider::asynchronous(payload))).await
    }

    /// Hand a payload to the dispatch loop for synchronous delivery and wait
    /// until every handler and channel for its type has been served.
    ///
    /// The loop delivers it inline, so later posts are not dispatched until
    /// this one is done. Calling this from a handler that is itself being run
    /// synchronously deadlocks the bus.
    pub async fn post_and_wait(&self, payload: SharedPayload) -> Result<()> {
        debug!(payload_type = payload.payload_type(), "Posting payload and waiting");
        let (rider, done) = Rider::synchronous(payload);
        self.send(Envelope::Rider(rider)).await?;
        done.await.map_err(|_| BusError::Closed)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Wait until every payload posted before this call has been delivered,
    /// including asynchronous ones.
    pub async fn flush(&self) -> Result<()> {
        let (ack, acked) = oneshot::channel();
        self.send(Envelope::Flush(ack)).await?;
        acked.await.map_err(|_| BusError::Closed)
    }

    /// Stop accepting payloads, deliver whatever is already queued, and wait
    /// for the dispatch loop to exit. Later calls return immediately.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown.notify_one();

        let handle = self.inner.dispatcher.lock().await.take();
        if let Some(handle) = handle {
            handle.await?;
            info!("Bus shut down");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.inbound.is_closed()
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        self.inner
            .inbound
            .send(envelope)
            .await
            .map_err(|_| BusError::Closed)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
