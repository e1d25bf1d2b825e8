//! The dispatch loop and fan-out.
//!
//! One loop per bus drains the inbound queue in post order. Asynchronous
//! riders are handed to a detached delivery task; synchronous riders are
//! delivered inline, so nothing behind them is dequeued until they finish.
//! Flush requests never block the loop: they are parked until every delivery
//! task started before them has finished.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, info, warn, Instrument};

use crate::registry::Registry;
use crate::rider::{Envelope, Mode, Rider};

/// A flush waiting on every delivery task numbered below `barrier`.
struct PendingFlush {
    barrier: u64,
    ack: oneshot::Sender<()>,
}

pub(crate) struct Dispatcher {
    inbound: mpsc::Receiver<Envelope>,
    registry: Arc<Registry>,
    shutdown: Arc<Notify>,
    deliveries: JoinSet<()>,
    /// Sequence number of each running delivery task, by task id.
    seqs: HashMap<Id, u64>,
    in_flight: BTreeSet<u64>,
    next_seq: u64,
    flushes: Vec<PendingFlush>,
}

impl Dispatcher {
    pub(crate) fn new(
        inbound: mpsc::Receiver<Envelope>,
        registry: Arc<Registry>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            inbound,
            registry,
            shutdown,
            deliveries: JoinSet::new(),
            seqs: HashMap::new(),
            in_flight: BTreeSet::new(),
            next_seq: 0,
            flushes: Vec::new(),
        }
    }

    /// Runs until shutdown is signalled or every sender is dropped. Riders
    /// already queued at that point are still delivered.
    pub(crate) async fn run(mut self) {
        info!("Bus is running");

        loop {
            let envelope = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                Some(result) = self.deliveries.join_next_with_id(), if !self.deliveries.is_empty() => {
                    self.reap(result);
                    continue;
                }
                envelope = self.inbound.recv() => envelope,
            };

            match envelope {
                Some(envelope) => self.handle(envelope).await,
                None => break,
            }
        }

        // From here on posts fail with `Closed`, including those made by
        // handlers still running.
        self.inbound.close();
        while let Some(envelope) = self.inbound.recv().await {
            self.handle(envelope).await;
        }
        while let Some(result) = self.deliveries.join_next_with_id().await {
            self.reap(result);
        }
        for flush in self.flushes.drain(..) {
            let _ = flush.ack.send(());
        }

        info!("Bus is stopping");
    }

    async fn handle(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Rider(rider) => self.dispatch(rider).await,
            Envelope::Flush(ack) => {
                debug!(in_flight = self.in_flight.len(), "Flush requested");
                self.flushes.push(PendingFlush {
                    barrier: self.next_seq,
                    ack,
                });
                self.release_flushes();
            }
        }
    }

    async fn dispatch(&mut self, rider: Rider) {
        debug!(
            payload_type = rider.payload.payload_type(),
            mode = %rider.mode,
            "Broadcasting payload"
        );

        match rider.mode {
            Mode::Asynchronous => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.in_flight.insert(seq);

                let registry = Arc::clone(&self.registry);
                let task = self.deliveries.spawn(
                    async move { deliver(&registry, rider).await }.in_current_span(),
                );
                self.seqs.insert(task.id(), seq);
            }
            Mode::Synchronous => deliver(&self.registry, rider).await,
        }
    }

    /// A task that failed to complete still counts as finished for flushes.
    fn reap(&mut self, result: Result<(Id, ()), JoinError>) {
        let id = match result {
            Ok((id, ())) => id,
            Err(e) => {
                warn!(error = %e, "Delivery task did not complete");
                e.id()
            }
        };
        if let Some(seq) = self.seqs.remove(&id) {
            self.in_flight.remove(&seq);
        }
        self.release_flushes();
    }

    /// Acknowledge every flush whose earlier deliveries have all finished.
    fn release_flushes(&mut self) {
        if self.flushes.is_empty() {
            return;
        }

        let oldest = self.in_flight.first().copied();
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.flushes)
            .into_iter()
            .partition(|flush| oldest.map_or(true, |seq| seq >= flush.barrier));
        self.flushes = waiting;

        for flush in ready {
            let _ = flush.ack.send(());
        }
    }
}

/// Fan one rider out to every handler, then every queue, registered for its
/// type. Failures are logged and skipped. Completes the rider at the end.
pub(crate) async fn deliver(registry: &Registry, mut rider: Rider) {
    let payload_type = rider.payload.payload_type().to_string();
    let consumers = registry.consumers(&payload_type);

    if consumers.is_empty() {
        debug!(payload_type = payload_type.as_str(), "No consumers registered");
    }

    for (index, handler) in consumers.handlers.iter().enumerate() {
        debug!(payload_type = payload_type.as_str(), index, "Processing payload with handler");

        let outcome = AssertUnwindSafe(handler.handle(Arc::clone(&rider.payload)))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, payload_type = payload_type.as_str(), index, "Handler failed");
            }
            Err(panic) => {
                warn!(
                    panic = panic_message(panic.as_ref()),
                    payload_type = payload_type.as_str(),
                    index,
                    "Handler panicked"
                );
            }
        }
    }

    for (index, queue) in consumers.queues.iter().enumerate() {
        debug!(payload_type = payload_type.as_str(), index, "Processing payload with channel");

        if queue.send(Arc::clone(&rider.payload)).await.is_err() {
            warn!(
                payload_type = payload_type.as_str(),
                index,
                "Delivery queue receiver dropped, skipping"
            );
        }
    }

    rider.complete();
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, BoxedHandler, Handler};
    use crate::payload::{SharedPayload, SimplePayload};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn handle(&self, _payload: SharedPayload) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct Panicking;

    #[async_trait]
    impl Handler for Panicking {
        async fn handle(&self, _payload: SharedPayload) -> anyhow::Result<()> {
            panic!("handler exploded")
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> BoxedHandler {
        let log = Arc::clone(log);
        let label = label.to_string();
        handler_fn(move |_| {
            let log = Arc::clone(&log);
            let label = label.clone();
            async move {
                log.lock().unwrap().push(label);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn deliver_runs_handlers_then_queues_in_order() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = mpsc::channel(4);

        registry.add_queue("t", tx);
        registry.add_handlers("t", vec![recorder(&log, "h1"), recorder(&log, "h2")]);

        let (rider, done) = Rider::synchronous(SimplePayload::new("t").shared());
        deliver(&registry, rider).await;

        assert!(done.await.is_ok());
        assert_eq!(*log.lock().unwrap(), vec!["h1", "h2"]);
        assert_eq!(rx.recv().await.unwrap().payload_type(), "t");
    }

    #[tokio::test]
    async fn deliver_survives_errors_panics_and_closed_queues() {
        let registry = Registry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (closed_tx, closed_rx) = mpsc::channel(1);
        drop(closed_rx);
        let (open_tx, mut open_rx) = mpsc::channel(1);

        registry.add_handlers(
            "t",
            vec![
                Arc::new(Failing) as BoxedHandler,
                Arc::new(Panicking) as BoxedHandler,
                recorder(&log, "after"),
            ],
        );
        registry.add_queue("t", closed_tx);
        registry.add_queue("t", open_tx);

        let (rider, done) = Rider::synchronous(SimplePayload::new("t").shared());
        deliver(&registry, rider).await;

        assert!(done.await.is_ok());
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert!(open_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn deliver_without_consumers_still_completes() {
        let registry = Registry::new();
        let (rider, done) = Rider::synchronous(SimplePayload::new("nobody").shared());
        deliver(&registry, rider).await;
        assert!(done.await.is_ok());
    }

    #[test]
    fn panic_messages() {
        let static_str: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(static_str.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
