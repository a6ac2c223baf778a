//! Best-effort lifecycle event pipeline.
//!
//! The engine holds an [`EventSender`] and never waits on it: a full queue
//! drops the event. A fixed pool of workers shares the receiving end and hands
//! each event to every registered [`EventSink`] until shutdown.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::model::LifecycleEvent;
use crate::observability::{EVENTS_DISPATCHED_TOTAL, EVENTS_DROPPED_TOTAL};

/// A consumer of lifecycle events (logging, mail, audit, indexing, ...).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle(&self, event: &LifecycleEvent);
}

/// Producer handle injected into the engine.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<LifecycleEvent>,
}

pub struct EventReceiver {
    rx: mpsc::Receiver<LifecycleEvent>,
}

/// Bounded queue holding at most `capacity` undelivered events.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

impl EventReceiver {
    /// Direct consumption, for callers that don't want the worker pool.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        self.rx.try_recv().ok()
    }
}

impl EventSender {
    /// Non-blocking enqueue. Never fails the caller.
    pub fn emit(&self, event: LifecycleEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    kind = event.kind.as_str(),
                    booking_id = %event.booking_id,
                    "event queue full, dropping lifecycle event"
                );
                metrics::counter!(EVENTS_DROPPED_TOTAL, "reason" => "full").increment(1);
            }
            Err(TrySendError::Closed(event)) => {
                debug!(
                    kind = event.kind.as_str(),
                    booking_id = %event.booking_id,
                    "event pipeline stopped, dropping lifecycle event"
                );
                metrics::counter!(EVENTS_DROPPED_TOTAL, "reason" => "closed").increment(1);
            }
        }
    }
}

/// Reference sink: one structured log line per event.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn handle(&self, event: &LifecycleEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        info!(
            kind = event.kind.as_str(),
            booking_id = %event.booking_id,
            resource_id = %event.resource_id,
            requester_id = %event.requester_id,
            at = event.at,
            "booking event {payload}"
        );
    }
}

/// The consumer pool.
pub struct Dispatcher {
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(receiver: EventReceiver, sinks: Vec<Arc<dyn EventSink>>, workers: usize) -> Self {
        let token = CancellationToken::new();
        let rx = Arc::new(Mutex::new(receiver.rx));
        let sinks: Arc<[Arc<dyn EventSink>]> = sinks.into();
        let workers = (0..workers.max(1))
            .map(|n| tokio::spawn(worker_loop(n, rx.clone(), sinks.clone(), token.clone())))
            .collect();
        Self { token, workers }
    }

    /// Stop the pool. An event already taken off the queue is delivered;
    /// whatever is still queued is lost.
    pub async fn shutdown(self) {
        self.token.cancel();
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                warn!("event worker ended abnormally: {e}");
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<LifecycleEvent>>>,
    sinks: Arc<[Arc<dyn EventSink>]>,
    token: CancellationToken,
) {
    debug!(worker, "event worker started");
    loop {
        let next = {
            let mut rx = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                guard = rx.lock() => guard,
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = rx.recv() => event,
            }
        };
        // Every sender is gone: nothing more can arrive.
        let Some(event) = next else { break };

        for sink in sinks.iter() {
            sink.handle(&event).await;
        }
        metrics::counter!(EVENTS_DISPATCHED_TOTAL, "kind" => event.kind.as_str()).increment(1);
    }
    debug!(worker, "event worker stopped");
}
