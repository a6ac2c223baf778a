use std::io;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::compactor::run_compactor;
use crate::config::Config;
use crate::dispatch::{self, Dispatcher, EventSink, LogSink};
use crate::engine::Engine;
use crate::notify::NotifyHub;
use crate::store::MemoryStore;

pub const WAL_FILE_NAME: &str = "spacebook.wal";

/// Everything one process runs: store, event pipeline, engine, compactor.
/// Built once by [`Service::start`]; nothing here is global.
pub struct Service {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub notify: Arc<NotifyHub>,
    dispatcher: Dispatcher,
    compactor: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Service {
    /// Open (or replay) the store and spawn the background tasks. Must run
    /// inside a tokio runtime. `extra_sinks` receive every event alongside
    /// the log and the notify hub.
    pub fn start(config: &Config, extra_sinks: Vec<Arc<dyn EventSink>>) -> io::Result<Self> {
        let store = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                Arc::new(MemoryStore::open(&dir.join(WAL_FILE_NAME))?)
            }
            None => Arc::new(MemoryStore::ephemeral()),
        };

        let notify = Arc::new(NotifyHub::new());
        let (events, receiver) = dispatch::channel(config.event_queue_capacity);
        let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(LogSink), notify.clone()];
        sinks.extend(extra_sinks);
        let dispatcher = Dispatcher::spawn(receiver, sinks, config.event_workers);

        let engine = Arc::new(
            Engine::new(store.clone(), store.clone(), events)
                .forbid_cancel_after_start(config.forbid_cancel_after_start),
        );

        let compactor = config.data_dir.as_ref().map(|_| {
            let token = CancellationToken::new();
            let handle = tokio::spawn(run_compactor(
                store.clone(),
                config.compact_threshold,
                token.clone(),
            ));
            (token, handle)
        });

        info!(
            data_dir = ?config.data_dir,
            event_queue_capacity = config.event_queue_capacity,
            event_workers = config.event_workers,
            "service started"
        );
        Ok(Self {
            engine,
            store,
            notify,
            dispatcher,
            compactor,
        })
    }

    /// Stop the workers and the compactor. Events still queued are lost.
    pub async fn shutdown(self) {
        if let Some((token, handle)) = self.compactor {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("compactor ended abnormally: {e}");
            }
        }
        self.dispatcher.shutdown().await;
        info!("service stopped");
    }
}
