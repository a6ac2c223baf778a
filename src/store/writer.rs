use std::io;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::model::Record;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

type Reply<T> = oneshot::Sender<io::Result<T>>;

pub(super) enum WalCommand {
    Append { record: Record, response: Reply<()> },
    Compact { records: Vec<Record>, response: Reply<()> },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the WAL and group-commits appends: block for the first append, take
/// every append already queued behind it, then fsync once for the batch.
pub(super) async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<(Record, Reply<()>)> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut pending = match cmd {
            WalCommand::Append { record, response } => {
                batch.push((record, response));
                None
            }
            other => Some(other),
        };

        while pending.is_none() {
            match rx.try_recv() {
                Ok(WalCommand::Append { record, response }) => batch.push((record, response)),
                Ok(other) => pending = Some(other),
                Err(_) => break,
            }
        }

        if !batch.is_empty() {
            commit_batch(&mut wal, &mut batch);
        }
        if let Some(cmd) = pending {
            handle_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Record, Reply<()>)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    // All or nothing: a failed batch is cut off the log, and every caller in
    // it hears about the failure.
    let result = wal.append_batch(batch.iter().map(|(record, _)| record));
    if let Err(e) = &result {
        warn!(records = batch.len(), "WAL batch failed: {e}");
    }

    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let _ = response.send(wal.compact(&records));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { record, response } => {
            let result = wal.append_batch(std::iter::once(&record));
            let _ = response.send(result);
        }
    }
}
