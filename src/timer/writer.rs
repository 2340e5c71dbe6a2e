use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::snapshot::{SnapshotStore, TimerSnapshot};

const WRITE_QUEUE_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotWrite {
    Save(TimerSnapshot),
    Clear,
}

struct WriteRequest {
    write: SnapshotWrite,
    done: oneshot::Sender<Result<()>>,
}

/// Performs snapshot writes one at a time, in the order they were queued. The timer hands writes
/// over instead of doing them itself so a slow disk never delays a tick, and a clear queued after a
/// checkpoint can't be overtaken by it.
pub struct SnapshotWriter {
    receiver: mpsc::Receiver<WriteRequest>,
    store: Arc<dyn SnapshotStore>,
}

#[derive(Clone)]
pub struct SnapshotWriterHandle {
    sender: mpsc::Sender<WriteRequest>,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn SnapshotStore>) -> (Self, SnapshotWriterHandle) {
        let (sender, receiver) = mpsc::channel(WRITE_QUEUE_SIZE);
        (Self { receiver, store }, SnapshotWriterHandle { sender })
    }

    /// Runs until every handle is dropped and the queue is drained.
    pub async fn run(mut self) {
        while let Some(WriteRequest { write, done }) = self.receiver.recv().await {
            debug!("Processing snapshot write {:?}", write);
            let result = match &write {
                SnapshotWrite::Save(snapshot) => self.store.save(snapshot).await,
                SnapshotWrite::Clear => self.store.clear().await,
            };
            match &result {
                Ok(()) => info!("Processed snapshot write {:?}", write),
                Err(e) => error!("Error processing snapshot write {:?}: {e:?}", write),
            }
            // Nobody waiting for the outcome is fine.
            let _ = done.send(result);
        }
    }
}

impl SnapshotWriterHandle {
    /// Queues a write without waiting for it. The receiver resolves once the write is done.
    pub async fn queue(&self, write: SnapshotWrite) -> oneshot::Receiver<Result<()>> {
        let (done, outcome) = oneshot::channel();
        if let Err(mpsc::error::SendError(request)) =
            self.sender.send(WriteRequest { write, done }).await
        {
            let _ = request
                .done
                .send(Err(anyhow!("Snapshot writer is no longer running")));
        }
        outcome
    }

    /// Queues a write only if there is room right away, otherwise hands it back.
    pub fn try_queue(
        &self,
        write: SnapshotWrite,
    ) -> Result<oneshot::Receiver<Result<()>>, SnapshotWrite> {
        let (done, outcome) = oneshot::channel();
        match self.sender.try_send(WriteRequest { write, done }) {
            Ok(()) => Ok(outcome),
            Err(mpsc::error::TrySendError::Full(request))
            | Err(mpsc::error::TrySendError::Closed(request)) => Err(request.write),
        }
    }

    /// Queues a write and waits for its outcome.
    pub async fn write(&self, write: SnapshotWrite) -> Result<()> {
        self.queue(write)
            .await
            .await
            .map_err(|_| anyhow!("Snapshot writer dropped the write"))?
    }
}
