use std::sync::Arc;

use anyhow::Result;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::utils::clock::Clock;

use super::{
    snapshot::SnapshotStore,
    state::{StoppedRun, TimerCommand, TimerState, TimerStatus},
    writer::{SnapshotWrite, SnapshotWriter, SnapshotWriterHandle},
    TimerConfig, TimerError, TimerEvent,
};

pub(super) enum Request {
    Transition {
        command: TimerCommand,
        reply: oneshot::Sender<Result<TimerStatus, TimerError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<StoppedRun, TimerError>>,
    },
    Status {
        reply: oneshot::Sender<TimerStatus>,
    },
}

/// The actor owning the timer. Requests and ticks are handled by the same loop, so a tick never
/// sees a transition half applied.
pub(super) struct TimerEngine {
    requests: mpsc::Receiver<Request>,
    state: TimerState,
    snapshots: Arc<dyn SnapshotStore>,
    writer: SnapshotWriterHandle,
    writer_task: JoinHandle<()>,
    elapsed: broadcast::Sender<i64>,
    events: broadcast::Sender<TimerEvent>,
    clock: Box<dyn Clock>,
    shutdown: CancellationToken,
    config: TimerConfig,
    next_tick: Instant,
    ticks_since_checkpoint: u32,
    pending_checkpoint: Option<oneshot::Receiver<Result<()>>>,
    retry_checkpoint: bool,
}

impl TimerEngine {
    pub(super) fn new(
        requests: mpsc::Receiver<Request>,
        snapshots: Arc<dyn SnapshotStore>,
        elapsed: broadcast::Sender<i64>,
        events: broadcast::Sender<TimerEvent>,
        clock: Box<dyn Clock>,
        shutdown: CancellationToken,
        config: TimerConfig,
    ) -> Self {
        let (writer, writer_handle) = SnapshotWriter::new(snapshots.clone());
        let writer_task = tokio::spawn(writer.run());
        let next_tick = clock.instant();
        Self {
            requests,
            state: TimerState::idle(),
            snapshots,
            writer: writer_handle,
            writer_task,
            elapsed,
            events,
            clock,
            shutdown,
            config,
            next_tick,
            ticks_since_checkpoint: 0,
            pending_checkpoint: None,
            retry_checkpoint: false,
        }
    }

    /// Executes the timer event loop. Requests sent before restoring finishes simply wait in the
    /// channel.
    pub(super) async fn run(mut self) -> Result<()> {
        self.restore().await;

        loop {
            let running = self.state.is_running();
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                request = self.requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                _ = self.clock.sleep_until(self.next_tick), if running => self.tick(),
            }
        }

        self.finish().await
    }

    async fn restore(&mut self) {
        match self.snapshots.load().await {
            Ok(Some(snapshot)) if snapshot.accumulated_seconds > 0 => {
                info!("Restoring paused timer from {:?}", snapshot);
                self.state = TimerState::restored(&snapshot);
                self.publish_elapsed(snapshot.accumulated_seconds);
                self.publish(TimerEvent::Restored {
                    elapsed_seconds: snapshot.accumulated_seconds,
                });
            }
            Ok(Some(snapshot)) => debug!("Ignoring empty timer snapshot {:?}", snapshot),
            Ok(None) => debug!("No timer snapshot to restore"),
            Err(e) => warn!("Timer snapshot is unreadable, starting idle: {e:?}"),
        }
    }

    async fn handle(&mut self, request: Request) {
        match request {
            Request::Transition { command, reply } => {
                let result = self.transition(command).await;
                if let Err(e) = &result {
                    warn!("Timer {command} failed: {e}");
                }
                let _ = reply.send(result);
            }
            Request::Stop { reply } => {
                let result = self.stop().await;
                let _ = reply.send(result);
            }
            Request::Status { reply } => {
                let _ = reply.send(self.state.status_at(self.clock.instant()));
            }
        }
    }

    async fn transition(&mut self, command: TimerCommand) -> Result<TimerStatus, TimerError> {
        let now = self.clock.instant();
        match command {
            TimerCommand::Start | TimerCommand::Resume => {
                let was_idle = self.state.started_at().is_none();
                if command == TimerCommand::Start {
                    self.state.start(self.clock.time(), now)?;
                } else {
                    self.state.resume(now)?;
                }
                self.next_tick = now + self.config.tick_period;
                let elapsed_seconds = self.state.elapsed_at(now);
                match self.state.started_at() {
                    Some(started_at) if was_idle => {
                        info!("Timer started at {started_at}");
                        self.publish(TimerEvent::Started { started_at });
                    }
                    _ => {
                        info!("Timer resumed at {elapsed_seconds}s");
                        self.publish(TimerEvent::Resumed { elapsed_seconds });
                    }
                }
            }
            TimerCommand::Pause => {
                let elapsed_seconds = self.state.pause(now)?;
                info!("Timer paused at {elapsed_seconds}s");
                self.publish_elapsed(elapsed_seconds);
                self.publish(TimerEvent::Paused { elapsed_seconds });
            }
            TimerCommand::Stop => {
                // Stopping hands back the run, so it only ever arrives as Request::Stop.
                return Err(TimerError::InvalidTransition {
                    phase: self.state.phase(),
                    command,
                });
            }
        }
        self.persist_now(now).await?;
        Ok(self.state.status_at(now))
    }

    async fn stop(&mut self) -> Result<StoppedRun, TimerError> {
        let now = self.clock.instant();
        let run = self.state.stop(now)?;
        info!("Timer stopped at {}s", run.elapsed_seconds);

        // A checkpoint still in flight completes, but its outcome no longer matters.
        self.pending_checkpoint = None;
        self.retry_checkpoint = false;
        self.ticks_since_checkpoint = 0;

        self.publish_elapsed(0);
        self.publish(TimerEvent::Stopped(run.clone()));

        // The writer is FIFO, so this lands after every checkpoint queued so far.
        if let Err(cause) = self.writer.write(SnapshotWrite::Clear).await {
            return Err(TimerError::ClearFailed { run, cause });
        }
        Ok(run)
    }

    fn tick(&mut self) {
        let now = self.clock.instant();
        self.next_tick += self.config.tick_period;
        if self.next_tick <= now {
            // Fell behind, skip the missed ticks instead of bursting through them.
            self.next_tick = now + self.config.tick_period;
        }

        let Some(elapsed_seconds) = self.state.tick(now) else {
            return;
        };
        self.publish_elapsed(elapsed_seconds);

        self.poll_checkpoint();
        self.ticks_since_checkpoint += 1;
        if self.ticks_since_checkpoint >= self.config.checkpoint_every || self.retry_checkpoint {
            self.ticks_since_checkpoint = 0;
            self.retry_checkpoint = false;
            self.queue_checkpoint(now);
        }
    }

    fn poll_checkpoint(&mut self) {
        let Some(pending) = self.pending_checkpoint.as_mut() else {
            return;
        };
        match pending.try_recv() {
            Ok(Ok(())) => self.pending_checkpoint = None,
            Ok(Err(e)) => {
                warn!("Checkpoint failed, retrying on next tick: {e:?}");
                self.pending_checkpoint = None;
                self.retry_checkpoint = true;
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                self.pending_checkpoint = None;
                self.retry_checkpoint = true;
            }
        }
    }

    /// Never waits for room in the writer queue. A full queue counts as a failed checkpoint.
    fn queue_checkpoint(&mut self, now: Instant) {
        let Some(snapshot) = self.state.snapshot_at(now) else {
            return;
        };
        debug!("Queueing checkpoint at {}s", snapshot.accumulated_seconds);
        match self.writer.try_queue(SnapshotWrite::Save(snapshot)) {
            Ok(outcome) => self.pending_checkpoint = Some(outcome),
            Err(write) => {
                warn!("Snapshot writer is backed up, retrying on next tick {:?}", write);
                self.retry_checkpoint = true;
            }
        }
    }

    async fn persist_now(&mut self, now: Instant) -> Result<(), TimerError> {
        self.ticks_since_checkpoint = 0;
        self.pending_checkpoint = None;
        self.retry_checkpoint = false;
        let write = match self.state.snapshot_at(now) {
            Some(snapshot) => SnapshotWrite::Save(snapshot),
            None => SnapshotWrite::Clear,
        };
        self.writer
            .write(write)
            .await
            .map_err(TimerError::Persistence)
    }

    /// A running timer is checkpointed so the next start can pick it back up as paused.
    async fn finish(self) -> Result<()> {
        let Self {
            state,
            writer,
            writer_task,
            clock,
            ..
        } = self;

        if let Some(snapshot) = state.snapshot_at(clock.instant()) {
            info!("Saving timer at {}s before shutting down", snapshot.accumulated_seconds);
            if let Err(e) = writer.write(SnapshotWrite::Save(snapshot)).await {
                error!("Failed to save timer before shutting down {e:?}");
            }
        }

        drop(writer);
        writer_task.await?;
        info!("Timer shut down");
        Ok(())
    }

    fn publish_elapsed(&self, elapsed_seconds: i64) {
        // No subscribers is fine.
        let _ = self.elapsed.send(elapsed_seconds);
    }

    fn publish(&self, event: TimerEvent) {
        let _ = self.events.send(event);
    }
}
