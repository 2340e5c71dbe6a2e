//! The stopwatch. A single [TimerService] owns the running timer, everything else talks to it
//! through a cloneable [TimerHandle]:
//!   - commands go in over a channel and are answered one by one,
//!   - elapsed seconds and lifecycle events come out over broadcast channels,
//!   - progress is checkpointed into a [SnapshotStore] so a paused timer survives restarts.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::NaiveDateTime;
use engine::{Request, TimerEngine};
use snapshot::SnapshotStore;
use state::{StoppedRun, TimerCommand, TimerPhase, TimerStatus};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::utils::clock::Clock;

mod engine;
pub mod snapshot;
pub mod state;
pub mod writer;

const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);
const DEFAULT_CHECKPOINT_EVERY: u32 = 60;
const REQUEST_QUEUE_SIZE: usize = 16;
const ELAPSED_CHANNEL_CAPACITY: usize = 128;
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("can't {command} a timer that is {phase}")]
    InvalidTransition {
        phase: TimerPhase,
        command: TimerCommand,
    },

    /// The transition took effect, but only in memory.
    #[error("failed to persist the timer: {0:#}")]
    Persistence(anyhow::Error),

    /// The timer stopped, but its snapshot is still on disk.
    #[error("timer stopped but its saved state could not be cleared: {cause:#}")]
    ClearFailed { run: StoppedRun, cause: anyhow::Error },

    #[error("the timer is no longer running")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Started { started_at: NaiveDateTime },
    Resumed { elapsed_seconds: i64 },
    Paused { elapsed_seconds: i64 },
    Stopped(StoppedRun),
    /// A paused timer was brought back from a snapshot.
    Restored { elapsed_seconds: i64 },
}

#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    pub tick_period: Duration,
    /// Number of ticks between two checkpoints.
    pub checkpoint_every: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            tick_period: DEFAULT_TICK_PERIOD,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
        }
    }
}

/// Owns the timer task. Dropping the service without calling [TimerService::shutdown] leaves the
/// task running until every handle is gone.
pub struct TimerService {
    handle: TimerHandle,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl TimerService {
    /// Spawns the timer onto the current runtime. The persisted snapshot is read before the first
    /// command is served.
    pub fn spawn(
        snapshots: Arc<dyn SnapshotStore>,
        clock: impl Clock,
        config: TimerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (requests, receiver) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (elapsed, _) = broadcast::channel(ELAPSED_CHANNEL_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let engine = TimerEngine::new(
            receiver,
            snapshots,
            elapsed.clone(),
            events.clone(),
            Box::new(clock),
            shutdown.clone(),
            config,
        );
        let task = tokio::spawn(engine.run());

        Self {
            handle: TimerHandle {
                requests,
                elapsed,
                events,
            },
            shutdown,
            task,
        }
    }

    pub fn handle(&self) -> TimerHandle {
        self.handle.clone()
    }

    /// Stops the task, saving a running timer so it comes back paused.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.cancel();
        self.task.await?
    }
}

#[derive(Clone)]
pub struct TimerHandle {
    requests: mpsc::Sender<Request>,
    elapsed: broadcast::Sender<i64>,
    events: broadcast::Sender<TimerEvent>,
}

impl TimerHandle {
    pub async fn start(&self) -> Result<TimerStatus, TimerError> {
        self.transition(TimerCommand::Start).await
    }

    pub async fn pause(&self) -> Result<TimerStatus, TimerError> {
        self.transition(TimerCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<TimerStatus, TimerError> {
        self.transition(TimerCommand::Resume).await
    }

    /// Stops the timer and hands back what was measured. Storing it as a session is up to the
    /// caller.
    pub async fn stop(&self) -> Result<StoppedRun, TimerError> {
        self.request(|reply| Request::Stop { reply }).await?
    }

    pub async fn status(&self) -> Result<TimerStatus, TimerError> {
        self.request(|reply| Request::Status { reply }).await
    }

    /// Elapsed seconds on every tick, on pause and on restore. `0` means the timer was reset.
    pub fn subscribe_elapsed(&self) -> broadcast::Receiver<i64> {
        self.elapsed.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TimerEvent> {
        self.events.subscribe()
    }

    async fn transition(&self, command: TimerCommand) -> Result<TimerStatus, TimerError> {
        self.request(|reply| Request::Transition { command, reply })
            .await?
    }

    async fn request<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, TimerError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .await
            .map_err(|_| TimerError::Closed)?;
        response.await.map_err(|_| TimerError::Closed)
    }
}

#[cfg(test)]
mod timer_tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use tokio_util::sync::CancellationToken;

    use super::{
        snapshot::{MemorySnapshotStore, MockSnapshotStore, SnapshotStore, TimerSnapshot},
        state::{TimerCommand, TimerPhase},
        TimerConfig, TimerError, TimerEvent, TimerService,
    };
    use crate::utils::{clock::TestClock, logging::TEST_LOGGING};

    const TEST_START: NaiveDateTime = NaiveDateTime::new(
        NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
    );

    fn spawn(store: Arc<dyn SnapshotStore>) -> TimerService {
        TimerService::spawn(
            store,
            TestClock::starting_at(TEST_START),
            TimerConfig::default(),
            CancellationToken::new(),
        )
    }

    fn paused_snapshot(accumulated_seconds: i64) -> TimerSnapshot {
        TimerSnapshot {
            start_date: TEST_START.date(),
            start_time_of_day: TEST_START.time(),
            accumulated_seconds,
        }
    }

    /// Lets the timer and writer tasks drain without reaching the next tick.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_second() -> Result<()> {
        *TEST_LOGGING;
        let service = spawn(Arc::new(MemorySnapshotStore::default()));
        let timer = service.handle();
        let mut elapsed = timer.subscribe_elapsed();

        let status = timer.start().await?;
        assert_eq!(status.phase, TimerPhase::Running);
        assert_eq!(status.started_at, Some(TEST_START));

        let mut previous = 0;
        for _ in 0..5 {
            let value = elapsed.recv().await?;
            assert_eq!(value, previous + 1);
            previous = value;
        }

        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn start_persists_snapshot_immediately() -> Result<()> {
        let store = Arc::new(MemorySnapshotStore::default());
        let service = spawn(store.clone());

        service.handle().start().await?;

        assert_eq!(store.current(), Some(paused_snapshot(0)));
        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_and_persists() -> Result<()> {
        let store = Arc::new(MemorySnapshotStore::default());
        let service = spawn(store.clone());
        let timer = service.handle();

        timer.start().await?;
        tokio::time::sleep(Duration::from_millis(7500)).await;
        let status = timer.pause().await?;

        assert_eq!(status.phase, TimerPhase::Paused);
        assert_eq!(status.elapsed_seconds, 7);
        assert_eq!(store.current(), Some(paused_snapshot(7)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(timer.status().await?.elapsed_seconds, 7);

        let mut elapsed = timer.subscribe_elapsed();
        timer.resume().await?;
        assert_eq!(elapsed.recv().await?, 8);

        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoints_every_sixty_ticks() -> Result<()> {
        let store = Arc::new(MemorySnapshotStore::default());
        let service = spawn(store.clone());
        let timer = service.handle();
        let mut elapsed = timer.subscribe_elapsed();

        timer.start().await?;
        while elapsed.recv().await? < 59 {}
        settle().await;
        assert_eq!(store.current().map(|s| s.accumulated_seconds), Some(0));

        assert_eq!(elapsed.recv().await?, 60);
        settle().await;
        assert_eq!(store.current().map(|s| s.accumulated_seconds), Some(60));

        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn stop_publishes_zero_and_clears_snapshot() -> Result<()> {
        let store = Arc::new(MemorySnapshotStore::default());
        let service = spawn(store.clone());
        let timer = service.handle();
        let mut events = timer.subscribe_events();

        timer.start().await?;
        tokio::time::sleep(Duration::from_millis(3661_500)).await;
        let mut elapsed = timer.subscribe_elapsed();
        let run = timer.stop().await?;

        assert_eq!(run.elapsed_seconds, 3661);
        assert_eq!(run.start_date, TEST_START.date());
        assert_eq!(run.start_time, TEST_START.time());
        assert_eq!(elapsed.recv().await?, 0);
        assert_eq!(store.current(), None);
        assert_eq!(timer.status().await?.phase, TimerPhase::Idle);

        assert_eq!(
            events.recv().await?,
            TimerEvent::Started {
                started_at: TEST_START
            }
        );
        assert_eq!(events.recv().await?, TimerEvent::Stopped(run));

        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_commands_are_reported() -> Result<()> {
        let service = spawn(Arc::new(MemorySnapshotStore::default()));
        let timer = service.handle();

        assert!(matches!(
            timer.pause().await,
            Err(TimerError::InvalidTransition {
                phase: TimerPhase::Idle,
                command: TimerCommand::Pause
            })
        ));
        assert!(matches!(
            timer.stop().await,
            Err(TimerError::InvalidTransition { .. })
        ));
        timer.start().await?;
        assert!(matches!(
            timer.resume().await,
            Err(TimerError::InvalidTransition {
                phase: TimerPhase::Running,
                ..
            })
        ));

        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn restores_paused_from_snapshot() -> Result<()> {
        *TEST_LOGGING;
        let store = Arc::new(MemorySnapshotStore::with_snapshot(paused_snapshot(3600)));
        let service = spawn(store.clone());
        let timer = service.handle();
        let mut elapsed = timer.subscribe_elapsed();
        let mut events = timer.subscribe_events();

        let status = timer.status().await?;

        assert_eq!(status.phase, TimerPhase::Paused);
        assert_eq!(status.elapsed_seconds, 3600);
        assert_eq!(status.started_at, Some(TEST_START));
        assert_eq!(elapsed.recv().await?, 3600);
        assert_eq!(
            events.recv().await?,
            TimerEvent::Restored {
                elapsed_seconds: 3600
            }
        );

        // Not running: no ticks arrive.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(elapsed.try_recv().is_err());

        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn commands_sent_before_restore_are_queued() -> Result<()> {
        let store = Arc::new(MemorySnapshotStore::with_snapshot(paused_snapshot(120)));
        let service = spawn(store.clone());
        let timer = service.handle();

        // Issued before the timer task had a chance to run at all.
        let (started, status) = tokio::join!(timer.start(), timer.status());

        assert_eq!(started?.elapsed_seconds, 120);
        assert_eq!(status?.phase, TimerPhase::Running);

        let mut elapsed = timer.subscribe_elapsed();
        assert_eq!(elapsed.recv().await?, 121);

        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_snapshot_starts_idle() -> Result<()> {
        let mut store = MockSnapshotStore::new();
        store
            .expect_load()
            .returning(|| Err(anyhow!("unexpected end of file")));
        let service = spawn(Arc::new(store));

        let status = service.handle().status().await?;

        assert_eq!(status.phase, TimerPhase::Idle);
        assert_eq!(status.elapsed_seconds, 0);
        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_write_is_surfaced_but_timer_runs() -> Result<()> {
        let mut store = MockSnapshotStore::new();
        store.expect_load().returning(|| Ok(None));
        store
            .expect_save()
            .returning(|_| Err(anyhow!("disk full")));
        let service = spawn(Arc::new(store));
        let timer = service.handle();

        let result = timer.start().await;

        assert!(matches!(result, Err(TimerError::Persistence(_))));
        assert_eq!(timer.status().await?.phase, TimerPhase::Running);

        // Shutdown tries one last save, which fails again and is only logged.
        service.shutdown().await
    }

    /// Records the order writes land in. Saves are slow so a clear could overtake them if the
    /// writes weren't serialized.
    #[derive(Default)]
    struct RecordingStore {
        log: Mutex<Vec<String>>,
        failures_left: Mutex<u32>,
    }

    impl RecordingStore {
        fn failing(times: u32) -> Self {
            Self {
                log: Mutex::default(),
                failures_left: Mutex::new(times),
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SnapshotStore for RecordingStore {
        async fn load(&self) -> Result<Option<TimerSnapshot>> {
            Ok(None)
        }

        async fn save(&self, snapshot: &TimerSnapshot) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let fail = {
                let mut failures_left = self.failures_left.lock().unwrap();
                let fail = *failures_left > 0 && snapshot.accumulated_seconds > 0;
                if fail {
                    *failures_left -= 1;
                }
                fail
            };
            if fail {
                self.log
                    .lock()
                    .unwrap()
                    .push(format!("failed {}", snapshot.accumulated_seconds));
                return Err(anyhow!("disk busy"));
            }
            self.log
                .lock()
                .unwrap()
                .push(format!("save {}", snapshot.accumulated_seconds));
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            self.log.lock().unwrap().push("clear".into());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn clear_lands_after_inflight_checkpoint() -> Result<()> {
        let store = Arc::new(RecordingStore::default());
        let service = spawn(store.clone());
        let timer = service.handle();
        let mut elapsed = timer.subscribe_elapsed();

        timer.start().await?;
        while elapsed.recv().await? < 60 {}
        // The checkpoint for 60 is still being written.
        timer.stop().await?;

        assert_eq!(store.log(), vec!["save 0", "save 60", "clear"]);
        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn failed_checkpoint_is_retried_on_next_tick() -> Result<()> {
        let store = Arc::new(RecordingStore::failing(1));
        let service = spawn(store.clone());
        let timer = service.handle();
        let mut elapsed = timer.subscribe_elapsed();

        timer.start().await?;
        while elapsed.recv().await? < 61 {}
        // Long enough for the slow retry to land, short of the next tick.
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(store.log(), vec!["save 0", "failed 60", "save 61"]);
        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_checkpoints_running_timer() -> Result<()> {
        let store = Arc::new(MemorySnapshotStore::default());
        let service = spawn(store.clone());

        service.handle().start().await?;
        tokio::time::sleep(Duration::from_millis(42_200)).await;
        service.shutdown().await?;

        assert_eq!(store.current(), Some(paused_snapshot(42)));

        // The next service comes back paused where the last one left off.
        let service = spawn(store.clone());
        let status = service.handle().status().await?;
        assert_eq!(status.phase, TimerPhase::Paused);
        assert_eq!(status.elapsed_seconds, 42);
        service.shutdown().await
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_not_a_plain_transition() -> Result<()> {
        let store = Arc::new(MemorySnapshotStore::default());
        let service = spawn(store.clone());
        let timer = service.handle();

        timer.start().await?;
        let result = timer.transition(TimerCommand::Stop).await;

        assert!(matches!(
            result,
            Err(TimerError::InvalidTransition {
                phase: TimerPhase::Running,
                command: TimerCommand::Stop
            })
        ));
        assert_eq!(timer.status().await?.phase, TimerPhase::Running);
        assert_eq!(store.current(), Some(paused_snapshot(0)));
        service.shutdown().await
    }

    /// Accepts the snapshot written on start, then never finishes another save.
    struct StalledStore;

    #[async_trait]
    impl SnapshotStore for StalledStore {
        async fn load(&self) -> Result<Option<TimerSnapshot>> {
            Ok(None)
        }

        async fn save(&self, snapshot: &TimerSnapshot) -> Result<()> {
            if snapshot.accumulated_seconds > 0 {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        async fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_writer_does_not_hold_up_ticks() -> Result<()> {
        let service = TimerService::spawn(
            Arc::new(StalledStore),
            TestClock::starting_at(TEST_START),
            TimerConfig {
                checkpoint_every: 1,
                ..TimerConfig::default()
            },
            CancellationToken::new(),
        );
        let timer = service.handle();
        let mut elapsed = timer.subscribe_elapsed();

        timer.start().await?;
        // Far more checkpoints than the writer queue holds.
        let mut last = 0;
        while last < 60 {
            last = elapsed.recv().await?;
        }

        assert!(timer.status().await?.elapsed_seconds >= 60);
        // Shutting down would wait on the stalled save forever, the runtime drops the tasks.
        Ok(())
    }
}
