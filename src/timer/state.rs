use std::fmt::Display;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tokio::time::Instant;

use super::{snapshot::TimerSnapshot, TimerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Running,
    Paused,
}

impl Display for TimerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerPhase::Idle => write!(f, "idle"),
            TimerPhase::Running => write!(f, "running"),
            TimerPhase::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Start,
    Pause,
    Resume,
    Stop,
}

impl Display for TimerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimerCommand::Start => write!(f, "start"),
            TimerCommand::Pause => write!(f, "pause"),
            TimerCommand::Resume => write!(f, "resume"),
            TimerCommand::Stop => write!(f, "stop"),
        }
    }
}

/// What is left of a run after it has been stopped. Turning it into a stored session is up to the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedRun {
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub elapsed_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerStatus {
    pub phase: TimerPhase,
    pub elapsed_seconds: i64,
    pub started_at: Option<NaiveDateTime>,
}

/// Pure timer state machine. It never reads a clock itself, every transition gets the current
/// moments passed in, so it can be driven by tests directly.
#[derive(Debug, Clone)]
pub struct TimerState {
    phase: TimerPhase,
    /// Seconds accumulated before the current run began, or the full total while not running.
    accumulated_seconds: i64,
    /// Wall-clock moment the first run of this session began.
    started_at: Option<NaiveDateTime>,
    /// Monotonic moment the current run began. Only set while running.
    run_origin: Option<Instant>,
}

impl Default for TimerState {
    fn default() -> Self {
        Self::idle()
    }
}

impl TimerState {
    pub fn idle() -> Self {
        Self {
            phase: TimerPhase::Idle,
            accumulated_seconds: 0,
            started_at: None,
            run_origin: None,
        }
    }

    /// Rebuilds a paused timer out of a persisted snapshot. A run is never resumed automatically
    /// because nothing is known about the gap since the snapshot was written.
    pub fn restored(snapshot: &TimerSnapshot) -> Self {
        Self {
            phase: TimerPhase::Paused,
            accumulated_seconds: snapshot.accumulated_seconds,
            started_at: Some(snapshot.start_date.and_time(snapshot.start_time_of_day)),
            run_origin: None,
        }
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        self.started_at
    }

    /// Elapsed seconds as of `now`.
    pub fn elapsed_at(&self, now: Instant) -> i64 {
        match self.run_origin {
            Some(origin) => {
                self.accumulated_seconds
                    + now.saturating_duration_since(origin).as_secs() as i64
            }
            None => self.accumulated_seconds,
        }
    }

    pub fn status_at(&self, now: Instant) -> TimerStatus {
        TimerStatus {
            phase: self.phase,
            elapsed_seconds: self.elapsed_at(now),
            started_at: self.started_at,
        }
    }

    /// Starting a paused timer is the same as resuming it.
    pub fn start(&mut self, wall_time: NaiveDateTime, now: Instant) -> Result<(), TimerError> {
        match self.phase {
            TimerPhase::Idle => {
                self.accumulated_seconds = 0;
                self.started_at = Some(wall_time);
                self.begin_run(now);
                Ok(())
            }
            TimerPhase::Paused => self.resume(now),
            TimerPhase::Running => Err(self.invalid(TimerCommand::Start)),
        }
    }

    pub fn resume(&mut self, now: Instant) -> Result<(), TimerError> {
        if self.phase != TimerPhase::Paused {
            return Err(self.invalid(TimerCommand::Resume));
        }
        self.begin_run(now);
        Ok(())
    }

    /// Returns the elapsed seconds the timer froze at.
    pub fn pause(&mut self, now: Instant) -> Result<i64, TimerError> {
        if self.phase != TimerPhase::Running {
            return Err(self.invalid(TimerCommand::Pause));
        }
        self.accumulated_seconds = self.elapsed_at(now);
        self.run_origin = None;
        self.phase = TimerPhase::Paused;
        Ok(self.accumulated_seconds)
    }

    pub fn stop(&mut self, now: Instant) -> Result<StoppedRun, TimerError> {
        let (TimerPhase::Running | TimerPhase::Paused) = self.phase else {
            return Err(self.invalid(TimerCommand::Stop));
        };
        let elapsed_seconds = self.elapsed_at(now);
        let started_at = self
            .started_at
            .ok_or(TimerError::InvalidTransition {
                phase: self.phase,
                command: TimerCommand::Stop,
            })?;
        *self = Self::idle();
        Ok(StoppedRun {
            start_date: started_at.date(),
            start_time: started_at.time(),
            elapsed_seconds,
        })
    }

    /// Elapsed seconds for a tick at `now`. `None` when not running.
    pub fn tick(&self, now: Instant) -> Option<i64> {
        self.is_running().then(|| self.elapsed_at(now))
    }

    /// The state worth persisting, `None` when idle.
    pub fn snapshot_at(&self, now: Instant) -> Option<TimerSnapshot> {
        if self.phase == TimerPhase::Idle {
            return None;
        }
        let started_at = self.started_at?;
        Some(TimerSnapshot {
            start_date: started_at.date(),
            start_time_of_day: started_at.time(),
            accumulated_seconds: self.elapsed_at(now),
        })
    }

    fn begin_run(&mut self, now: Instant) {
        self.run_origin = Some(now);
        self.phase = TimerPhase::Running;
    }

    fn invalid(&self, command: TimerCommand) -> TimerError {
        TimerError::InvalidTransition {
            phase: self.phase,
            command,
        }
    }
}
