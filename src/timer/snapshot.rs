use std::{io::ErrorKind, path::PathBuf, sync::Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Minimal state needed to bring back an unfinished timer after a restart. Keys are kept the same
/// as the ones the timer always used on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub start_date: NaiveDate,
    pub start_time_of_day: NaiveTime,
    pub accumulated_seconds: i64,
}

/// Interface for persisting [TimerSnapshot]. No snapshot means no active or paused run.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<TimerSnapshot>>;

    async fn save(&self, snapshot: &TimerSnapshot) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Keeps the snapshot as a small JSON object in a file of its own.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub const FILE_NAME: &str = "timer.json";

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Option<TimerSnapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", self.path)),
        };
        let snapshot = serde_json::from_slice::<TimerSnapshot>(&bytes)
            .with_context(|| format!("Timer snapshot {:?} is corrupted", self.path))?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &TimerSnapshot) -> Result<()> {
        debug!("Writing timer snapshot {:?}", snapshot);
        let buffer = serde_json::to_vec(snapshot)?;
        // A half written snapshot would read back as corrupted, so write aside and swap.
        let temporary = self.path.with_extension("json.tmp");
        tokio::fs::write(&temporary, &buffer).await?;
        tokio::fs::rename(&temporary, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Snapshot store that only lives as long as the process. Used when there is nowhere to persist
/// to.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Option<TimerSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn with_snapshot(snapshot: TimerSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }

    pub fn current(&self) -> Option<TimerSnapshot> {
        self.snapshot.lock().ok().and_then(|v| v.clone())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<TimerSnapshot>> {
        Ok(self
            .snapshot
            .lock()
            .map_err(|_| anyhow!("Snapshot lock poisoned"))?
            .clone())
    }

    async fn save(&self, snapshot: &TimerSnapshot) -> Result<()> {
        *self
            .snapshot
            .lock()
            .map_err(|_| anyhow!("Snapshot lock poisoned"))? = Some(snapshot.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        *self
            .snapshot
            .lock()
            .map_err(|_| anyhow!("Snapshot lock poisoned"))? = None;
        Ok(())
    }
}
