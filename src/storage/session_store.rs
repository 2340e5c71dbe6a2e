use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use fs4::tokio::AsyncFileExt;
use futures::{stream, Stream};
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    sync::{
        broadcast::{self, error::RecvError},
        Mutex,
    },
};
use tracing::{debug, info, warn};

use super::{
    entities::{SessionChange, WorkSession},
    error::StoreError,
};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Interface for abstracting storage of work sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with [StoreError::NotFound] if there is no such session.
    async fn get_by_id(&self, id: i64) -> Result<WorkSession, StoreError>;

    /// Sessions whose `start_day` is `day`, in insertion order.
    async fn get_by_day(&self, day: NaiveDate) -> Result<Vec<WorkSession>, StoreError>;

    /// Stores the session under a fresh id and returns it. The id of `session` is ignored.
    async fn insert(&self, session: WorkSession) -> Result<i64, StoreError>;

    /// Replaces the session with the same id.
    async fn update(&self, session: WorkSession) -> Result<(), StoreError>;

    /// Deleting an absent id is not an error.
    async fn delete_by_id(&self, id: i64) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;
}

fn check_constraints(session: &WorkSession) -> Result<(), StoreError> {
    if session.elapsed_seconds <= 0 {
        return Err(StoreError::ConstraintViolation(format!(
            "elapsed time must be positive, got {} seconds",
            session.elapsed_seconds
        )));
    }
    Ok(())
}

/// Emits the current value of a session, then its new value after every change to it. A deleted
/// session yields [StoreError::NotFound]. The stream ends once the store is dropped.
pub fn observe_session(
    store: Arc<dyn SessionStore>,
    id: i64,
) -> impl Stream<Item = Result<WorkSession, StoreError>> {
    // Subscribing before the first read means no change can slip in between.
    let changes = store.subscribe();
    stream::unfold(
        (store, changes, true),
        move |(store, mut changes, first)| async move {
            if !first {
                loop {
                    match changes.recv().await {
                        Ok(change) if change.id() == id => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("Observer of session {id} lagged by {skipped} changes");
                            break;
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
            let value = store.get_by_id(id).await;
            Some((value, (store, changes, false)))
        },
    )
}

/// Layout of the sessions file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionDocument {
    next_id: i64,
    sessions: Vec<WorkSession>,
}

impl Default for SessionDocument {
    fn default() -> Self {
        Self {
            next_id: 1,
            sessions: vec![],
        }
    }
}

/// The main realization of [SessionStore]. All sessions live in a single JSON document. Writers
/// hold an exclusive lock on a sidecar lock file, so a running timer and a second invocation of
/// the cli can't lose each other's writes.
pub struct FileSessionStore {
    path: PathBuf,
    lock_path: PathBuf,
    writer: Mutex<()>,
    changes: broadcast::Sender<SessionChange>,
}

impl FileSessionStore {
    pub const FILE_NAME: &str = "sessions.json";

    pub fn new(dir: &Path) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(dir)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            path: dir.join(Self::FILE_NAME),
            lock_path: dir.join("sessions.lock"),
            writer: Mutex::new(()),
            changes,
        })
    }

    async fn open_lock(&self) -> Result<File> {
        let file = File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(&self.lock_path)
            .await
            .with_context(|| format!("Failed to open lock file {:?}", self.lock_path))?;
        Ok(file)
    }

    async fn read_document(&self) -> Result<SessionDocument> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(SessionDocument::default()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Sessions file {:?} is corrupted", self.path)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(SessionDocument::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {:?}", self.path)),
        }
    }

    async fn write_document(&self, document: &SessionDocument) -> Result<()> {
        let buffer = serde_json::to_vec_pretty(document)?;
        let temporary = self.path.with_extension("json.tmp");
        tokio::fs::write(&temporary, &buffer).await?;
        tokio::fs::rename(&temporary, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> Result<SessionDocument> {
        let lock = self.open_lock().await?;
        lock.lock_shared()?;
        let result = self.read_document().await;
        lock.unlock_async().await?;
        result
    }

    /// Runs `change` against the freshest document and writes the result back, all under the
    /// exclusive lock.
    async fn modify<T>(
        &self,
        change: impl FnOnce(&mut SessionDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _writer = self.writer.lock().await;
        let lock = self.open_lock().await?;
        lock.lock_exclusive().context("Failed to lock sessions file")?;

        let result = async {
            let mut document = self.read_document().await?;
            let value = change(&mut document)?;
            self.write_document(&document).await?;
            Ok::<T, StoreError>(value)
        }
        .await;

        lock.unlock_async()
            .await
            .context("Failed to unlock sessions file")?;
        result
    }

    fn notify(&self, change: SessionChange) {
        // No receivers is fine.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get_by_id(&self, id: i64) -> Result<WorkSession, StoreError> {
        self.load()
            .await?
            .sessions
            .into_iter()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    async fn get_by_day(&self, day: NaiveDate) -> Result<Vec<WorkSession>, StoreError> {
        let sessions = self
            .load()
            .await?
            .sessions
            .into_iter()
            .filter(|s| s.start_day == day)
            .collect::<Vec<_>>();
        debug!("Found {} sessions on {day}", sessions.len());
        Ok(sessions)
    }

    async fn insert(&self, session: WorkSession) -> Result<i64, StoreError> {
        check_constraints(&session)?;
        let id = self
            .modify(|document| {
                let id = document.next_id;
                document.next_id += 1;
                document.sessions.push(session.with_id(id));
                Ok(id)
            })
            .await?;
        info!("Inserted work session {id}");
        self.notify(SessionChange::Inserted(id));
        Ok(id)
    }

    async fn update(&self, session: WorkSession) -> Result<(), StoreError> {
        check_constraints(&session)?;
        let id = session.id;
        self.modify(|document| {
            let slot = document
                .sessions
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(StoreError::NotFound(id))?;
            *slot = session;
            Ok(())
        })
        .await?;
        info!("Updated work session {id}");
        self.notify(SessionChange::Updated(id));
        Ok(())
    }

    async fn delete_by_id(&self, id: i64) -> Result<(), StoreError> {
        let removed = self
            .modify(|document| {
                let before = document.sessions.len();
                document.sessions.retain(|s| s.id != id);
                Ok(before != document.sessions.len())
            })
            .await?;
        if removed {
            info!("Deleted work session {id}");
            self.notify(SessionChange::Deleted(id));
        } else {
            warn!("Work session {id} was already absent");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }
}
