//! Rules a session has to pass before it reaches the store, and the conversion of a stopped timer
//! run into a session.

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    storage::{entities::WorkSession, error::StoreError, session_store::SessionStore},
    timer::state::StoppedRun,
    utils::time::truncate_to_minute,
};

/// Problems the user can fix. Only [ValidationError::ElapsedExceedsSpan] can be overridden.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ValidationError {
    #[error("worked time must be more than zero minutes")]
    ZeroElapsed,

    #[error("the session ends before it starts")]
    EndBeforeStart,

    #[error(
        "worked time ({elapsed_seconds}s) is longer than the time between start and end ({span_seconds}s)"
    )]
    ElapsedExceedsSpan {
        elapsed_seconds: i64,
        span_seconds: i64,
    },
}

impl ValidationError {
    pub fn is_overridable(&self) -> bool {
        matches!(self, ValidationError::ElapsedExceedsSpan { .. })
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Checks a session before saving. `force_save` only silences the elapsed-exceeds-span warning.
pub fn validate(session: &WorkSession, force_save: bool) -> Result<(), ValidationError> {
    if session.elapsed_seconds <= 0 {
        return Err(ValidationError::ZeroElapsed);
    }
    let span_seconds = session.span_seconds();
    if span_seconds < 0 {
        return Err(ValidationError::EndBeforeStart);
    }
    if span_seconds < session.elapsed_seconds && !force_save {
        return Err(ValidationError::ElapsedExceedsSpan {
            elapsed_seconds: session.elapsed_seconds,
            span_seconds,
        });
    }
    Ok(())
}

/// Validates and inserts a new session, returning its id. `session` is only borrowed, so on an
/// error the caller still has the input to correct.
pub async fn save_new(
    store: &(impl SessionStore + ?Sized),
    session: &WorkSession,
    force_save: bool,
) -> Result<i64, SaveError> {
    validate(session, force_save).inspect_err(|e| warn!("Rejected new session: {e}"))?;
    let id = store.insert(session.clone()).await?;
    Ok(id)
}

/// Validates and replaces an existing session.
pub async fn save_edit(
    store: &(impl SessionStore + ?Sized),
    session: &WorkSession,
    force_save: bool,
) -> Result<(), SaveError> {
    validate(session, force_save)
        .inspect_err(|e| warn!("Rejected edit of session {}: {e}", session.id))?;
    store.update(session.clone()).await?;
    Ok(())
}

/// Turns a stopped run into an unsaved session ending at `end`. Times keep minute precision and
/// the elapsed time is cut down to whole minutes.
pub fn finalize(run: &StoppedRun, end: NaiveDateTime) -> WorkSession {
    let elapsed_seconds = run.elapsed_seconds - run.elapsed_seconds.rem_euclid(60);
    info!(
        "Finalizing run of {}s started {} {}",
        run.elapsed_seconds, run.start_date, run.start_time
    );
    WorkSession {
        id: 0,
        start_day: run.start_date,
        end_day: end.date(),
        start_time: truncate_to_minute(run.start_time),
        end_time: truncate_to_minute(end.time()),
        elapsed_seconds,
    }
}
