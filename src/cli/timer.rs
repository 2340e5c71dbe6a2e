use std::{
    future::Future,
    io::{self, Write},
    path::Path,
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Result};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::{BroadcastStream, LinesStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    session::{finalize, save_new, SaveError, ValidationError},
    storage::session_store::{FileSessionStore, SessionStore},
    timer::{
        snapshot::FileSnapshotStore,
        state::{StoppedRun, TimerStatus},
        TimerConfig, TimerError, TimerEvent, TimerHandle, TimerService,
    },
    utils::{
        clock::{Clock, DefaultClock},
        time::format_elapsed,
    },
};

use super::shutdown::detect_shutdown;

const HELP: &str = "Commands: start (s), pause (p), resume (r), stop (x), status, help, quit (q)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Start,
    Pause,
    Resume,
    Stop,
    Status,
    Help,
    Quit,
}

impl FromStr for Input {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "start" | "s" => Ok(Input::Start),
            "pause" | "p" => Ok(Input::Pause),
            "resume" | "r" => Ok(Input::Resume),
            "stop" | "x" => Ok(Input::Stop),
            "status" => Ok(Input::Status),
            "help" | "h" | "?" => Ok(Input::Help),
            "quit" | "q" | "exit" => Ok(Input::Quit),
            other => Err(anyhow!("Unknown command {other:?}")),
        }
    }
}

/// Runs the stopwatch in the foreground until `quit` or Ctrl-C. A running timer is checkpointed on
/// the way out and comes back paused next time.
pub async fn process_timer_command(dir: &Path) -> Result<()> {
    let sessions = FileSessionStore::new(dir)?;
    let snapshots = Arc::new(FileSnapshotStore::new(
        dir.join(FileSnapshotStore::FILE_NAME),
    ));

    let cancellation = CancellationToken::new();
    tokio::spawn(detect_shutdown(cancellation.clone()));

    let service = TimerService::spawn(
        snapshots,
        DefaultClock,
        TimerConfig::default(),
        cancellation.clone(),
    );
    let handle = service.handle();

    println!("{HELP}");
    let result = interact(&handle, &sessions, &DefaultClock, cancellation.clone()).await;
    println!();

    cancellation.cancel();
    service.shutdown().await?;
    result
}

async fn interact(
    handle: &TimerHandle,
    sessions: &(impl SessionStore + ?Sized),
    clock: &impl Clock,
    cancellation: CancellationToken,
) -> Result<()> {
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut elapsed = BroadcastStream::new(handle.subscribe_elapsed());
    let mut events = BroadcastStream::new(handle.subscribe_events());

    loop {
        tokio::select! {
            _ = cancellation.cancelled() => return Ok(()),
            line = lines.next() => {
                let Some(line) = line else {
                    return Ok(());
                };
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let input = match line.parse::<Input>() {
                    Ok(input) => input,
                    Err(e) => {
                        println!("{e}. {HELP}");
                        continue;
                    }
                };
                if input == Input::Quit {
                    return Ok(());
                }
                if input == Input::Stop {
                    if let Some(run) = stop(handle).await {
                        let saved = save_run(sessions, &run, clock, |e| confirm(&mut lines, e)).await;
                        if let Err(e) = saved {
                            error!("Failed to save the session {e:?}");
                            println!("Failed to save the session: {e}");
                        }
                    }
                    continue;
                }
                apply(handle, input).await;
            }
            Some(Ok(seconds)) = elapsed.next() => {
                print!("\r{}  ", format_elapsed(seconds));
                let _ = io::stdout().flush();
            }
            Some(Ok(event)) = events.next() => {
                if let TimerEvent::Restored { elapsed_seconds } = event {
                    println!("Restored a paused timer at {}", format_elapsed(elapsed_seconds));
                }
            }
        }
    }
}

async fn apply(handle: &TimerHandle, input: Input) {
    let result = match input {
        Input::Start => handle.start().await,
        Input::Pause => handle.pause().await,
        Input::Resume => handle.resume().await,
        Input::Status => handle.status().await,
        Input::Help => {
            println!("{HELP}");
            return;
        }
        Input::Stop | Input::Quit => return,
    };
    match result {
        Ok(status) => println!("\r{}", describe(&status)),
        Err(e @ TimerError::InvalidTransition { .. }) => println!("\r{e}"),
        Err(TimerError::Persistence(e)) => {
            warn!("Timer transition was not persisted {e:?}");
            println!("\rWarning: the timer state could not be saved: {e}");
        }
        Err(e) => println!("\r{e}"),
    }
}

async fn stop(handle: &TimerHandle) -> Option<StoppedRun> {
    match handle.stop().await {
        Ok(run) => Some(run),
        Err(TimerError::ClearFailed { run, cause }) => {
            warn!("Stopped timer left its snapshot behind {cause:?}");
            println!("\rWarning: the saved timer could not be removed: {cause}");
            Some(run)
        }
        Err(e) => {
            println!("\r{e}");
            None
        }
    }
}

/// Finalizes `run` at the current time and stores it. When worked time exceeds the span `confirm`
/// decides whether it is saved anyway.
async fn save_run<F, Fut>(
    sessions: &(impl SessionStore + ?Sized),
    run: &StoppedRun,
    clock: &impl Clock,
    confirm: F,
) -> Result<Option<i64>, SaveError>
where
    F: FnOnce(ValidationError) -> Fut,
    Fut: Future<Output = bool>,
{
    let draft = finalize(run, clock.time());
    let id = match save_new(sessions, &draft, false).await {
        Ok(id) => id,
        Err(SaveError::Validation(e)) if e.is_overridable() => {
            if !confirm(e).await {
                println!("Session discarded");
                return Ok(None);
            }
            save_new(sessions, &draft, true).await?
        }
        Err(SaveError::Validation(e)) => {
            println!("\rSession not saved: {e}");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    info!("Saved timer run as session {id}");
    println!(
        "\rSaved session {id}, worked {}",
        format_elapsed(draft.elapsed_seconds)
    );
    Ok(Some(id))
}

async fn confirm<R>(lines: &mut LinesStream<R>, warning: ValidationError) -> bool
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    println!("\r{warning}. Save anyway? [y/N]");
    match lines.next().await {
        Some(Ok(answer)) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        _ => false,
    }
}

fn describe(status: &TimerStatus) -> String {
    format!("{} {}", status.phase, format_elapsed(status.elapsed_seconds))
}
