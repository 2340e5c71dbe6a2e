use std::path::Path;

use anyhow::Result;
use chrono::{Local, NaiveDate, NaiveTime};
use clap::Subcommand;
use tracing::info;

use crate::{
    session::{save_edit, save_new, SaveError, ValidationError},
    storage::{
        entities::WorkSession,
        error::StoreError,
        session_store::{FileSessionStore, SessionStore},
    },
    utils::time::{format_day, format_elapsed, format_time_of_day, parse_day, parse_time_of_day},
};

/// A year of uninterrupted work, far above anything a single session can hold.
const MAX_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Subcommand)]
pub enum LogCommand {
    #[command(about = "Add a session by hand")]
    Add {
        #[command(flatten)]
        session: SessionArgs,
    },
    #[command(about = "Replace every field of a stored session")]
    Edit {
        id: i64,
        #[command(flatten)]
        session: SessionArgs,
    },
    #[command(about = "Delete a session. Deleting a missing one does nothing")]
    Delete { id: i64 },
    #[command(about = "Print a single session")]
    Show { id: i64 },
    #[command(about = "List the sessions that started on a day. Defaults to today")]
    Day {
        #[arg(value_parser = parse_day, help = "Day like 2025-01-05")]
        day: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, clap::Args)]
pub struct SessionArgs {
    #[arg(long, value_parser = parse_day, help = "Day the session started, like 2025-01-05")]
    start_day: NaiveDate,
    #[arg(long, value_parser = parse_time_of_day, help = "Time the session started, like 09:00")]
    start_time: NaiveTime,
    #[arg(
        long,
        value_parser = parse_day,
        help = "Day the session ended. Same as the start day if omitted"
    )]
    end_day: Option<NaiveDate>,
    #[arg(long, value_parser = parse_time_of_day, help = "Time the session ended, like 17:30")]
    end_time: NaiveTime,
    #[arg(
        long,
        value_parser = clap::value_parser!(i64).range(0..=MAX_MINUTES),
        help = "Minutes actually worked"
    )]
    minutes: i64,
    #[arg(
        long,
        help = "Save even if the worked time is longer than the time between start and end"
    )]
    force: bool,
}

impl SessionArgs {
    fn to_session(&self) -> WorkSession {
        WorkSession {
            id: 0,
            start_day: self.start_day,
            end_day: self.end_day.unwrap_or(self.start_day),
            start_time: self.start_time,
            end_time: self.end_time,
            elapsed_seconds: self.minutes * 60,
        }
    }
}

pub async fn process_log_command(dir: &Path, command: LogCommand) -> Result<()> {
    let store = FileSessionStore::new(dir)?;
    match command {
        LogCommand::Add { session } => {
            let draft = session.to_session();
            match save_new(&store, &draft, session.force).await {
                Ok(id) => {
                    info!("Added session {id}");
                    println!("Added session {id}");
                    Ok(())
                }
                Err(e) => report_save_error(e),
            }
        }
        LogCommand::Edit { id, session } => {
            let draft = session.to_session().with_id(id);
            match save_edit(&store, &draft, session.force).await {
                Ok(()) => {
                    println!("Updated session {id}");
                    Ok(())
                }
                Err(e) => report_save_error(e),
            }
        }
        LogCommand::Delete { id } => {
            store.delete_by_id(id).await?;
            println!("Deleted session {id}");
            Ok(())
        }
        LogCommand::Show { id } => match store.get_by_id(id).await {
            Ok(session) => {
                println!("{}", format_session(&session));
                Ok(())
            }
            Err(StoreError::NotFound(id)) => {
                println!("There is no session {id}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        LogCommand::Day { day } => {
            let day = day.unwrap_or_else(|| Local::now().date_naive());
            let sessions = store.get_by_day(day).await?;
            if sessions.is_empty() {
                println!("No sessions on {}", format_day(day));
            }
            for session in &sessions {
                println!("{}", format_session(session));
            }
            Ok(())
        }
    }
}

/// Validation problems are the user's to fix, so they are printed instead of failing the process.
fn report_save_error(error: SaveError) -> Result<()> {
    match error {
        SaveError::Validation(e @ ValidationError::ElapsedExceedsSpan { .. }) => {
            println!("Not saved: {e}. Pass --force to save it anyway");
            Ok(())
        }
        SaveError::Validation(e) => {
            println!("Not saved: {e}");
            Ok(())
        }
        SaveError::Store(StoreError::NotFound(id)) => {
            println!("There is no session {id}");
            Ok(())
        }
        SaveError::Store(e) => Err(e.into()),
    }
}

pub fn format_session(session: &WorkSession) -> String {
    let end_day = if session.end_day == session.start_day {
        String::new()
    } else {
        format!("{} ", format_day(session.end_day))
    };
    format!(
        "#{}\t{} {} - {}{}\t{}",
        session.id,
        format_day(session.start_day),
        format_time_of_day(session.start_time),
        end_day,
        format_time_of_day(session.end_time),
        format_elapsed(session.elapsed_seconds),
    )
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};
    use clap::Parser;

    use super::{format_session, LogCommand, MAX_MINUTES};
    use crate::storage::entities::WorkSession;

    #[derive(Debug, Parser)]
    struct TestArgs {
        #[command(subcommand)]
        command: LogCommand,
    }

    #[test]
    fn add_defaults_end_day_to_start_day() {
        let args = TestArgs::try_parse_from([
            "test",
            "add",
            "--start-day",
            "2025-01-05",
            "--start-time",
            "09:00",
            "--end-time",
            "10:00",
            "--minutes",
            "61",
        ])
        .unwrap();

        let LogCommand::Add { session } = args.command else {
            panic!("expected add, got {:?}", args.command);
        };
        let draft = session.to_session();
        assert_eq!(draft.end_day, NaiveDate::from_ymd_opt(2025, 1, 5).unwrap());
        assert_eq!(draft.elapsed_seconds, 3660);
        assert!(!session.force);
    }

    #[test]
    fn rejects_malformed_times() {
        let result = TestArgs::try_parse_from([
            "test",
            "add",
            "--start-day",
            "2025-01-05",
            "--start-time",
            "9 o'clock",
            "--end-time",
            "10:00",
            "--minutes",
            "60",
        ]);

        assert!(result.is_err());
    }

    fn add_with_minutes(minutes: &str) -> Result<TestArgs, clap::Error> {
        TestArgs::try_parse_from([
            "test",
            "add",
            "--start-day",
            "2025-01-05",
            "--start-time",
            "09:00",
            "--end-time",
            "10:00",
            "--force",
            "--minutes",
            minutes,
        ])
    }

    #[test]
    fn minutes_are_bounded() {
        assert!(add_with_minutes("0").is_ok());
        assert!(add_with_minutes(&MAX_MINUTES.to_string()).is_ok());
        assert!(add_with_minutes(&(MAX_MINUTES + 1).to_string()).is_err());
        assert!(add_with_minutes("153722867280912930").is_err());
        assert!(add_with_minutes("-1").is_err());
    }

    #[test]
    fn overnight_session_shows_end_day() {
        let session = WorkSession {
            id: 7,
            start_day: NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
            end_day: NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            start_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(1, 30, 0).unwrap(),
            elapsed_seconds: 3 * 3600,
        };

        assert_eq!(
            format_session(&session),
            "#7\t2025-01-05 22:00 - 2025-01-06 01:30\t03:00:00"
        );
    }
}
