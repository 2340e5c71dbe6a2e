pub mod log;
pub mod shutdown;
pub mod summary;
pub mod timer;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{process_log_command, LogCommand};
use summary::{process_calendar_command, process_summary_command, CalendarCommand, SummaryCommand};
use timer::process_timer_command;
use tracing::{info, level_filters::LevelFilter};

use crate::utils::{
    dir::{create_application_default_path, ensure_dir},
    logging::{enable_logging, LOG_PREFIX},
};

#[derive(Parser, Debug)]
#[command(name = "Hourkeeper", version, long_about = None)]
#[command(about = "Stopwatch and log for hours worked", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(
        about = "Run the stopwatch in the current console. A paused timer from an earlier run is picked back up"
    )]
    Timer,
    #[command(flatten)]
    Log(LogCommand),
    #[command(about = "Total hours and wage between two dates")]
    Summary {
        #[command(flatten)]
        command: SummaryCommand,
    },
    #[command(about = "Hours worked on every day of a month")]
    Calendar {
        #[command(flatten)]
        command: CalendarCommand,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let dir = match args.dir {
        Some(dir) => ensure_dir(dir)?,
        None => create_application_default_path()?,
    };

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(LOG_PREFIX, &ensure_dir(dir.join("logs"))?, logging_level, args.log)?;
    info!("Using application directory {:?}", dir);

    match args.commands {
        Commands::Timer => process_timer_command(&dir).await,
        Commands::Log(command) => process_log_command(&dir, command).await,
        Commands::Summary { command } => process_summary_command(&dir, command).await,
        Commands::Calendar { command } => process_calendar_command(&dir, command).await,
    }
}
