use std::{fmt::Display, path::Path};

use anyhow::{anyhow, Result};
use chrono::{Local, Months, NaiveDate};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};
use now::DateTimeNow;

use crate::{
    aggregate::{
        daily_totals,
        rounding::{AggregationResult, RoundingPolicy},
        sum_range,
    },
    storage::session_store::FileSessionStore,
    utils::time::{format_day, format_elapsed},
};

use super::Args;

const MAX_HOURLY_RATE: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Rounding {
    Normal,
    RoundUp,
    RoundDown,
}

impl From<Rounding> for RoundingPolicy {
    fn from(value: Rounding) -> Self {
        match value {
            Rounding::Normal => Self::Normal,
            Rounding::RoundUp => Self::RoundUp,
            Rounding::RoundDown => Self::RoundDown,
        }
    }
}

impl Display for Rounding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rounding::Normal => write!(f, "normal"),
            Rounding::RoundUp => write!(f, "round-up"),
            Rounding::RoundDown => write!(f, "round-down"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct SummaryCommand {
    #[arg(
        long = "start",
        short,
        help = "First day of the range. Examples are \"yesterday\", \"last monday\", \"15/03/2025\". Defaults to the start of the month"
    )]
    start_date: Option<String>,
    #[arg(
        long = "end",
        short,
        help = "Last day of the range, included. Defaults to today"
    )]
    end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
    #[arg(
        long,
        short,
        default_value_t = 0,
        value_parser = clap::value_parser!(i64).range(0..=MAX_HOURLY_RATE),
        help = "Pay for a whole hour"
    )]
    rate: i64,
    #[arg(long, default_value_t = Rounding::Normal)]
    rounding: Rounding,
    #[arg(long, help = "Print the totals under every rounding policy")]
    all: bool,
}

#[derive(Debug, Parser)]
pub struct CalendarCommand {
    #[arg(long, help = "Month like 2025-01. Defaults to the current one")]
    month: Option<String>,
}

/// Command to process `summary`. Sums everything worked from the start to the end day, both
/// included.
pub async fn process_summary_command(
    dir: &Path,
    SummaryCommand {
        start_date,
        end_date,
        date_style,
        rate,
        rounding,
        all,
    }: SummaryCommand,
) -> Result<()> {
    let (start, end) = parse_range(start_date, end_date, date_style)?;
    let store = FileSessionStore::new(dir)?;

    let result = sum_range(&store, start, end, rounding.into(), rate).await?;

    println!("{} - {}", format_day(start), format_day(end));
    println!("Worked\t{}", format_elapsed(result.total_seconds));
    if all {
        for policy in [Rounding::Normal, Rounding::RoundUp, Rounding::RoundDown] {
            print_result(policy, &result.with_rounding(policy.into()));
        }
    } else {
        print_result(rounding, &result);
    }
    Ok(())
}

pub async fn process_calendar_command(dir: &Path, command: CalendarCommand) -> Result<()> {
    let first = match command.month {
        Some(month) => NaiveDate::parse_from_str(&format!("{}-01", month.trim()), "%Y-%m-%d")
            .map_err(|_| {
                Args::command().error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Expected a month like 2025-01, got {month:?}"),
                )
            })?,
        None => Local::now().beginning_of_month().date_naive(),
    };
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|v| v.pred_opt())
        .ok_or_else(|| anyhow!("Month {first} is out of range"))?;

    let store = FileSessionStore::new(dir)?;
    let totals = daily_totals(&store, first, last).await?;

    println!("{}", first.format("%B %Y"));
    for day in &totals {
        println!(
            "{}\t{}\t{} session(s)",
            day.day.format("%a %d"),
            format_elapsed(day.total_seconds),
            day.session_count
        );
    }
    let total = totals
        .iter()
        .try_fold(0i64, |total, v| total.checked_add(v.total_seconds))
        .ok_or_else(|| anyhow!("Time worked in {} is too large to sum", first.format("%B %Y")))?;
    println!("Total\t{}", format_elapsed(total));
    Ok(())
}

fn print_result(rounding: Rounding, result: &AggregationResult) {
    println!(
        "{rounding}\t{}h {:02}m\t{}",
        result.total_hours, result.total_minutes, result.wage
    );
}

/// Also provides sensible defaults for the range.
fn parse_range(
    start_date: Option<String>,
    end_date: Option<String>,
    date_style: DateStyle,
) -> Result<(NaiveDate, NaiveDate)> {
    let now = Local::now();
    let dialect: chrono_english::Dialect = date_style.into();
    let start = match start_date.map(|s| parse_date_string(&s, now, dialect)) {
        Some(Ok(v)) => v.with_timezone(&Local).date_naive(),
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate start date {e}"),
                )
                .into());
        }
        None => now.beginning_of_month().date_naive(),
    };
    let end = match end_date.map(|s| parse_date_string(&s, now, dialect)) {
        Some(Ok(v)) => v.with_timezone(&Local).date_naive(),
        Some(Err(e)) => {
            return Err(Args::command()
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("Failed to validate end date {e}"),
                )
                .into());
        }
        None => now.date_naive(),
    };
    Ok((start, end))
}
