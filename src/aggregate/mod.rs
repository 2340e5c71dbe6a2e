pub mod rounding;

use std::{future, pin::pin};

use anyhow::anyhow;

use chrono::NaiveDate;
use futures::{stream, Stream, StreamExt};
use rounding::{AggregationResult, RoundingPolicy};
use tracing::{debug, error};

use crate::storage::{error::StoreError, session_store::SessionStore};

/// Number of days read from the store concurrently.
const DAYS_IN_FLIGHT: usize = 4;

/// Time worked on a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub session_count: usize,
    pub total_seconds: i64,
}

/// Sums the elapsed time of every session that started between `start` and `end`, both
/// inclusive, and prices it. A range with `end` before `start` is empty.
pub async fn sum_range(
    store: &(impl SessionStore + ?Sized),
    start: NaiveDate,
    end: NaiveDate,
    rounding: RoundingPolicy,
    hourly_rate: i64,
) -> Result<AggregationResult, StoreError> {
    let mut total_seconds: i64 = 0;
    let mut days = pin!(daily_totals_between(store, start, end));
    while let Some(day) = days.next().await {
        let day = day?;
        total_seconds = total_seconds.checked_add(day.total_seconds).ok_or_else(|| {
            StoreError::Unexpected(anyhow!("Time worked up to {} is too large to sum", day.day))
        })?;
    }
    debug!("Sessions between {start} and {end} add up to {total_seconds}s");
    Ok(AggregationResult::new(total_seconds, rounding, hourly_rate))
}

/// Per-day totals between `start` and `end`, skipping days without sessions.
pub async fn daily_totals(
    store: &(impl SessionStore + ?Sized),
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<DailyTotal>, StoreError> {
    let mut totals = vec![];
    let mut days = pin!(daily_totals_between(store, start, end));
    while let Some(day) = days.next().await {
        let day = day?;
        if day.session_count > 0 {
            totals.push(day);
        }
    }
    Ok(totals)
}

/// Reads every day of the range from the store. To do it in an efficient manner a few days are
/// read at the same time, results still come out in calendar order.
fn daily_totals_between<'a, S: SessionStore + ?Sized>(
    store: &'a S,
    start: NaiveDate,
    end: NaiveDate,
) -> impl Stream<Item = Result<DailyTotal, StoreError>> + 'a {
    date_range(start, end)
        .map(move |day| async move { (day, store.get_by_day(day).await) })
        .buffered(DAYS_IN_FLIGHT)
        .map(|(day, sessions)| -> Result<DailyTotal, StoreError> {
            let sessions =
                sessions.inspect_err(|e| error!("Failed to read sessions of {day}: {e}"))?;
            let total_seconds = sessions
                .iter()
                .try_fold(0i64, |total, s| total.checked_add(s.elapsed_seconds))
                .ok_or_else(|| {
                    StoreError::Unexpected(anyhow!("Time worked on {day} is too large to sum"))
                })?;
            Ok(DailyTotal {
                day,
                session_count: sessions.len(),
                total_seconds,
            })
        })
}

/// Returns a stream of dates between start (inclusive) and end (inclusive). Steps by calendar day,
/// so month and year boundaries need no special care.
fn date_range(start: NaiveDate, end: NaiveDate) -> impl Stream<Item = NaiveDate> {
    stream::unfold(Some(start), move |current| {
        future::ready(match current {
            Some(day) if day <= end => Some((day, day.succ_opt())),
            _ => None,
        })
    })
}
