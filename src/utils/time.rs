use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime, Timelike};

pub const DAY_FORMAT: &str = "%Y-%m-%d";
pub const TIME_OF_DAY_FORMAT: &str = "%H:%M";

/// This is the standard way of converting a date to a string in hourkeeper.
pub fn format_day(date: NaiveDate) -> String {
    date.format(DAY_FORMAT).to_string()
}

pub fn format_time_of_day(time: NaiveTime) -> String {
    time.format(TIME_OF_DAY_FORMAT).to_string()
}

pub fn parse_day(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DAY_FORMAT)
        .with_context(|| format!("Expected a date like 2025-01-05, got {value:?}"))
}

pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), TIME_OF_DAY_FORMAT)
        .with_context(|| format!("Expected a time like 09:30, got {value:?}"))
}

/// Drops seconds and below. Session times are kept with minute precision.
pub fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

/// `HH:MM:SS`, hours are not wrapped at 24.
pub fn format_elapsed(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        seconds % 3600 / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::{format_elapsed, parse_day, parse_time_of_day, truncate_to_minute};

    #[test]
    fn parses_day_and_time() {
        assert_eq!(
            parse_day("2025-01-05").unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 5).unwrap()
        );
        assert_eq!(
            parse_time_of_day("09:05").unwrap(),
            NaiveTime::from_hms_opt(9, 5, 0).unwrap()
        );
        assert!(parse_day("05/01/2025").is_err());
        assert!(parse_time_of_day("9h").is_err());
    }

    #[test]
    fn truncates_seconds() {
        let time = NaiveTime::from_hms_milli_opt(10, 1, 1, 500).unwrap();
        assert_eq!(
            truncate_to_minute(time),
            NaiveTime::from_hms_opt(10, 1, 0).unwrap()
        );
    }

    #[test]
    fn formats_elapsed_past_a_day() {
        assert_eq!(format_elapsed(3661), "01:01:01");
        assert_eq!(format_elapsed(90_000), "25:00:00");
        assert_eq!(format_elapsed(-5), "00:00:00");
    }
}
