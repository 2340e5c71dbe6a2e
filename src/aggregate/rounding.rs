const SECONDS_PER_HOUR: i64 = 3600;
const SECONDS_PER_MINUTE: i64 = 60;

/// How fractional hours are treated when computing the payable total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoundingPolicy {
    /// Hours and minutes are truncated, nothing is rounded.
    #[default]
    Normal,
    RoundUp,
    RoundDown,
}

impl RoundingPolicy {
    /// Seconds that are paid for out of `total_seconds`. Saturates at the bounds of `i64`.
    pub fn apply(self, total_seconds: i64) -> i64 {
        let partial = total_seconds.rem_euclid(SECONDS_PER_HOUR);
        let whole_hours = total_seconds.saturating_sub(partial);
        match self {
            RoundingPolicy::Normal => total_seconds,
            RoundingPolicy::RoundDown => whole_hours,
            RoundingPolicy::RoundUp if partial == 0 => total_seconds,
            RoundingPolicy::RoundUp => whole_hours.saturating_add(SECONDS_PER_HOUR),
        }
    }
}

/// Totals of a date range. Always derived from `total_seconds`, switching the policy or the rate
/// never compounds an earlier rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationResult {
    /// Unrounded sum of elapsed time.
    pub total_seconds: i64,
    pub rounding: RoundingPolicy,
    pub hourly_rate: i64,
    pub rounded_seconds: i64,
    pub total_hours: i64,
    pub total_minutes: i64,
    /// Truncated to a whole currency unit.
    pub wage: i64,
}

impl AggregationResult {
    pub fn new(total_seconds: i64, rounding: RoundingPolicy, hourly_rate: i64) -> Self {
        let rounded_seconds = rounding.apply(total_seconds);
        Self {
            total_seconds,
            rounding,
            hourly_rate,
            rounded_seconds,
            total_hours: rounded_seconds / SECONDS_PER_HOUR,
            total_minutes: rounded_seconds % SECONDS_PER_HOUR / SECONDS_PER_MINUTE,
            wage: wage(rounded_seconds, hourly_rate),
        }
    }

    pub fn with_rounding(&self, rounding: RoundingPolicy) -> Self {
        Self::new(self.total_seconds, rounding, self.hourly_rate)
    }

    pub fn with_hourly_rate(&self, hourly_rate: i64) -> Self {
        Self::new(self.total_seconds, self.rounding, hourly_rate)
    }
}

/// Computed wide so a large rate can't overflow, then saturated back into `i64`.
fn wage(rounded_seconds: i64, hourly_rate: i64) -> i64 {
    let wage = i128::from(rounded_seconds) * i128::from(hourly_rate) / i128::from(SECONDS_PER_HOUR);
    i64::try_from(wage).unwrap_or(if wage < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::{AggregationResult, RoundingPolicy};

    fn hours_minutes_wage(result: AggregationResult) -> (i64, i64, i64) {
        (result.total_hours, result.total_minutes, result.wage)
    }

    #[test]
    fn two_and_a_half_hours_under_each_policy() {
        let normal = AggregationResult::new(9000, RoundingPolicy::Normal, 1000);

        assert_eq!(hours_minutes_wage(normal), (2, 30, 2500));
        assert_eq!(
            hours_minutes_wage(normal.with_rounding(RoundingPolicy::RoundUp)),
            (3, 0, 3000)
        );
        assert_eq!(
            hours_minutes_wage(normal.with_rounding(RoundingPolicy::RoundDown)),
            (2, 0, 2000)
        );
    }

    #[test]
    fn switching_policies_is_not_cumulative() {
        let result = AggregationResult::new(9000, RoundingPolicy::Normal, 1000)
            .with_rounding(RoundingPolicy::RoundUp)
            .with_rounding(RoundingPolicy::RoundDown)
            .with_rounding(RoundingPolicy::Normal);

        assert_eq!(result.total_seconds, 9000);
        assert_eq!(hours_minutes_wage(result), (2, 30, 2500));
    }

    #[test]
    fn normal_truncates_seconds_and_wage() {
        let result = AggregationResult::new(3659, RoundingPolicy::Normal, 1000);

        assert_eq!(hours_minutes_wage(result), (1, 0, 1016));
        assert_eq!(result.with_hourly_rate(0).wage, 0);
    }

    #[test]
    fn huge_rates_and_totals_saturate() {
        let result = AggregationResult::new(9000, RoundingPolicy::Normal, 10_000_000_000_000_000);
        assert_eq!(result.wage, 25_000_000_000_000_000);

        let result = result.with_hourly_rate(i64::MAX);
        assert_eq!(result.wage, i64::MAX);

        let rounded_up = AggregationResult::new(i64::MAX, RoundingPolicy::RoundUp, 1);
        assert_eq!(rounded_up.rounded_seconds, i64::MAX);
        assert_eq!(
            RoundingPolicy::RoundDown.apply(i64::MIN),
            i64::MIN
        );
    }

    #[test]
    fn whole_hours_stay_put() {
        for policy in [
            RoundingPolicy::Normal,
            RoundingPolicy::RoundUp,
            RoundingPolicy::RoundDown,
        ] {
            assert_eq!(policy.apply(7200), 7200);
            assert_eq!(policy.apply(0), 0);
        }
        assert_eq!(RoundingPolicy::RoundUp.apply(1), 3600);
        assert_eq!(RoundingPolicy::RoundDown.apply(3599), 0);
    }
}
