use crate::error::WfoError;
use chrono::{DateTime, Duration, Utc};
use core_types::{ensure_disjoint, Timeframe, Window};

/// The date ranges used for one strategy's walk: the earlier in-sample part and the
/// most recent out-of-sample part of the same history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkPeriod {
    pub history: Window,
    pub in_sample: Window,
    pub out_of_sample: Window,
}

impl WalkPeriod {
    /// Splits `[as_of - history_days, as_of)` at `as_of - oos_days`.
    ///
    /// `as_of` is floored to the timeframe so both windows start and end on bar
    /// boundaries. The split is checked for overlap before it is returned.
    pub fn split(
        as_of: DateTime<Utc>,
        timeframe: Timeframe,
        history_days: i64,
        oos_days: i64,
    ) -> Result<Self, WfoError> {
        if oos_days <= 0 || oos_days >= history_days {
            return Err(WfoError::DateError(format!(
                "oos_days ({oos_days}) must be positive and below history_days ({history_days})"
            )));
        }
        let end = timeframe.floor(as_of);
        let history_start = end - Duration::days(history_days);
        let split = end - Duration::days(oos_days);

        let period = Self {
            history: Window::new(history_start, end)?,
            in_sample: Window::new(history_start, split)?,
            out_of_sample: Window::new(split, end)?,
        };
        ensure_disjoint(&period.in_sample, &period.out_of_sample)?;
        Ok(period)
    }
}
