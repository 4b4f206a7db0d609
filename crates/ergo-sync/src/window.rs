//! Watermark arithmetic for incremental windows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use ergo_core::{Checkpoint, Window};
use thiserror::Error;

/// Minimum age of a window end before the next cycle may extract it.
pub const FRESHNESS_THRESHOLD_SECS: i64 = 5 * 60;

/// Widest accepted offset, roughly a century.
pub const MAX_OFFSET_DAYS: i64 = 36_500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffsetError {
    #[error("unknown offset unit {0:?}")]
    UnknownUnit(String),
    #[error("offset magnitude must be positive, got {0}")]
    NonPositive(i64),
    #[error("offset of {0} is shorter than one second")]
    BelowOneSecond(WindowOffset),
    #[error("offset of {magnitude} {unit} is out of range")]
    OutOfRange { unit: OffsetUnit, magnitude: i64 },
}

/// The next window would end past the last representable instant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("window after {end} with an offset of {offset} is out of range")]
pub struct WindowOverflow {
    pub end: DateTime<Utc>,
    pub offset: WindowOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl OffsetUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            OffsetUnit::Microseconds => "microseconds",
            OffsetUnit::Milliseconds => "milliseconds",
            OffsetUnit::Seconds => "seconds",
            OffsetUnit::Minutes => "minutes",
            OffsetUnit::Hours => "hours",
            OffsetUnit::Days => "days",
            OffsetUnit::Weeks => "weeks",
        }
    }
}

impl fmt::Display for OffsetUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetUnit {
    type Err = OffsetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "microseconds" => Ok(OffsetUnit::Microseconds),
            "milliseconds" => Ok(OffsetUnit::Milliseconds),
            "seconds" => Ok(OffsetUnit::Seconds),
            "minutes" => Ok(OffsetUnit::Minutes),
            "hours" => Ok(OffsetUnit::Hours),
            "days" => Ok(OffsetUnit::Days),
            "weeks" => Ok(OffsetUnit::Weeks),
            other => Err(OffsetError::UnknownUnit(other.to_string())),
        }
    }
}

/// Width of each incremental window past the previous end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOffset {
    unit: OffsetUnit,
    magnitude: i64,
    duration: Duration,
}

impl WindowOffset {
    pub fn new(unit: OffsetUnit, magnitude: i64) -> Result<Self, OffsetError> {
        if magnitude <= 0 {
            return Err(OffsetError::NonPositive(magnitude));
        }
        let duration = match unit {
            OffsetUnit::Microseconds => Some(Duration::microseconds(magnitude)),
            OffsetUnit::Milliseconds => Duration::try_milliseconds(magnitude),
            OffsetUnit::Seconds => Duration::try_seconds(magnitude),
            OffsetUnit::Minutes => Duration::try_minutes(magnitude),
            OffsetUnit::Hours => Duration::try_hours(magnitude),
            OffsetUnit::Days => Duration::try_days(magnitude),
            OffsetUnit::Weeks => Duration::try_weeks(magnitude),
        }
        .filter(|d| *d <= Duration::days(MAX_OFFSET_DAYS))
        .ok_or(OffsetError::OutOfRange { unit, magnitude })?;

        let offset = Self {
            unit,
            magnitude,
            duration,
        };
        if duration < Duration::seconds(1) {
            return Err(OffsetError::BelowOneSecond(offset));
        }
        Ok(offset)
    }

    pub fn unit(&self) -> OffsetUnit {
        self.unit
    }

    pub fn magnitude(&self) -> i64 {
        self.magnitude
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Default for WindowOffset {
    fn default() -> Self {
        Self {
            unit: OffsetUnit::Days,
            magnitude: 30,
            duration: Duration::days(30),
        }
    }
}

impl fmt::Display for WindowOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit)
    }
}

/// Window following `last`, or `bootstrap` when the domain has no history.
///
/// Starts one second after the previous end so consecutive windows never overlap.
pub fn next_window(
    last: Option<&Checkpoint>,
    bootstrap: Window,
    offset: WindowOffset,
) -> Result<Window, WindowOverflow> {
    let Some(checkpoint) = last else {
        return Ok(bootstrap);
    };
    let end = checkpoint.end_date;
    let shifted = |by: Duration| {
        end.checked_add_signed(by)
            .ok_or(WindowOverflow { end, offset })
    };
    Ok(Window::new(shifted(Duration::seconds(1))?, shifted(offset.duration())?))
}

/// True when `end` is too recent to extract; such cycles write nothing.
pub fn should_skip(end: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - end < Duration::seconds(FRESHNESS_THRESHOLD_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ergo_core::Domain;
    use proptest::prelude::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().expect("ts")
    }

    #[test]
    fn first_cycle_uses_bootstrap_window() {
        let bootstrap = Domain::Reports.bootstrap_window();
        assert_eq!(next_window(None, bootstrap, WindowOffset::default()), Ok(bootstrap));
    }

    #[test]
    fn next_window_starts_one_second_after_previous_end() {
        let end = at(2023, 2, 28, 23, 59, 59);
        let checkpoint = Checkpoint::for_window(
            Window::new(at(2023, 1, 1, 0, 0, 0), end),
            at(2023, 3, 1, 0, 0, 0),
            12,
        );
        let offset = WindowOffset::new(OffsetUnit::Days, 30).expect("offset");
        let window = next_window(Some(&checkpoint), Domain::Reports.bootstrap_window(), offset)
            .expect("window");
        assert_eq!(window.start_date, at(2023, 3, 1, 0, 0, 0));
        assert_eq!(window.end_date, at(2023, 3, 30, 23, 59, 59));
    }

    #[test]
    fn offsets_below_one_second_are_rejected() {
        assert!(matches!(
            WindowOffset::new(OffsetUnit::Milliseconds, 999),
            Err(OffsetError::BelowOneSecond(_))
        ));
        assert!(WindowOffset::new(OffsetUnit::Milliseconds, 1000).is_ok());
        assert_eq!(
            WindowOffset::new(OffsetUnit::Days, 0),
            Err(OffsetError::NonPositive(0))
        );
        assert!(matches!(
            WindowOffset::new(OffsetUnit::Weeks, i64::MAX),
            Err(OffsetError::OutOfRange { .. })
        ));
    }

    #[test]
    fn offsets_wider_than_a_century_are_rejected() {
        assert!(WindowOffset::new(OffsetUnit::Days, MAX_OFFSET_DAYS).is_ok());
        assert_eq!(
            WindowOffset::new(OffsetUnit::Days, 100_000_000),
            Err(OffsetError::OutOfRange {
                unit: OffsetUnit::Days,
                magnitude: 100_000_000
            })
        );
        assert!(WindowOffset::new(OffsetUnit::Weeks, MAX_OFFSET_DAYS).is_err());
    }

    #[test]
    fn window_past_the_last_instant_is_an_error() {
        let end = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        let checkpoint = Checkpoint::for_window(Window::new(end - Duration::days(1), end), end, 0);
        let offset = WindowOffset::new(OffsetUnit::Days, 30).expect("offset");

        let err = next_window(Some(&checkpoint), Domain::Reports.bootstrap_window(), offset)
            .expect_err("overflow");
        assert_eq!(err, WindowOverflow { end, offset });
    }

    #[test]
    fn units_parse_case_insensitively() {
        assert_eq!("Days".parse::<OffsetUnit>(), Ok(OffsetUnit::Days));
        assert_eq!(" weeks ".parse::<OffsetUnit>(), Ok(OffsetUnit::Weeks));
        assert!("fortnights".parse::<OffsetUnit>().is_err());
    }

    #[test]
    fn skip_threshold_is_five_minutes() {
        let end = at(2024, 1, 1, 12, 0, 0);
        assert!(should_skip(end, end + Duration::seconds(299)));
        assert!(!should_skip(end, end + Duration::seconds(300)));
        assert!(should_skip(end, end - Duration::hours(1)));
        assert!(!should_skip(end, end + Duration::days(3)));
    }

    fn unit_strategy() -> impl Strategy<Value = OffsetUnit> {
        prop_oneof![
            Just(OffsetUnit::Microseconds),
            Just(OffsetUnit::Milliseconds),
            Just(OffsetUnit::Seconds),
            Just(OffsetUnit::Minutes),
            Just(OffsetUnit::Hours),
            Just(OffsetUnit::Days),
            Just(OffsetUnit::Weeks),
        ]
    }

    proptest! {
        #[test]
        fn windows_never_overlap_and_are_well_formed(
            end_secs in 1_600_000_000_i64..2_000_000_000_i64,
            micros in 0_u32..1_000_000,
            unit in unit_strategy(),
            magnitude in 1_i64..5_000_000,
        ) {
            let Ok(offset) = WindowOffset::new(unit, magnitude) else {
                return Ok(());
            };
            let end = DateTime::from_timestamp(end_secs, micros * 1_000).expect("ts");
            let checkpoint = Checkpoint::for_window(Window::new(end - Duration::days(1), end), end, 0);

            let window = next_window(Some(&checkpoint), Domain::Files.bootstrap_window(), offset)
                .expect("window in range");
            prop_assert_eq!(window.start_date, end + Duration::seconds(1));
            prop_assert_eq!(window.end_date, end + offset.duration());
            prop_assert!(window.start_date <= window.end_date);
            prop_assert!(window.start_date > checkpoint.end_date);
        }
    }
}
