//! Rail time handling for departure boards.
//!
//! Upstream boards provide times as "HH:MM" strings in UK local time. This
//! module turns them into date-aware values so that services crossing
//! midnight still sort and window correctly.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Error returned when parsing an invalid time string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time: {reason}")]
pub struct TimeError {
    reason: &'static str,
}

impl TimeError {
    fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// A date-aware time for rail services.
///
/// Two boards showing "00:10" may refer to different days, so the date is
/// carried alongside the time of day.
///
/// # Examples
///
/// ```
/// use transport_engine::domain::RailTime;
/// use chrono::NaiveDate;
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
/// let time = RailTime::parse_hhmm("10:35", date).unwrap();
/// assert_eq!(time.to_string(), "10:35");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RailTime {
    date: NaiveDate,
    time: NaiveTime,
}

impl RailTime {
    /// Create a new RailTime from date and time components.
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    /// Create a RailTime from a datetime, truncated to the minute.
    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        let time = NaiveTime::from_hms_opt(dt.hour(), dt.minute(), 0).unwrap_or(dt.time());
        Self {
            date: dt.date(),
            time,
        }
    }

    /// Parse a time from "HH:MM" format with a given base date.
    ///
    /// # Examples
    ///
    /// ```
    /// use transport_engine::domain::RailTime;
    /// use chrono::NaiveDate;
    ///
    /// let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
    ///
    /// assert!(RailTime::parse_hhmm("00:00", date).is_ok());
    /// assert!(RailTime::parse_hhmm("23:59", date).is_ok());
    ///
    /// assert!(RailTime::parse_hhmm("1430", date).is_err());
    /// assert!(RailTime::parse_hhmm("On time", date).is_err());
    /// assert!(RailTime::parse_hhmm("25:00", date).is_err());
    /// ```
    pub fn parse_hhmm(s: &str, date: NaiveDate) -> Result<Self, TimeError> {
        Ok(Self {
            date,
            time: parse_clock(s)?,
        })
    }

    /// Parse an "HH:MM" string, picking the calendar day that puts the
    /// result closest to `anchor`.
    ///
    /// Boards only ever show times within a few hours of the moment they
    /// were generated, so the nearest day is the right one: a "00:05"
    /// departure on a board generated at 23:50 belongs to the next day.
    ///
    /// ```
    /// use transport_engine::domain::RailTime;
    /// use chrono::NaiveDate;
    ///
    /// let anchor = NaiveDate::from_ymd_opt(2024, 3, 15)
    ///     .unwrap()
    ///     .and_hms_opt(23, 50, 0)
    ///     .unwrap();
    /// let t = RailTime::parse_near("00:05", anchor).unwrap();
    /// assert_eq!(t.date(), NaiveDate::from_ymd_opt(2024, 3, 16).unwrap());
    /// ```
    pub fn parse_near(s: &str, anchor: NaiveDateTime) -> Result<Self, TimeError> {
        let time = parse_clock(s)?;
        let base = anchor.date();

        let candidates = [base.pred_opt(), Some(base), base.succ_opt()];
        candidates
            .into_iter()
            .flatten()
            .map(|date| Self { date, time })
            .min_by_key(|t| {
                t.to_datetime()
                    .signed_duration_since(anchor)
                    .num_seconds()
                    .abs()
            })
            .ok_or_else(|| TimeError::new("date out of range"))
    }

    /// Returns the date component.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Returns the time component.
    pub fn time(&self) -> NaiveTime {
        self.time
    }

    /// Returns the hour (0-23).
    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    /// Returns the minute (0-59).
    pub fn minute(&self) -> u32 {
        self.time.minute()
    }

    /// Converts to a NaiveDateTime.
    pub fn to_datetime(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    /// Returns the duration between two times.
    ///
    /// Returns a negative duration if `other` is after `self`.
    pub fn signed_duration_since(&self, other: Self) -> Duration {
        self.to_datetime()
            .signed_duration_since(other.to_datetime())
    }
}

impl Ord for RailTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_datetime().cmp(&other.to_datetime())
    }
}

impl PartialOrd for RailTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for RailTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RailTime({} {:02}:{:02})",
            self.date,
            self.hour(),
            self.minute()
        )
    }
}

impl fmt::Display for RailTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// Serialized as the "HH:MM" string consumers display.
impl Serialize for RailTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn parse_clock(s: &str) -> Result<NaiveTime, TimeError> {
    if s.len() != 5 {
        return Err(TimeError::new("expected HH:MM format"));
    }

    let bytes = s.as_bytes();

    if bytes[2] != b':' {
        return Err(TimeError::new("expected colon at position 2"));
    }

    let hour =
        parse_two_digits(&bytes[0..2]).ok_or_else(|| TimeError::new("invalid hour digits"))?;
    if hour > 23 {
        return Err(TimeError::new("hour must be 0-23"));
    }

    let minute =
        parse_two_digits(&bytes[3..5]).ok_or_else(|| TimeError::new("invalid minute digits"))?;
    if minute > 59 {
        return Err(TimeError::new("minute must be 0-59"));
    }

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| TimeError::new("invalid time"))
}

/// Parse two ASCII digit bytes into a u32.
fn parse_two_digits(bytes: &[u8]) -> Option<u32> {
    if bytes.len() != 2 {
        return None;
    }
    let d1 = (bytes[0] as char).to_digit(10)?;
    let d2 = (bytes[1] as char).to_digit(10)?;
    Some(d1 * 10 + d2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        date().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn parse_valid_times() {
        let t = RailTime::parse_hhmm("10:35", date()).unwrap();
        assert_eq!(t.hour(), 10);
        assert_eq!(t.minute(), 35);
        assert_eq!(t.date(), date());
    }

    #[test]
    fn reject_sentinels_and_garbage() {
        for s in ["On time", "Delayed", "Cancelled", "", "1:35", "10-35", "ab:cd", "10:60"] {
            assert!(RailTime::parse_hhmm(s, date()).is_err(), "{s} should fail");
        }
    }

    #[test]
    fn parse_near_same_day() {
        let t = RailTime::parse_near("10:35", at(10, 30)).unwrap();
        assert_eq!(t.date(), date());
    }

    #[test]
    fn parse_near_rolls_forward_past_midnight() {
        let t = RailTime::parse_near("00:15", at(23, 40)).unwrap();
        assert_eq!(t.date(), date().succ_opt().unwrap());
    }

    #[test]
    fn parse_near_rolls_back_before_midnight() {
        // Board generated just after midnight still showing a late departure.
        let anchor = date().succ_opt().unwrap().and_hms_opt(0, 5, 0).unwrap();
        let t = RailTime::parse_near("23:58", anchor).unwrap();
        assert_eq!(t.date(), date());
    }

    #[test]
    fn ordering_respects_date() {
        let late = RailTime::parse_hhmm("23:50", date()).unwrap();
        let early_next = RailTime::parse_hhmm("00:10", date().succ_opt().unwrap()).unwrap();
        assert!(late < early_next);
        assert_eq!(early_next.signed_duration_since(late), Duration::minutes(20));
    }

    #[test]
    fn from_datetime_truncates_seconds() {
        let dt = date().and_hms_opt(9, 41, 59).unwrap();
        let t = RailTime::from_datetime(dt);
        assert_eq!(t.to_string(), "09:41");
        assert_eq!(t.to_datetime(), date().and_hms_opt(9, 41, 0).unwrap());
    }

    #[test]
    fn display_and_serialize() {
        let t = RailTime::parse_hhmm("07:05", date()).unwrap();
        assert_eq!(t.to_string(), "07:05");
        assert_eq!(format!("{:?}", t), "RailTime(2024-03-15 07:05)");
        assert_eq!(serde_json::to_string(&t).unwrap(), r#""07:05""#);
    }
}
