use std::cmp::Ordering;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ReportError, Result};

static TIMESTAMP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<date>\d{4}-\d{2}-\d{2})[T ](?P<time>\d{2}:\d{2})(?::(?P<sec>\d{2})(?:\.\d+)?)?\s*(?P<offset>Z|[+-]\d{2}:?\d{2})?$",
    )
    .expect("timestamp pattern")
});

/// A `created`/`modified` value reformatted as `YYYY-MM-DD HH:MM[ offset]`,
/// ordered by the instant it denotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    display: String,
    utc: NaiveDateTime,
}

impl Timestamp {
    pub fn parse(field: &'static str, raw: &str) -> Result<Self> {
        let malformed = || ReportError::Timestamp {
            field,
            value: raw.to_string(),
        };
        let caps = TIMESTAMP.captures(raw.trim()).ok_or_else(malformed)?;
        let date = &caps["date"];
        let time = &caps["time"];
        let seconds = caps.name("sec").map(|m| m.as_str()).unwrap_or("00");
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| malformed())?;
        let clock = NaiveTime::parse_from_str(&format!("{time}:{seconds}"), "%H:%M:%S")
            .map_err(|_| malformed())?;
        let local = day.and_time(clock);

        let (label, offset_secs) = match caps.name("offset").map(|m| m.as_str()) {
            None => (None, 0),
            Some("Z") => (Some("UTC".to_string()), 0),
            Some(offset) => (
                Some(offset.to_string()),
                offset_seconds(offset).ok_or_else(malformed)?,
            ),
        };
        let zone = FixedOffset::east_opt(offset_secs).ok_or_else(malformed)?;
        let utc = zone
            .from_local_datetime(&local)
            .single()
            .ok_or_else(malformed)?
            .naive_utc();

        let display = match label {
            Some(label) => format!("{date} {time} {label}"),
            None => format!("{date} {time}"),
        };
        Ok(Self { display, utc })
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.utc
            .cmp(&other.utc)
            .then_with(|| self.display.cmp(&other.display))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn offset_seconds(offset: &str) -> Option<i32> {
    let sign = if offset.starts_with('-') { -1 } else { 1 };
    let digits: String = offset[1..].chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60))
}
