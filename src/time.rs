//! Decoding of CF-convention time coordinates.
//!
//! Climate-model files store time as offsets such as `days since 1850-01-01`
//! under one of several model calendars. Only calendar dates are needed
//! downstream (aggregation by month or year, filtering by date), so values are
//! decoded to [`CalendarDate`] rather than to a timestamp type that would
//! reject dates like February 30th of a 360-day calendar.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ClimateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl CalendarDate {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self { year, month, day }
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(value: NaiveDate) -> Self {
        Self::new(value.year(), value.month(), value.day())
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    Standard,
    NoLeap,
    AllLeap,
    Day360,
}

impl Calendar {
    pub fn parse(value: Option<&str>, path: &Path) -> Result<Self, ClimateError> {
        let Some(value) = value else {
            return Ok(Calendar::Standard);
        };
        match value.trim().to_lowercase().as_str() {
            "" | "standard" | "gregorian" | "proleptic_gregorian" => Ok(Calendar::Standard),
            "noleap" | "365_day" => Ok(Calendar::NoLeap),
            "all_leap" | "366_day" => Ok(Calendar::AllLeap),
            "360_day" => Ok(Calendar::Day360),
            other => Err(ClimateError::UnsupportedCalendar {
                path: path.to_path_buf(),
                calendar: other.to_string(),
            }),
        }
    }
}

const MONTH_DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
const LEAP_MONTH_DAYS: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

#[derive(Debug, Clone, Copy, PartialEq)]
struct TimeUnits {
    days_per_unit: f64,
    epoch: CalendarDate,
    epoch_day_fraction: f64,
}

fn units_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(days?|d|hours?|hrs?|h|minutes?|mins?|seconds?|secs?|s)\s+since\s+(-?\d{1,4})-(\d{1,2})-(\d{1,2})(?:[ T](\d{1,2}):(\d{1,2})(?::(\d{1,2}(?:\.\d+)?))?)?",
        )
        .expect("time units pattern is valid")
    })
}

fn parse_units(units: &str, path: &Path) -> Result<TimeUnits, ClimateError> {
    let invalid = || ClimateError::InvalidTimeUnits {
        path: path.to_path_buf(),
        units: units.to_string(),
    };
    let caps = units_regex().captures(units).ok_or_else(invalid)?;

    let days_per_unit = match caps[1].to_lowercase().chars().next() {
        Some('d') => 1.0,
        Some('h') => 1.0 / 24.0,
        Some('m') => 1.0 / 1440.0,
        Some('s') => 1.0 / 86_400.0,
        _ => return Err(invalid()),
    };
    let year = caps[2].parse::<i32>().map_err(|_| invalid())?;
    let month = caps[3].parse::<u32>().map_err(|_| invalid())?;
    let day = caps[4].parse::<u32>().map_err(|_| invalid())?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(invalid());
    }
    let hours = caps.get(5).map_or(Ok(0.0), |m| m.as_str().parse::<f64>());
    let minutes = caps.get(6).map_or(Ok(0.0), |m| m.as_str().parse::<f64>());
    let seconds = caps.get(7).map_or(Ok(0.0), |m| m.as_str().parse::<f64>());
    let (hours, minutes, seconds) = match (hours, minutes, seconds) {
        (Ok(h), Ok(m), Ok(s)) => (h, m, s),
        _ => return Err(invalid()),
    };

    Ok(TimeUnits {
        days_per_unit,
        epoch: CalendarDate::new(year, month, day),
        epoch_day_fraction: (hours * 3600.0 + minutes * 60.0 + seconds) / 86_400.0,
    })
}

/// Decodes raw time values to calendar dates.
pub fn decode_times(
    values: &[f64],
    units: &str,
    calendar: Option<&str>,
    path: &Path,
) -> Result<Vec<CalendarDate>, ClimateError> {
    let units = parse_units(units, path)?;
    let calendar = Calendar::parse(calendar, path)?;
    values
        .iter()
        .map(|value| {
            let offset = value * units.days_per_unit + units.epoch_day_fraction;
            if !offset.is_finite() {
                return Err(ClimateError::InvalidLayout {
                    path: path.to_path_buf(),
                    message: format!("non-finite time value {value}"),
                });
            }
            add_days(units.epoch, offset.floor() as i64, calendar).ok_or_else(|| {
                ClimateError::InvalidLayout {
                    path: path.to_path_buf(),
                    message: format!("time value {value} is out of range"),
                }
            })
        })
        .collect()
}

fn add_days(epoch: CalendarDate, days: i64, calendar: Calendar) -> Option<CalendarDate> {
    match calendar {
        Calendar::Standard => {
            let start = NaiveDate::from_ymd_opt(epoch.year, epoch.month, epoch.day)?;
            start
                .checked_add_signed(Duration::try_days(days)?)
                .map(CalendarDate::from)
        }
        Calendar::NoLeap => fixed_year_add(epoch, days, &MONTH_DAYS),
        Calendar::AllLeap => fixed_year_add(epoch, days, &LEAP_MONTH_DAYS),
        Calendar::Day360 => {
            let ordinal = i64::from(epoch.year) * 360
                + i64::from(epoch.month - 1) * 30
                + i64::from(epoch.day.min(30) - 1)
                + days;
            let year = ordinal.div_euclid(360);
            let rest = ordinal.rem_euclid(360);
            Some(CalendarDate::new(
                i32::try_from(year).ok()?,
                (rest / 30) as u32 + 1,
                (rest % 30) as u32 + 1,
            ))
        }
    }
}

/// Calendars whose years all have the same month lengths.
fn fixed_year_add(epoch: CalendarDate, days: i64, months: &[u32; 12]) -> Option<CalendarDate> {
    let year_len: i64 = months.iter().map(|d| i64::from(*d)).sum();
    let day_of_year: i64 = months[..(epoch.month as usize - 1)]
        .iter()
        .map(|d| i64::from(*d))
        .sum::<i64>()
        + i64::from(epoch.day.min(months[epoch.month as usize - 1]) - 1);
    let ordinal = i64::from(epoch.year) * year_len + day_of_year + days;
    let year = ordinal.div_euclid(year_len);
    let mut rest = ordinal.rem_euclid(year_len);
    for (index, length) in months.iter().enumerate() {
        let length = i64::from(*length);
        if rest < length {
            return Some(CalendarDate::new(
                i32::try_from(year).ok()?,
                index as u32 + 1,
                rest as u32 + 1,
            ));
        }
        rest -= length;
    }
    None
}
