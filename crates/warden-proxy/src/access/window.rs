//! Time-of-day windows and the clock that feeds them.

use crate::config::ConfigError;
use chrono::{Local, Timelike};
use std::fmt;

/// Minutes since local midnight, `0..=1439`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinuteOfDay(u16);

impl MinuteOfDay {
    pub const LAST: u16 = 24 * 60 - 1;

    pub fn new(minutes: u16) -> Option<Self> {
        (minutes <= Self::LAST).then_some(Self(minutes))
    }

    pub fn from_hm(hour: u16, minute: u16) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self(hour * 60 + minute))
    }

    /// Parse the config format `H:MM` (hours may be one or two digits).
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidTime(value.to_string());
        let (hours, minutes) = value.trim().split_once(':').ok_or_else(invalid)?;
        if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
            return Err(invalid());
        }
        let hour: u16 = hours.parse().map_err(|_| invalid())?;
        let minute: u16 = minutes.parse().map_err(|_| invalid())?;
        Self::from_hm(hour, minute).ok_or_else(invalid)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl fmt::Display for MinuteOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Inclusive same-day window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: MinuteOfDay,
    pub end: MinuteOfDay,
}

impl TimeWindow {
    pub fn new(start: MinuteOfDay, end: MinuteOfDay) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::WrappingWindow {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn parse(between: &[String; 2]) -> Result<Self, ConfigError> {
        Self::new(MinuteOfDay::parse(&between[0])?, MinuteOfDay::parse(&between[1])?)
    }

    pub fn contains(&self, now: MinuteOfDay) -> bool {
        self.start <= now && now <= self.end
    }
}

/// Source of the current minute-of-day, read once per access decision.
pub trait Clock: Send + Sync {
    fn minute_of_day(&self) -> MinuteOfDay;
}

/// Local wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn minute_of_day(&self) -> MinuteOfDay {
        let now = Local::now();
        MinuteOfDay((now.hour() * 60 + now.minute()) as u16)
    }
}

/// A clock stuck at one minute. Used by tests and dry runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub MinuteOfDay);

impl Clock for FixedClock {
    fn minute_of_day(&self) -> MinuteOfDay {
        self.0
    }
}
