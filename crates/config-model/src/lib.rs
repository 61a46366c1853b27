use std::fmt;

use anyhow::{Result, ensure};
use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc, Weekday,
};
use chrono_tz::Tz;
use serde::Deserialize;
use serde::de::{self, Deserializer};

pub use schedule::{ScheduleError, ScheduleWindow, TimeOfDay, WeekdaySet};

mod schedule {
    use super::*;

    /// Weekly recurring window during which the display is expected to be active.
    ///
    /// `start` is inclusive and `stop` exclusive. Windows never wrap past midnight;
    /// `start == stop` describes an empty window.
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub struct ScheduleWindow {
        #[serde(default = "ScheduleWindow::default_enabled")]
        pub enabled: bool,
        pub days: WeekdaySet,
        pub start: TimeOfDay,
        pub stop: TimeOfDay,
        #[serde(default)]
        pub timezone: Option<Tz>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ScheduleError {
        NoDays,
        Inverted { start: TimeOfDay, stop: TimeOfDay },
    }

    impl fmt::Display for ScheduleError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::NoDays => f.write_str("schedule has no enabled days"),
                Self::Inverted { start, stop } => {
                    write!(f, "schedule start {start} is after stop {stop}")
                }
            }
        }
    }

    impl std::error::Error for ScheduleError {}

    impl ScheduleWindow {
        const fn default_enabled() -> bool {
            true
        }

        pub fn new(days: WeekdaySet, start: TimeOfDay, stop: TimeOfDay) -> Self {
            Self {
                enabled: true,
                days,
                start,
                stop,
                timezone: None,
            }
        }

        pub fn validate(&self) -> Result<()> {
            ensure!(!self.days.is_empty(), "schedule.days must not be empty");
            ensure!(
                self.start <= self.stop,
                "schedule.start ({}) must not be after schedule.stop ({}); \
                 overnight windows are not supported",
                self.start,
                self.stop
            );
            Ok(())
        }

        /// Whether the window covers `weekday` at `time`.
        ///
        /// Fails only for a malformed window, so callers can pick their own fallback.
        pub fn evaluate(&self, weekday: Weekday, time: NaiveTime) -> Result<bool, ScheduleError> {
            if self.days.is_empty() {
                return Err(ScheduleError::NoDays);
            }
            if self.start > self.stop {
                return Err(ScheduleError::Inverted {
                    start: self.start,
                    stop: self.stop,
                });
            }
            if !self.days.contains(weekday) {
                return Ok(false);
            }
            let minute = TimeOfDay::from_time(time);
            Ok(self.start <= minute && minute < self.stop)
        }

        pub fn evaluate_at<Z: TimeZone>(
            &self,
            instant: &DateTime<Z>,
        ) -> Result<bool, ScheduleError> {
            self.evaluate(instant.weekday(), instant.time())
        }

        /// Evaluates against the wall clock, in the configured timezone or local time.
        pub fn evaluate_now(&self) -> Result<bool, ScheduleError> {
            match self.timezone {
                Some(tz) => self.evaluate_at(&Utc::now().with_timezone(&tz)),
                None => self.evaluate_at(&Local::now()),
            }
        }

        /// Next boundary strictly after `from`, paired with the activity it switches to.
        pub fn next_transition_after(&self, from: NaiveDateTime) -> Option<(NaiveDateTime, bool)> {
            if self.days.is_empty() || self.start >= self.stop {
                return None;
            }
            for offset in 0..=7 {
                let date = from.date() + ChronoDuration::days(offset);
                if !self.days.contains(date.weekday()) {
                    continue;
                }
                let start = date.and_time(self.start.as_time());
                let stop = date.and_time(self.stop.as_time());
                if start > from {
                    return Some((start, true));
                }
                if stop > from {
                    return Some((stop, false));
                }
            }
            None
        }

        /// First window start strictly after `from`.
        pub fn next_start_after(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
            let mut cursor = from;
            // At most a stop and then a start.
            for _ in 0..2 {
                let (when, active) = self.next_transition_after(cursor)?;
                if active {
                    return Some(when);
                }
                cursor = when;
            }
            None
        }

        /// Wall-clock time in the configured timezone or local time.
        pub fn local_now(&self) -> NaiveDateTime {
            match self.timezone {
                Some(tz) => Utc::now().with_timezone(&tz).naive_local(),
                None => Local::now().naive_local(),
            }
        }

        /// Human readable form, e.g. `Mon-Fri 07:00-23:00`.
        pub fn describe(&self) -> String {
            format!("{} {}-{}", self.days, self.start, self.stop)
        }
    }

    /// Minute-of-day resolution time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct TimeOfDay {
        minutes: u16,
    }

    impl TimeOfDay {
        pub fn new(hour: u32, minute: u32) -> Option<Self> {
            if hour > 23 || minute > 59 {
                return None;
            }
            Some(Self {
                minutes: (hour * 60 + minute) as u16,
            })
        }

        pub fn from_time(time: NaiveTime) -> Self {
            Self {
                minutes: (time.hour() * 60 + time.minute()) as u16,
            }
        }

        pub fn hour(&self) -> u32 {
            u32::from(self.minutes / 60)
        }

        pub fn minute(&self) -> u32 {
            u32::from(self.minutes % 60)
        }

        pub fn as_time(&self) -> NaiveTime {
            NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or(NaiveTime::MIN)
        }

        pub fn parse(value: &str) -> Option<Self> {
            let trimmed = value.trim();
            for format in ["%H:%M", "%H:%M:%S"] {
                if let Ok(parsed) = NaiveTime::parse_from_str(trimmed, format) {
                    return Some(Self::from_time(parsed));
                }
            }
            None
        }
    }

    impl fmt::Display for TimeOfDay {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:02}:{:02}", self.hour(), self.minute())
        }
    }

    impl<'de> Deserialize<'de> for TimeOfDay {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = String::deserialize(deserializer)?;
            Self::parse(&raw).ok_or_else(|| {
                de::Error::custom(format!("invalid time literal '{raw}', expected HH:MM"))
            })
        }
    }

    /// Set of enabled weekdays, stored as a Monday-first bit mask.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct WeekdaySet {
        bits: u8,
    }

    const ORDER: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];

    impl WeekdaySet {
        pub fn from_days(days: impl IntoIterator<Item = Weekday>) -> Self {
            let mut set = Self::default();
            for day in days {
                set.insert(day);
            }
            set
        }

        pub fn weekdays() -> Self {
            Self::from_days(ORDER[..5].iter().copied())
        }

        pub fn every_day() -> Self {
            Self::from_days(ORDER)
        }

        pub fn insert(&mut self, day: Weekday) {
            self.bits |= 1 << day.num_days_from_monday();
        }

        pub fn contains(&self, day: Weekday) -> bool {
            self.bits & (1 << day.num_days_from_monday()) != 0
        }

        pub fn is_empty(&self) -> bool {
            self.bits == 0
        }

        pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
            ORDER.into_iter().filter(|day| self.contains(*day))
        }
    }

    fn short_name(day: Weekday) -> &'static str {
        match day {
            Weekday::Mon => "Mon",
            Weekday::Tue => "Tue",
            Weekday::Wed => "Wed",
            Weekday::Thu => "Thu",
            Weekday::Fri => "Fri",
            Weekday::Sat => "Sat",
            Weekday::Sun => "Sun",
        }
    }

    fn parse_day(raw: &str) -> Option<Weekday> {
        let lowered = raw.trim().to_ascii_lowercase();
        ORDER
            .into_iter()
            .find(|day| short_name(*day).eq_ignore_ascii_case(&lowered))
    }

    impl fmt::Debug for WeekdaySet {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_set().entries(self.iter().map(short_name)).finish()
        }
    }

    /// Collapses consecutive days into ranges: `Mon-Fri`, `Mon,Wed,Sat-Sun`.
    impl fmt::Display for WeekdaySet {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let mut runs: Vec<(usize, usize)> = Vec::new();
            for (idx, day) in ORDER.iter().enumerate() {
                if !self.contains(*day) {
                    continue;
                }
                match runs.last_mut() {
                    Some((_, end)) if *end + 1 == idx => *end = idx,
                    _ => runs.push((idx, idx)),
                }
            }
            let parts: Vec<String> = runs
                .into_iter()
                .map(|(start, end)| {
                    if start == end {
                        short_name(ORDER[start]).to_string()
                    } else {
                        format!("{}-{}", short_name(ORDER[start]), short_name(ORDER[end]))
                    }
                })
                .collect();
            f.write_str(&parts.join(","))
        }
    }

    impl<'de> Deserialize<'de> for WeekdaySet {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw: Vec<String> = Deserialize::deserialize(deserializer)?;
            let mut set = Self::default();
            for entry in raw {
                let day = parse_day(&entry).ok_or_else(|| {
                    de::Error::custom(format!(
                        "invalid day '{entry}', expected one of Mon, Tue, Wed, Thu, Fri, Sat, Sun"
                    ))
                })?;
                set.insert(day);
            }
            Ok(set)
        }
    }
}
