// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Schedules & Dedup Windows
//!
//! A job's cadence is one of:
//!
//! | Type | Due when | Window bucket |
//! |------|----------|---------------|
//! | `cron` | the evaluation minute matches the 5-field expression | that minute |
//! | `interval` | always (one run per bucket, enforced by dedup) | `floor(t / seconds)` |
//! | `manual` | only on a manual trigger | the trigger minute |
//!
//! Cron expressions support `*`, lists, ranges, steps, month/day names and
//! the `@hourly`, `@daily`, `@weekly`, `@monthly`, `@yearly` macros. When both
//! day-of-month and day-of-week are restricted a day matches if *either*
//! does. Timezones are `UTC` or a fixed `±HH:MM` offset.
//!
//! The window id is `job_id@<bucket start unix secs>#<schedule fingerprint>`:
//! the same logical occurrence always yields the same id, and editing the
//! schedule starts a fresh window.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::domain::hashing::stable_hash;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("cron expression must have 5 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid cron field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("unknown cron macro `{0}`")]
    UnknownMacro(String),
    #[error("invalid timezone `{0}`: expected UTC or ±HH:MM")]
    InvalidTimezone(String),
    #[error("interval seconds must be greater than 0")]
    ZeroInterval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schedule {
    Cron {
        cron: String,
        #[serde(default = "default_timezone")]
        timezone: String,
        #[serde(default = "default_true")]
        enabled: bool,
    },
    Interval {
        seconds: u64,
        #[serde(default = "default_true")]
        enabled: bool,
    },
    Manual,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

/// Result of checking a schedule at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleCheck {
    pub due: bool,
    /// Next occurrence strictly after the current window.
    pub next_occurrence: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub window_id: String,
    pub bucket_start: DateTime<Utc>,
}

/// Parse `UTC`/`Z` or a fixed `±HH:MM` offset.
pub fn parse_timezone(tz: &str) -> Result<FixedOffset, ScheduleError> {
    let tz = tz.trim();
    let invalid = || ScheduleError::InvalidTimezone(tz.to_string());
    if tz.eq_ignore_ascii_case("utc") || tz == "Z" || tz == "+00:00" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }
    let (sign, rest) = match tz.as_bytes().first() {
        Some(b'+') => (1, &tz[1..]),
        Some(b'-') => (-1, &tz[1..]),
        _ => return Err(invalid()),
    };
    let (h, m) = rest.split_once(':').ok_or_else(invalid)?;
    let h: i32 = h.parse().map_err(|_| invalid())?;
    let m: i32 = m.parse().map_err(|_| invalid())?;
    if h > 14 || m > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60)).ok_or_else(invalid)
}

fn minute_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    let secs = at.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(at)
}

impl Schedule {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Schedule::Cron { cron, timezone, .. } => {
                cron.parse::<CronExpr>()?;
                parse_timezone(timezone)?;
                Ok(())
            }
            Schedule::Interval { seconds: 0, .. } => Err(ScheduleError::ZeroInterval),
            Schedule::Interval { .. } | Schedule::Manual => Ok(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            Schedule::Cron { enabled, .. } | Schedule::Interval { enabled, .. } => *enabled,
            Schedule::Manual => true,
        }
    }

    /// First 8 hex chars of the schedule's stable hash.
    pub fn fingerprint(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or_default();
        stable_hash(&value)[..8].to_string()
    }

    pub fn window(&self, job_id: &str, at: DateTime<Utc>) -> ScheduleWindow {
        let bucket_start = match self {
            Schedule::Interval { seconds, .. } if *seconds > 0 => {
                let secs = at.timestamp();
                let width = *seconds as i64;
                DateTime::from_timestamp(secs - secs.rem_euclid(width), 0).unwrap_or(at)
            }
            _ => minute_floor(at),
        };
        ScheduleWindow {
            window_id: format!("{job_id}@{}#{}", bucket_start.timestamp(), self.fingerprint()),
            bucket_start,
        }
    }

    /// Whether the schedule is due at `at`, and when it next fires.
    pub fn check(&self, at: DateTime<Utc>) -> Result<ScheduleCheck, ScheduleError> {
        if !self.is_enabled() {
            return Ok(ScheduleCheck { due: false, next_occurrence: None });
        }
        match self {
            Schedule::Cron { cron, timezone, .. } => {
                let expr: CronExpr = cron.parse()?;
                let tz = parse_timezone(timezone)?;
                let local = at.with_timezone(&tz).naive_local();
                Ok(ScheduleCheck { due: expr.matches(&local), next_occurrence: expr.next_after(at, tz) })
            }
            Schedule::Interval { seconds, .. } => {
                if *seconds == 0 {
                    return Err(ScheduleError::ZeroInterval);
                }
                let window = self.window("", at);
                Ok(ScheduleCheck {
                    due: true,
                    next_occurrence: Some(window.bucket_start + Duration::seconds(*seconds as i64)),
                })
            }
            Schedule::Manual => Ok(ScheduleCheck { due: false, next_occurrence: None }),
        }
    }
}

/// Parsed 5-field cron expression as per-field bitsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u32,
    days_of_month: u32,
    months: u16,
    days_of_week: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

const MONTH_NAMES: [&str; 12] = ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// value of the first entry in `names`
    name_base: u32,
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, ScheduleError> {
    let lower = raw.to_ascii_lowercase();
    if let Some(pos) = spec.names.iter().position(|n| *n == lower) {
        return Ok(pos as u32 + spec.name_base);
    }
    let value: u32 = raw.parse().map_err(|_| ScheduleError::InvalidField {
        field: spec.name.to_string(),
        reason: format!("`{raw}` is not a number"),
    })?;
    if value < spec.min || value > spec.max {
        return Err(ScheduleError::InvalidField {
            field: spec.name.to_string(),
            reason: format!("{value} outside {}-{}", spec.min, spec.max),
        });
    }
    Ok(value)
}

/// Parse one field into a bitset and whether it was restricted (not `*`).
fn parse_field(field: &str, spec: &FieldSpec) -> Result<(u64, bool), ScheduleError> {
    let mut bits = 0u64;
    let restricted = !(field == "*" || field == "?");
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().ok().filter(|s| *s > 0).ok_or_else(|| ScheduleError::InvalidField {
                    field: spec.name.to_string(),
                    reason: format!("invalid step in `{item}`"),
                })?;
                (range, step)
            }
            None => (item, 1),
        };
        let (lo, hi) = if range == "*" || range == "?" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, spec)?, parse_value(b, spec)?)
        } else {
            let v = parse_value(range, spec)?;
            // `a/n` means from a to the end of the range
            (v, if step > 1 { spec.max } else { v })
        };
        if lo > hi {
            return Err(ScheduleError::InvalidField {
                field: spec.name.to_string(),
                reason: format!("range `{range}` is reversed"),
            });
        }
        let mut v = lo;
        while v <= hi {
            bits |= 1 << v;
            v += step;
        }
    }
    Ok((bits, restricted))
}

impl FromStr for CronExpr {
    type Err = ScheduleError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        let expanded = match expr.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            m if m.starts_with('@') => return Err(ScheduleError::UnknownMacro(expr.to_string())),
            _ => expr,
        };
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        let (minutes, _) = parse_field(fields[0], &FieldSpec { name: "minute", min: 0, max: 59, names: &[], name_base: 0 })?;
        let (hours, _) = parse_field(fields[1], &FieldSpec { name: "hour", min: 0, max: 23, names: &[], name_base: 0 })?;
        let (dom, dom_restricted) =
            parse_field(fields[2], &FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], name_base: 1 })?;
        let (months, _) = parse_field(fields[3], &FieldSpec { name: "month", min: 1, max: 12, names: &MONTH_NAMES, name_base: 1 })?;
        let (dow, dow_restricted) =
            parse_field(fields[4], &FieldSpec { name: "day-of-week", min: 0, max: 7, names: &DAY_NAMES, name_base: 0 })?;

        // 7 is Sunday as well
        let dow = (dow | (dow >> 7)) & 0x7f;

        Ok(CronExpr {
            minutes,
            hours: hours as u32,
            days_of_month: dom as u32,
            months: months as u16,
            days_of_week: dow as u8,
            dom_restricted,
            dow_restricted,
        })
    }
}

impl CronExpr {
    fn month_matches(&self, t: &NaiveDateTime) -> bool {
        self.months & (1 << t.month()) != 0
    }

    fn day_matches(&self, t: &NaiveDateTime) -> bool {
        let dom = self.days_of_month & (1 << t.day()) != 0;
        let dow = self.days_of_week & (1 << t.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    fn hour_matches(&self, t: &NaiveDateTime) -> bool {
        self.hours & (1 << t.hour()) != 0
    }

    fn minute_matches(&self, t: &NaiveDateTime) -> bool {
        self.minutes & (1 << t.minute()) != 0
    }

    /// Whether the local wall-clock minute of `t` fires.
    pub fn matches(&self, t: &NaiveDateTime) -> bool {
        self.month_matches(t) && self.day_matches(t) && self.hour_matches(t) && self.minute_matches(t)
    }

    /// First firing minute strictly after the minute containing `after`.
    pub fn next_after(&self, after: DateTime<Utc>, tz: FixedOffset) -> Option<DateTime<Utc>> {
        let local = minute_floor(after).with_timezone(&tz).naive_local();
        let mut t = local + Duration::minutes(1);
        let limit_year = t.year() + 5;

        while t.year() <= limit_year {
            if !self.month_matches(&t) {
                let (y, m) = if t.month() == 12 { (t.year() + 1, 1) } else { (t.year(), t.month() + 1) };
                t = NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(&t) {
                t = (t.date() + Duration::days(1)).and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hour_matches(&t) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minute_matches(&t) {
                t += Duration::minutes(1);
                continue;
            }
            return t.and_local_timezone(tz).single().map(|dt| dt.with_timezone(&Utc));
        }
        None
    }
}
