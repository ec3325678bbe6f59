// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Cron schedules.
//!
//! Mirrors are refreshed on standard five field cron expressions, evaluated
//! against local wall-clock time:
//!
//! ```text
//! ┌───────────── minute (0 - 59)
//! │ ┌─────────── hour (0 - 23)
//! │ │ ┌───────── day of month (1 - 31)
//! │ │ │ ┌─────── month (1 - 12)
//! │ │ │ │ ┌───── day of week (0 - 7, where both 0 and 7 are Sunday)
//! * * * * *
//! ```
//!
//! A sixth leading field for seconds is also accepted, and so are the
//! `@yearly`, `@monthly`, `@weekly`, `@daily`, and `@hourly` shorthands.
//!
//! When both day of month and day of week are restricted, a time matching
//! either of them fires, like classic cron. So `0 0 15 * 1` fires on the 15th
//! of every month and on every Monday.

use chrono::{DateTime, Local};
use cron::Schedule;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Parsed cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,

    // INVARIANT: Never empty. Fire times are the union of all schedules.
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    /// Expression schedule was parsed from.
    pub fn expression(&self) -> &str {
        self.expression.as_str()
    }

    /// Next fire time strictly after target time.
    pub fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.upcoming(*after).next()
    }

    /// Lazily iterate fire times strictly after target time.
    ///
    /// Fire times come out in ascending order without duplicates.
    pub fn upcoming(&self, after: DateTime<Local>) -> impl Iterator<Item = DateTime<Local>> + '_ {
        let mut streams = self
            .schedules
            .iter()
            .map(|schedule| schedule.after(&after).peekable())
            .collect::<Vec<_>>();

        std::iter::from_fn(move || {
            let next = streams
                .iter_mut()
                .filter_map(|stream| stream.peek().copied())
                .min()?;
            for stream in streams.iter_mut() {
                stream.next_if_eq(&next);
            }
            Some(next)
        })
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let expression = expression.trim();
        let schedules = split_day_fields(&translate(expression))
            .iter()
            .map(|translated| Schedule::from_str(translated))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ScheduleError::Invalid {
                expression: expression.to_string(),
                reason: err.to_string(),
            })?;

        Ok(Self {
            expression: expression.to_string(),
            schedules,
        })
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

impl Display for CronSchedule {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.expression())
    }
}

/// Translate standard cron expression into the seconds-first dialect that
/// the `cron` crate parses.
fn translate(expression: &str) -> String {
    if expression.starts_with('@') {
        return expression.to_string();
    }

    let mut fields: Vec<String> = expression.split_whitespace().map(String::from).collect();
    match fields.len() {
        5 => {
            fields[4] = translate_weekdays(&fields[4]);
            fields.insert(0, "0".into());
        }
        6 => fields[5] = translate_weekdays(&fields[5]),
        _ => return expression.to_string(),
    }

    fields.join(" ")
}

/// Split translated expression restricting both day of month and day of week
/// into one expression per day field.
///
/// The `cron` crate requires both day fields to match, while classic cron
/// fires when either one does.
fn split_day_fields(translated: &str) -> Vec<String> {
    let fields = translated.split_whitespace().collect::<Vec<_>>();
    let restricted = |field: &str| !field.starts_with('*') && !field.starts_with('?');
    if fields.len() < 6 || !restricted(fields[3]) || !restricted(fields[5]) {
        return vec![translated.to_string()];
    }

    let mut by_month_day = fields.clone();
    by_month_day[5] = "*";
    let mut by_week_day = fields;
    by_week_day[3] = "*";

    vec![by_month_day.join(" "), by_week_day.join(" ")]
}

const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

fn translate_weekdays(field: &str) -> String {
    field
        .split(',')
        .map(translate_weekday_item)
        .collect::<Vec<_>>()
        .join(",")
}

fn translate_weekday_item(item: &str) -> String {
    let (range, step) = match item.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (item, None),
    };

    let range = match range.split_once('-') {
        Some(("0", "7")) => "*".to_string(),
        Some((start, "7")) if step.is_none() => {
            // Sunday wraps around to the start of the week.
            format!("{}-Sat,Sun", weekday_name(start))
        }
        Some((start, end)) => format!("{}-{}", weekday_name(start), weekday_name(end)),
        None => weekday_name(range),
    };

    match step {
        Some(step) => format!("{range}/{step}"),
        None => range,
    }
}

fn weekday_name(token: &str) -> String {
    token
        .parse::<usize>()
        .ok()
        .and_then(|day| WEEKDAYS.get(day))
        .map_or_else(|| token.to_string(), |name| (*name).to_string())
}

/// Cron schedule error types.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Expression cannot be parsed.
    #[error("invalid cron expression {expression:?}: {reason}")]
    Invalid { expression: String, reason: String },
}
