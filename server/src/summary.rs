//! Time summaries for the popup.
//!
//! "Today" and "this week" are calendar ranges in the caller's time zone;
//! weeks start on Sunday. Per-task groups are keyed by task title rather
//! than task id, so a task re-identified under a new key still aggregates
//! with its earlier sessions.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use crate::types::{ActiveTimerView, TimeLog};

/// Response of `GET_TIME_SUMMARY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSummary {
    /// Milliseconds logged today.
    pub today: u64,
    /// Milliseconds logged since Sunday.
    pub this_week: u64,
    pub today_by_task: Vec<TaskTotal>,
    pub this_week_by_task: Vec<TaskTotal>,
    pub active_timers: Vec<ActiveTimerView>,
}

/// Sessions sharing a task title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTotal {
    pub task_title: String,
    pub total_duration: u64,
    pub sessions: Vec<TimeLog>,
}

/// First day (Sunday) of the week containing `date`.
#[must_use]
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

/// Builds the summary of `logs` as seen at `now`.
///
/// Logs are bucketed by the calendar date of their start time in `now`'s
/// time zone. Running timers are listed but not counted.
#[must_use]
pub fn summarize<Tz: TimeZone>(logs: &[TimeLog], active_timers: Vec<ActiveTimerView>, now: &DateTime<Tz>) -> TimeSummary {
    let tz = now.timezone();
    let today = now.date_naive();
    let week_begin = week_start(today);

    let local_date = |log: &TimeLog| log.start_time.with_timezone(&tz).date_naive();

    let today_logs: Vec<&TimeLog> = logs.iter().filter(|log| local_date(log) == today).collect();
    let week_logs: Vec<&TimeLog> = logs
        .iter()
        .filter(|log| (week_begin..=today).contains(&local_date(log)))
        .collect();

    TimeSummary {
        today: total(&today_logs),
        this_week: total(&week_logs),
        today_by_task: group_by_title(&today_logs),
        this_week_by_task: group_by_title(&week_logs),
        active_timers,
    }
}

fn total(logs: &[&TimeLog]) -> u64 {
    logs.iter().map(|log| log.duration).sum()
}

/// Groups sessions by title, largest total first.
fn group_by_title(logs: &[&TimeLog]) -> Vec<TaskTotal> {
    let mut groups: HashMap<&str, TaskTotal> = HashMap::new();
    for log in logs {
        let group = groups.entry(log.task_title.as_str()).or_insert_with(|| TaskTotal {
            task_title: log.task_title.clone(),
            total_duration: 0,
            sessions: Vec::new(),
        });
        group.total_duration += log.duration;
        group.sessions.push((*log).clone());
    }

    let mut groups: Vec<TaskTotal> = groups.into_values().collect();
    groups.sort_by(|a, b| {
        b.total_duration
            .cmp(&a.total_duration)
            .then_with(|| a.task_title.cmp(&b.task_title))
    });
    for group in &mut groups {
        group.sessions.sort_by_key(|log| log.start_time);
    }
    groups
}
