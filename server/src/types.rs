//! Timer domain types for the kanbantime server.
//!
//! These structures are persisted as-is in the key-value store, so their
//! JSON shape (camelCase fields, millisecond timestamps) is part of the
//! durable format.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Kanban service a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Backlog,
    Github,
}

impl Service {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Github => "github",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the timer key for a task.
///
/// `{space}_{issue}` when both are known, `{service}-{issue}` with only an
/// issue key, and the detector's task id otherwise.
///
/// # Example
///
/// ```rust
/// use kanbantime_server::types::{timer_key, Service};
///
/// assert_eq!(timer_key(Service::Backlog, "x", Some("TEST-4"), Some("acme")), "acme_TEST-4");
/// assert_eq!(timer_key(Service::Github, "x", Some("#6"), None), "github-#6");
/// assert_eq!(timer_key(Service::Github, "github-title-fix", None, None), "github-title-fix");
/// ```
#[must_use]
pub fn timer_key(service: Service, task_id: &str, issue_key: Option<&str>, space_or_org: Option<&str>) -> String {
    let issue_key = issue_key.filter(|k| !k.is_empty());
    let space_or_org = space_or_org.filter(|s| !s.is_empty());
    match (issue_key, space_or_org) {
        (Some(issue), Some(space)) => format!("{space}_{issue}"),
        (Some(issue), None) => format!("{service}-{issue}"),
        (None, _) => task_id.to_string(),
    }
}

/// Descriptive fields of a task, as reported by the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMeta {
    pub task_id: String,
    pub service: Service,
    pub task_title: String,
    pub project_name: String,
    pub issue_key: Option<String>,
    pub space_or_org: Option<String>,
    pub tab_id: Option<u64>,
}

impl TaskMeta {
    #[must_use]
    pub fn key(&self) -> String {
        timer_key(
            self.service,
            &self.task_id,
            self.issue_key.as_deref(),
            self.space_or_org.as_deref(),
        )
    }
}

/// One running measurement session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub key: String,
    pub task_id: String,
    pub service: Service,
    #[serde(default)]
    pub task_title: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub issue_key: Option<String>,
    #[serde(default)]
    pub space_or_org: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    /// Advisory, used to route notifications.
    #[serde(default)]
    pub tab_id: Option<u64>,
}

impl Timer {
    #[must_use]
    pub fn new(key: String, meta: TaskMeta, start_time: DateTime<Utc>) -> Self {
        Self {
            key,
            task_id: meta.task_id,
            service: meta.service,
            task_title: meta.task_title,
            project_name: meta.project_name,
            issue_key: meta.issue_key,
            space_or_org: meta.space_or_org,
            start_time,
            tab_id: meta.tab_id,
        }
    }

    /// Elapsed milliseconds at `now`, zero if the clock went backwards.
    #[must_use]
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        elapsed_ms(self.start_time, now)
    }

    /// Converts the timer into its log record.
    #[must_use]
    pub fn into_log(self, end_time: DateTime<Utc>, stop_reason: StopReason) -> TimeLog {
        TimeLog {
            id: format!("{}_{}", self.key, self.start_time.timestamp_millis()),
            duration: self.elapsed_ms(end_time),
            date: self.start_time.with_timezone(&Local).format("%Y-%m-%d").to_string(),
            task_id: self.task_id,
            service: self.service,
            task_title: self.task_title,
            project_name: self.project_name,
            issue_key: self.issue_key,
            space_or_org: self.space_or_org,
            start_time: self.start_time,
            end_time,
            stop_reason,
        }
    }

    #[must_use]
    pub fn view(&self, now: DateTime<Utc>) -> ActiveTimerView {
        ActiveTimerView {
            task_id: self.task_id.clone(),
            timer_key: self.key.clone(),
            task_title: self.task_title.clone(),
            service: self.service,
            project_name: self.project_name.clone(),
            issue_key: self.issue_key.clone(),
            space_or_org: self.space_or_org.clone(),
            duration: self.elapsed_ms(now),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The task left a tracked status.
    #[default]
    StatusChange,
    /// Stopped with `STOP_TIMER`.
    Manual,
    /// Stopped with `CLEAR_ALL_TIMERS`.
    Cleared,
}

/// Completed session. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeLog {
    /// `{key}_{start_time millis}`.
    pub id: String,
    pub task_id: String,
    pub service: Service,
    #[serde(default)]
    pub task_title: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub issue_key: Option<String>,
    #[serde(default)]
    pub space_or_org: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_time: DateTime<Utc>,
    /// Milliseconds.
    pub duration: u64,
    /// Local calendar date of `start_time`, `YYYY-MM-DD`.
    pub date: String,
    #[serde(default)]
    pub stop_reason: StopReason,
}

/// Entry of the `GET_ACTIVE_TIMERS` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTimerView {
    pub task_id: String,
    pub timer_key: String,
    pub task_title: String,
    pub service: Service,
    pub project_name: String,
    pub issue_key: Option<String>,
    pub space_or_org: Option<String>,
    /// Elapsed milliseconds at query time.
    pub duration: u64,
}

/// Statuses that count as being worked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusList {
    #[serde(default)]
    pub start: Vec<String>,
}

impl StatusList {
    fn of(statuses: &[&str]) -> Self {
        Self {
            start: statuses.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Start statuses per service. A service left out keeps its defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingStatuses {
    pub backlog: StatusList,
    pub github: StatusList,
}

impl Default for TrackingStatuses {
    fn default() -> Self {
        Self {
            backlog: StatusList::of(&["処理中"]),
            github: StatusList::of(&["In Progress"]),
        }
    }
}

/// User settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub tracking_statuses: TrackingStatuses,
    #[serde(default = "default_notifications")]
    pub notifications: bool,
}

fn default_notifications() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tracking_statuses: TrackingStatuses::default(),
            notifications: true,
        }
    }
}

impl Settings {
    /// Configured start statuses for a service.
    #[must_use]
    pub fn start_statuses(&self, service: Service) -> &[String] {
        match service {
            Service::Backlog => &self.tracking_statuses.backlog.start,
            Service::Github => &self.tracking_statuses.github.start,
        }
    }
}

pub(crate) fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}
