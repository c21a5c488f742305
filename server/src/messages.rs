//! Message interface of the timer core.
//!
//! Requests are JSON objects tagged by `type` in SCREAMING_SNAKE_CASE with
//! camelCase fields. Each request has exactly one response:
//!
//! | Request | Response |
//! |---------|----------|
//! | `STATUS_CHANGED` | `{success}` |
//! | `TASK_INITIALIZED` | `{success}` |
//! | `GET_ACTIVE_TIMERS` | array of active timers |
//! | `GET_TIME_SUMMARY` | `{today, thisWeek, todayByTask, thisWeekByTask, activeTimers}` |
//! | `STOP_TIMER` | `{success}` |
//! | `CLEAR_ALL_TIMERS` | `{success}` |
//! | `UPDATE_SETTINGS` | `{success}` |
//! | `GET_SETTINGS` | `{success, settings}` |

use serde::{Deserialize, Serialize};

use crate::summary::TimeSummary;
use crate::types::{timer_key, ActiveTimerView, Service, Settings, TaskMeta};

/// Inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        task_id: String,
        new_status: String,
        /// Missing or empty when the detector never saw the old status.
        #[serde(default)]
        old_status: Option<String>,
        service: Service,
        #[serde(default)]
        task_title: String,
        #[serde(default)]
        project_name: String,
        #[serde(default)]
        issue_key: Option<String>,
        #[serde(default)]
        space_or_org: Option<String>,
        #[serde(default)]
        tab_id: Option<u64>,
    },
    /// Baseline status of a task, never a transition.
    #[serde(rename_all = "camelCase")]
    TaskInitialized {
        task_id: String,
        status: String,
        service: Service,
        #[serde(default)]
        task_title: String,
        #[serde(default)]
        project_name: String,
        #[serde(default)]
        issue_key: Option<String>,
        #[serde(default)]
        space_or_org: Option<String>,
    },
    GetActiveTimers,
    GetTimeSummary,
    #[serde(rename_all = "camelCase")]
    StopTimer {
        task_id: String,
        service: Service,
        #[serde(default)]
        issue_key: Option<String>,
        #[serde(default)]
        space_or_org: Option<String>,
    },
    ClearAllTimers,
    UpdateSettings { settings: Settings },
    GetSettings,
}

impl Request {
    /// Message type, for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "STATUS_CHANGED",
            Self::TaskInitialized { .. } => "TASK_INITIALIZED",
            Self::GetActiveTimers => "GET_ACTIVE_TIMERS",
            Self::GetTimeSummary => "GET_TIME_SUMMARY",
            Self::StopTimer { .. } => "STOP_TIMER",
            Self::ClearAllTimers => "CLEAR_ALL_TIMERS",
            Self::UpdateSettings { .. } => "UPDATE_SETTINGS",
            Self::GetSettings => "GET_SETTINGS",
        }
    }

    /// Timer key of the task the message is about, if any.
    #[must_use]
    pub fn timer_key(&self) -> Option<String> {
        match self {
            Self::StatusChanged {
                task_id,
                service,
                issue_key,
                space_or_org,
                ..
            }
            | Self::TaskInitialized {
                task_id,
                service,
                issue_key,
                space_or_org,
                ..
            }
            | Self::StopTimer {
                task_id,
                service,
                issue_key,
                space_or_org,
            } => Some(timer_key(*service, task_id, issue_key.as_deref(), space_or_org.as_deref())),
            _ => None,
        }
    }

    /// Task metadata of a `STATUS_CHANGED`, used to start its timer.
    #[must_use]
    pub fn task_meta(&self) -> Option<TaskMeta> {
        match self {
            Self::StatusChanged {
                task_id,
                service,
                task_title,
                project_name,
                issue_key,
                space_or_org,
                tab_id,
                ..
            } => Some(TaskMeta {
                task_id: task_id.clone(),
                service: *service,
                task_title: task_title.clone(),
                project_name: project_name.clone(),
                issue_key: issue_key.clone(),
                space_or_org: space_or_org.clone(),
                tab_id: *tab_id,
            }),
            _ => None,
        }
    }
}

/// Outbound response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Settings { success: bool, settings: Settings },
    Ack { success: bool },
    ActiveTimers(Vec<ActiveTimerView>),
    Summary(Box<TimeSummary>),
}

impl Response {
    #[must_use]
    pub fn ok() -> Self {
        Self::Ack { success: true }
    }
}
