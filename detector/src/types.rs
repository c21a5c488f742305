//! Wire types shared between the detector and the timer core.
//!
//! Messages serialize to JSON objects tagged by `type` in
//! SCREAMING_SNAKE_CASE with camelCase fields, matching what the core's
//! `POST /messages` endpoint accepts.

use serde::{Deserialize, Serialize};

/// Kanban service the board belongs to.
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

impl std::str::FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backlog" => Ok(Self::Backlog),
            "github" => Ok(Self::Github),
            other => Err(format!("unknown service '{other}', expected backlog or github")),
        }
    }
}

/// Messages the detector sends to the timer core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    /// An accepted status transition.
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        task_id: String,
        new_status: String,
        /// `None` when the previous status was never observed.
        old_status: Option<String>,
        service: Service,
        task_title: String,
        project_name: String,
        issue_key: Option<String>,
        space_or_org: Option<String>,
    },
    /// Baseline status of a task seen for the first time.
    #[serde(rename_all = "camelCase")]
    TaskInitialized {
        task_id: String,
        status: String,
        service: Service,
        task_title: String,
        project_name: String,
        issue_key: Option<String>,
        space_or_org: Option<String>,
    },
    GetActiveTimers,
}

impl OutboundMessage {
    /// Short name used in log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "STATUS_CHANGED",
            Self::TaskInitialized { .. } => "TASK_INITIALIZED",
            Self::GetActiveTimers => "GET_ACTIVE_TIMERS",
        }
    }
}

/// Acknowledgement returned for commands and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

/// Entry of the core's `GET_ACTIVE_TIMERS` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTimer {
    pub task_id: String,
    pub timer_key: String,
    #[serde(default)]
    pub task_title: String,
    pub service: Service,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub issue_key: Option<String>,
    #[serde(default)]
    pub space_or_org: Option<String>,
    /// Elapsed milliseconds at query time.
    #[serde(default)]
    pub duration: u64,
}

/// Notice written to stdout for the browser shim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notice {
    /// The core became unreachable; the detector stopped sending.
    TrackingPaused { message: String },
}
