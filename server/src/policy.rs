//! Tracking policy.
//!
//! Maps a status transition onto a timer decision using the configured
//! start statuses of the task's service:
//!
//! | was in start set | is in start set | Decision |
//! |------------------|-----------------|----------|
//! | no  | yes | `Start` |
//! | yes | no  | `Stop` |
//! | yes | yes | `Continue` |
//! | no  | no  | `None` |
//!
//! A transition to the same status is always `None`. An empty start set
//! never starts anything.

use serde::Serialize;

/// What a status transition means for the task's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Start,
    Stop,
    /// Stays tracked; the running timer is left untouched.
    Continue,
    None,
}

impl Decision {
    /// Decision from start-set membership before and after the transition.
    #[must_use]
    pub fn from_membership(was: bool, is: bool) -> Self {
        match (was, is) {
            (false, true) => Self::Start,
            (true, false) => Self::Stop,
            (true, true) => Self::Continue,
            (false, false) => Self::None,
        }
    }

    /// True for decisions the timer store has to act on.
    #[must_use]
    pub fn mutates_timer(&self) -> bool {
        matches!(self, Self::Start | Self::Stop)
    }
}

/// Classifies a transition from `old` (unknown when `None`) to `new`.
///
/// # Example
///
/// ```rust
/// use kanbantime_server::policy::{classify, Decision};
///
/// let start = vec!["処理中".to_string()];
/// assert_eq!(classify(Some("未対応"), "処理中", &start), Decision::Start);
/// assert_eq!(classify(Some("処理中"), "完了", &start), Decision::Stop);
/// assert_eq!(classify(Some("処理中"), "処理中", &start), Decision::None);
/// ```
#[must_use]
pub fn classify(old: Option<&str>, new: &str, start_statuses: &[String]) -> Decision {
    if old == Some(new) {
        return Decision::None;
    }
    let was = old.is_some_and(|old| is_start(old, start_statuses));
    Decision::from_membership(was, is_start(new, start_statuses))
}

/// Exact match against the start set.
#[must_use]
pub fn is_start(status: &str, start_statuses: &[String]) -> bool {
    start_statuses.iter().any(|s| s == status)
}
