//! Change deduplication.
//!
//! A single drag typically fires the DOM mutation, pointer and network
//! detectors within a few hundred milliseconds of each other. The
//! [`ChangeDeduplicator`] collapses those into one accepted observation per
//! task key: after an observation is accepted, every further observation for
//! the same key is rejected until the window has passed.
//!
//! Bookkeeping is a plain in-memory map lookup and never awaits, so the
//! deduplicator can sit on the pipeline's hot path.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use tokio::time::Instant;
//! use kanbantime_detector::dedup::{ChangeDeduplicator, RejectReason};
//! # use kanbantime_detector::detectors::{Observation, ObservationSource};
//! # use kanbantime_detector::types::Service;
//! # fn observation() -> Observation {
//! #     Observation {
//! #         task_id: "acme_TEST-4".to_string(),
//! #         old_status: Some("未対応".to_string()),
//! #         new_status: "処理中".to_string(),
//! #         title: "Fix login".to_string(),
//! #         project_name: "TEST".to_string(),
//! #         issue_key: Some("TEST-4".to_string()),
//! #         space_or_org: Some("acme".to_string()),
//! #         service: Service::Backlog,
//! #         detected_at: chrono::Utc::now(),
//! #         source: ObservationSource::DomMutation,
//! #     }
//! # }
//!
//! let mut dedup = ChangeDeduplicator::new(Duration::from_millis(1500));
//! let now = Instant::now();
//!
//! assert!(dedup.accept(observation(), now).is_ok());
//! let rejected = dedup.accept(observation(), now + Duration::from_millis(500)).unwrap_err();
//! assert_eq!(rejected.reason, RejectReason::WithinWindow);
//! ```

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

use crate::detectors::Observation;

/// Default debounce window in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 1500;

/// Number of tracked keys above which expired entries are pruned.
const PRUNE_THRESHOLD: usize = 256;

/// Why an observation was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Another observation for the task was accepted within the window.
    WithinWindow,
    /// Old and new status are equal.
    NoOp,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WithinWindow => write!(f, "within window"),
            Self::NoOp => write!(f, "no-op transition"),
        }
    }
}

/// A dropped observation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("observation for {task_id} rejected: {reason}")]
pub struct Rejected {
    pub task_id: String,
    pub reason: RejectReason,
}

#[derive(Debug)]
pub struct ChangeDeduplicator {
    window: Duration,
    last_accepted: HashMap<String, Instant>,
}

impl ChangeDeduplicator {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    /// Creates a deduplicator with the default window (1500ms).
    #[must_use]
    pub fn with_default_window() -> Self {
        Self::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Accepts or rejects an observation made at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Rejected`] when the transition is a no-op or another
    /// observation for the same task was accepted less than one window ago.
    /// Rejected observations are not queued.
    pub fn accept(&mut self, observation: Observation, now: Instant) -> Result<Observation, Rejected> {
        if observation.is_no_op() {
            return Err(self.reject(observation, RejectReason::NoOp));
        }

        if let Some(last) = self.last_accepted.get(&observation.task_id) {
            if now.saturating_duration_since(*last) < self.window {
                return Err(self.reject(observation, RejectReason::WithinWindow));
            }
        }

        if self.last_accepted.len() >= PRUNE_THRESHOLD {
            self.prune(now);
        }
        self.last_accepted.insert(observation.task_id.clone(), now);
        Ok(observation)
    }

    /// Drops entries whose window has passed.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.last_accepted
            .retain(|_, last| now.saturating_duration_since(*last) < window);
    }

    #[must_use]
    pub fn tracked(&self) -> usize {
        self.last_accepted.len()
    }

    fn reject(&self, observation: Observation, reason: RejectReason) -> Rejected {
        trace!(
            task_id = %observation.task_id,
            source = %observation.source,
            reason = %reason,
            "Observation rejected"
        );
        Rejected {
            task_id: observation.task_id,
            reason,
        }
    }
}

impl Default for ChangeDeduplicator {
    fn default() -> Self {
        Self::with_default_window()
    }
}
