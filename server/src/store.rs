//! Timer store.
//!
//! The authoritative in-memory state of the timer core: running timers by
//! key and the append-only list of completed sessions. Every operation
//! takes the current time as an argument; the store never reads a clock
//! and never decides transitions on its own.
//!
//! Per key the lifecycle is `Idle -> Running -> Idle`: [`TimerStore::start`]
//! is idempotent on a running key, [`TimerStore::stop`] is a no-op on an
//! idle one.
//!
//! # Example
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use kanbantime_server::store::{StartOutcome, TimerStore};
//! use kanbantime_server::types::{Service, StopReason, TaskMeta};
//!
//! let meta = TaskMeta {
//!     task_id: "acme_TEST-4".to_string(),
//!     service: Service::Backlog,
//!     task_title: "Fix login".to_string(),
//!     project_name: "TEST".to_string(),
//!     issue_key: Some("TEST-4".to_string()),
//!     space_or_org: Some("acme".to_string()),
//!     tab_id: None,
//! };
//!
//! let mut store = TimerStore::new();
//! let t0 = Utc::now();
//! assert!(matches!(store.start(meta.clone(), t0), StartOutcome::Started(_)));
//! assert!(matches!(store.start(meta, t0 + Duration::seconds(5)), StartOutcome::AlreadyRunning(_)));
//!
//! let log = store.stop("acme_TEST-4", t0 + Duration::minutes(1), StopReason::StatusChange).unwrap();
//! assert_eq!(log.duration, 60_000);
//! assert!(store.active_timers(t0).is_empty());
//! ```

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, info};

use crate::summary::{self, TimeSummary};
use crate::types::{ActiveTimerView, StopReason, TaskMeta, TimeLog, Timer};

/// Age after which a timer is considered abandoned.
pub const STALE_AFTER_HOURS: i64 = 24;

/// Result of [`TimerStore::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(Timer),
    /// A timer was already running for the key; it is left unchanged.
    AlreadyRunning(Timer),
}

#[derive(Debug, Default, Clone)]
pub struct TimerStore {
    active: BTreeMap<String, Timer>,
    logs: Vec<TimeLog>,
    log_ids: HashSet<String>,
}

impl TimerStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a timer for the task unless one is already running.
    pub fn start(&mut self, meta: TaskMeta, now: DateTime<Utc>) -> StartOutcome {
        let key = meta.key();
        if let Some(existing) = self.active.get(&key) {
            debug!(key = %key, "Timer already running");
            return StartOutcome::AlreadyRunning(existing.clone());
        }

        let timer = Timer::new(key.clone(), meta, now);
        info!(key = %key, title = %timer.task_title, "Timer started");
        self.active.insert(key, timer.clone());
        StartOutcome::Started(timer)
    }

    /// Stops the timer for `key` and records its session.
    ///
    /// Returns `None` if no timer is running for `key`.
    pub fn stop(&mut self, key: &str, now: DateTime<Utc>, reason: StopReason) -> Option<TimeLog> {
        let timer = self.active.remove(key)?;
        let log = timer.into_log(now, reason);
        info!(key = %key, duration_ms = log.duration, reason = ?reason, "Timer stopped");
        self.append(log.clone());
        Some(log)
    }

    /// Stops a timer on explicit request.
    ///
    /// Looks up `key` first, then any timer recorded under `task_id`, since
    /// the requester may only know the task id the timer was started with.
    pub fn stop_by_key(&mut self, key: &str, task_id: &str, now: DateTime<Utc>) -> Option<TimeLog> {
        let key = if self.active.contains_key(key) {
            key.to_string()
        } else {
            self.active
                .values()
                .find(|timer| timer.task_id == task_id || timer.key == task_id)?
                .key
                .clone()
        };
        self.stop(&key, now, StopReason::Manual)
    }

    /// Stops and logs every running timer.
    pub fn clear_all(&mut self, now: DateTime<Utc>) -> Vec<TimeLog> {
        let keys: Vec<String> = self.active.keys().cloned().collect();
        keys.iter()
            .filter_map(|key| self.stop(key, now, StopReason::Cleared))
            .collect()
    }

    /// Loads persisted timers, dropping the stale ones without logging them.
    ///
    /// Returns the dropped timers.
    pub fn restore(&mut self, timers: impl IntoIterator<Item = Timer>, now: DateTime<Utc>) -> Vec<Timer> {
        let mut dropped = Vec::new();
        for timer in timers {
            if is_stale(&timer, now) {
                info!(key = %timer.key, start_time = %timer.start_time, "Discarding stale timer");
                dropped.push(timer);
            } else {
                self.active.entry(timer.key.clone()).or_insert(timer);
            }
        }
        dropped
    }

    /// Drops running timers older than the staleness threshold.
    pub fn sweep_stale(&mut self, now: DateTime<Utc>) -> Vec<Timer> {
        let stale: Vec<String> = self
            .active
            .values()
            .filter(|timer| is_stale(timer, now))
            .map(|timer| timer.key.clone())
            .collect();
        stale
            .iter()
            .filter_map(|key| self.active.remove(key))
            .inspect(|timer| info!(key = %timer.key, "Dropping orphaned timer"))
            .collect()
    }

    /// Adds logs not yet known by id. Returns how many were added.
    pub fn merge_logs(&mut self, logs: impl IntoIterator<Item = TimeLog>) -> usize {
        let before = self.logs.len();
        for log in logs {
            self.append(log);
        }
        self.logs.len() - before
    }

    #[must_use]
    pub fn is_running(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }

    #[must_use]
    pub fn timer(&self, key: &str) -> Option<&Timer> {
        self.active.get(key)
    }

    /// Running timers by key, as persisted.
    #[must_use]
    pub fn timers(&self) -> &BTreeMap<String, Timer> {
        &self.active
    }

    #[must_use]
    pub fn logs(&self) -> &[TimeLog] {
        &self.logs
    }

    #[must_use]
    pub fn active_timers(&self, now: DateTime<Utc>) -> Vec<ActiveTimerView> {
        self.active.values().map(|timer| timer.view(now)).collect()
    }

    /// Summary as seen at `now`, in `now`'s time zone.
    #[must_use]
    pub fn summarize<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> TimeSummary {
        let active = self.active_timers(now.with_timezone(&Utc));
        summary::summarize(&self.logs, active, now)
    }

    fn append(&mut self, log: TimeLog) {
        if self.log_ids.insert(log.id.clone()) {
            self.logs.push(log);
        }
    }
}

fn is_stale(timer: &Timer, now: DateTime<Utc>) -> bool {
    now - timer.start_time > Duration::hours(STALE_AFTER_HOURS)
}
