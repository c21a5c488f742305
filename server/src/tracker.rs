//! Tracker service, the single owner of timer state.
//!
//! [`TrackerService`] answers every message of the core's interface. All
//! state lives behind one async mutex, so messages are applied strictly in
//! arrival order; for a `STATUS_CHANGED` the service:
//!
//! 1. Resolves the old status. A missing one falls back to the baseline
//!    recorded by `TASK_INITIALIZED`; if that is unknown too, a running
//!    timer for the key means the task was tracked.
//! 2. Classifies the transition with the configured start statuses.
//! 3. Applies `Start`/`Stop` to the [`TimerStore`] and publishes a
//!    notification.
//! 4. Persists whatever changed.
//!
//! Memory is authoritative. A failed write leaves the state dirty; the next
//! message or the periodic [`TrackerService::sync`] writes it again.
//! `timeLogs` are merged by id with the durable array before every write,
//! so logs written by another writer are never clobbered. Durable entries
//! that cannot be decoded are skipped in memory but written back verbatim.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Utc};
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broadcast::{TimerBroadcaster, TimerNotification};
use crate::messages::{Request, Response};
use crate::persistence::{KvError, KvStore, ACTIVE_TIMERS_KEY, SETTINGS_KEY, TIME_LOGS_KEY};
use crate::policy::{classify, is_start, Decision};
use crate::store::{StartOutcome, TimerStore};
use crate::summary::TimeSummary;
use crate::types::{Settings, StopReason, TaskMeta, TimeLog, Timer};

/// Task baselines remembered from `TASK_INITIALIZED` and status changes.
pub const KNOWN_STATUS_CAPACITY: usize = 2000;

/// Which persisted keys have unsaved changes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Dirty {
    settings: bool,
    timers: bool,
    logs: bool,
}

impl Dirty {
    fn any(&self) -> bool {
        self.settings || self.timers || self.logs
    }
}

#[derive(Debug)]
struct TrackerState {
    store: TimerStore,
    settings: Settings,
    /// Last status reported per timer key.
    known_status: LruCache<String, String>,
    dirty: Dirty,
}

/// Outcome of a periodic sync.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Stale timers dropped.
    pub swept: usize,
    /// Whether anything had to be written.
    pub wrote: bool,
}

pub struct TrackerService {
    state: Mutex<TrackerState>,
    kv: Arc<dyn KvStore>,
    broadcaster: TimerBroadcaster,
}

impl std::fmt::Debug for TrackerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerService")
            .field("kv", &"<KvStore>")
            .field("broadcaster", &self.broadcaster)
            .finish_non_exhaustive()
    }
}

impl TrackerService {
    /// Loads persisted state and restores running timers.
    ///
    /// Timers older than 24 hours are dropped without a log. Unreadable
    /// settings fall back to defaults; unreadable timers and logs are
    /// skipped one entry at a time.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if the backend cannot be read at all.
    pub async fn load(kv: Arc<dyn KvStore>, broadcaster: TimerBroadcaster, now: DateTime<Utc>) -> Result<Self, KvError> {
        let reader = Arc::clone(&kv);
        let (settings, logs, timers) = run_blocking(move || {
            Ok((
                reader.get(SETTINGS_KEY)?,
                reader.get(TIME_LOGS_KEY)?,
                reader.get(ACTIVE_TIMERS_KEY)?,
            ))
        })
        .await?;

        let settings: Settings = decode_or_default(settings, SETTINGS_KEY);
        let logs: Vec<TimeLog> = decode_each(logs, TIME_LOGS_KEY);
        let timers: Vec<Timer> = decode_each(timers, ACTIVE_TIMERS_KEY);

        let mut store = TimerStore::new();
        store.merge_logs(logs);
        let dropped = store.restore(timers, now);

        info!(
            active_timers = store.timers().len(),
            time_logs = store.logs().len(),
            dropped_stale = dropped.len(),
            "Tracker state loaded"
        );

        Ok(Self {
            state: Mutex::new(TrackerState {
                store,
                settings,
                known_status: LruCache::new(
                    NonZeroUsize::new(KNOWN_STATUS_CAPACITY).unwrap_or(NonZeroUsize::MIN),
                ),
                dirty: Dirty {
                    timers: !dropped.is_empty(),
                    ..Dirty::default()
                },
            }),
            kv,
            broadcaster,
        })
    }

    /// Handles one message at the current time.
    pub async fn handle(&self, request: Request) -> Response {
        self.handle_at(request, Utc::now()).await
    }

    /// Handles one message as if received at `now`.
    pub async fn handle_at(&self, request: Request, now: DateTime<Utc>) -> Response {
        let mut state = self.state.lock().await;
        let kind = request.kind();
        let key = request.timer_key();
        let meta = request.task_meta();

        let response = match request {
            Request::StatusChanged {
                new_status, old_status, ..
            } => {
                if let Some(meta) = meta {
                    self.status_changed(&mut state, meta, old_status, new_status, now);
                }
                Response::ok()
            }
            Request::TaskInitialized { status, .. } => {
                if let Some(key) = key {
                    debug!(key = %key, status = %status, "Baseline recorded");
                    state.known_status.put(key, status);
                }
                Response::ok()
            }
            Request::GetActiveTimers => Response::ActiveTimers(state.store.active_timers(now)),
            Request::GetTimeSummary => {
                Response::Summary(Box::new(state.store.summarize(&now.with_timezone(&Local))))
            }
            Request::StopTimer { task_id, .. } => {
                let key = key.unwrap_or_else(|| task_id.clone());
                match state.store.stop_by_key(&key, &task_id, now) {
                    Some(log) => {
                        state.dirty.timers = true;
                        state.dirty.logs = true;
                        self.notify(&state, TimerNotification::stopped(&key, &log));
                    }
                    None => debug!(key = %key, "No timer to stop"),
                }
                Response::ok()
            }
            Request::ClearAllTimers => {
                let logs = state.store.clear_all(now);
                if !logs.is_empty() {
                    info!(count = logs.len(), "All timers cleared");
                    state.dirty.timers = true;
                    state.dirty.logs = true;
                    self.notify(&state, TimerNotification::TimersCleared { count: logs.len() });
                }
                Response::ok()
            }
            Request::UpdateSettings { settings } => {
                info!(
                    backlog = ?settings.tracking_statuses.backlog.start,
                    github = ?settings.tracking_statuses.github.start,
                    notifications = settings.notifications,
                    "Settings updated"
                );
                state.settings = settings;
                state.dirty.settings = true;
                Response::ok()
            }
            Request::GetSettings => Response::Settings {
                success: true,
                settings: state.settings.clone(),
            },
        };

        if let Err(e) = self.flush(&mut state).await {
            warn!(error = %e, kind, "Persisting state failed, will retry on next sync");
        }
        response
    }

    /// Drops stale timers and writes any unsaved state.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if writing fails; the state stays dirty.
    pub async fn sync(&self) -> Result<SyncReport, KvError> {
        self.sync_at(Utc::now()).await
    }

    /// [`TrackerService::sync`] as if run at `now`.
    ///
    /// # Errors
    ///
    /// Returns `KvError` if writing fails; the state stays dirty.
    pub async fn sync_at(&self, now: DateTime<Utc>) -> Result<SyncReport, KvError> {
        let mut state = self.state.lock().await;
        let swept = state.store.sweep_stale(now).len();
        if swept > 0 {
            state.dirty.timers = true;
        }
        let wrote = state.dirty.any();
        self.flush(&mut state).await?;
        Ok(SyncReport { swept, wrote })
    }

    /// Summary as seen at `now`, in `now`'s time zone.
    pub async fn summary_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> TimeSummary {
        self.state.lock().await.store.summarize(now)
    }

    pub async fn active_timer_count(&self) -> usize {
        self.state.lock().await.store.timers().len()
    }

    /// All completed sessions known in memory.
    pub async fn time_logs(&self) -> Vec<TimeLog> {
        self.state.lock().await.store.logs().to_vec()
    }

    /// True while some change has not been written yet.
    pub async fn has_unsaved_changes(&self) -> bool {
        self.state.lock().await.dirty.any()
    }

    fn status_changed(
        &self,
        state: &mut TrackerState,
        meta: TaskMeta,
        old_status: Option<String>,
        new_status: String,
        now: DateTime<Utc>,
    ) {
        let key = meta.key();
        let old = old_status
            .filter(|status| !status.is_empty())
            .or_else(|| state.known_status.get(&key).cloned());

        let start_statuses = state.settings.start_statuses(meta.service);
        let decision = match old.as_deref() {
            Some(old) => classify(Some(old), &new_status, start_statuses),
            None => Decision::from_membership(state.store.is_running(&key), is_start(&new_status, start_statuses)),
        };

        debug!(
            key = %key,
            old_status = ?old,
            new_status = %new_status,
            decision = ?decision,
            "Status change classified"
        );
        state.known_status.put(key.clone(), new_status);

        if !decision.mutates_timer() {
            return;
        }

        if decision == Decision::Start {
            if let StartOutcome::Started(timer) = state.store.start(meta, now) {
                state.dirty.timers = true;
                self.notify(state, TimerNotification::started(&timer));
            }
        } else if let Some(log) = state.store.stop(&key, now, StopReason::StatusChange) {
            state.dirty.timers = true;
            state.dirty.logs = true;
            self.notify(state, TimerNotification::stopped(&key, &log));
        }
    }

    fn notify(&self, state: &TrackerState, notification: TimerNotification) {
        if state.settings.notifications {
            self.broadcaster.broadcast(notification);
        }
    }

    /// Writes dirty keys; `timeLogs` is read-modify-write.
    ///
    /// If the durable `timeLogs` value is not an array it is left alone and
    /// the logs stay dirty.
    async fn flush(&self, state: &mut TrackerState) -> Result<(), KvError> {
        let dirty = state.dirty;
        if !dirty.any() {
            return Ok(());
        }

        let settings = dirty.settings.then(|| serde_json::to_value(&state.settings)).transpose()?;
        let timers = dirty.timers.then(|| serde_json::to_value(state.store.timers())).transpose()?;
        let logs = dirty.logs.then(|| state.store.logs().to_vec());

        let kv = Arc::clone(&self.kv);
        let merged = run_blocking(move || {
            let mut entries = Vec::new();
            let mut merged = None;

            if let Some(logs) = logs {
                match merge_by_id(kv.get(TIME_LOGS_KEY)?, logs)? {
                    Some(merge) => {
                        entries.push((TIME_LOGS_KEY.to_string(), merge.value));
                        merged = Some(merge.logs);
                    }
                    None => warn!(key = TIME_LOGS_KEY, "Durable time logs are not an array, leaving them untouched"),
                }
            }
            if let Some(timers) = timers {
                entries.push((ACTIVE_TIMERS_KEY.to_string(), timers));
            }
            if let Some(settings) = settings {
                entries.push((SETTINGS_KEY.to_string(), settings));
            }

            if !entries.is_empty() {
                kv.set_many(entries)?;
            }
            Ok(merged)
        })
        .await?;

        let logs_written = merged.is_some();
        if let Some(merged) = merged {
            let added = state.store.merge_logs(merged);
            if added > 0 {
                debug!(added, "Merged time logs written elsewhere");
            }
        }
        state.dirty = Dirty {
            logs: dirty.logs && !logs_written,
            ..Dirty::default()
        };
        Ok(())
    }
}

/// `timeLogs` ready to be written, and the logs it holds.
#[derive(Debug)]
struct LogMerge {
    value: Value,
    logs: Vec<TimeLog>,
}

/// Durable entries first, in order and verbatim, then ours not yet written.
///
/// Returns `None` if the durable value exists but is not an array.
fn merge_by_id(durable: Option<Value>, ours: Vec<TimeLog>) -> Result<Option<LogMerge>, KvError> {
    let mut entries = match durable {
        None => Vec::new(),
        Some(Value::Array(entries)) => entries,
        Some(_) => return Ok(None),
    };

    let mut known = HashSet::new();
    let mut logs = Vec::with_capacity(entries.len());
    for entry in &entries {
        if let Some(id) = entry.get("id").and_then(Value::as_str) {
            known.insert(id.to_string());
        }
        match TimeLog::deserialize(entry) {
            Ok(log) => logs.push(log),
            Err(e) => debug!(key = TIME_LOGS_KEY, error = %e, "Keeping unreadable time log as is"),
        }
    }

    for log in ours {
        if known.insert(log.id.clone()) {
            entries.push(serde_json::to_value(&log)?);
            logs.push(log);
        }
    }

    Ok(Some(LogMerge {
        value: Value::Array(entries),
        logs,
    }))
}

/// Decodes an array, or the values of an object, entry by entry.
fn decode_each<T: DeserializeOwned>(value: Option<Value>, key: &str) -> Vec<T> {
    let entries = match value {
        None => return Vec::new(),
        Some(Value::Array(entries)) => entries,
        Some(Value::Object(map)) => map.into_iter().map(|(_, entry)| entry).collect(),
        Some(_) => {
            warn!(key, "Unreadable persisted value, using default");
            return Vec::new();
        }
    };
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key, error = %e, "Skipping unreadable persisted entry");
                None
            }
        })
        .collect()
}

fn decode_or_default<T: DeserializeOwned + Default>(value: Option<Value>, key: &str) -> T {
    match value {
        None => T::default(),
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!(key, error = %e, "Unreadable persisted value, using default");
            T::default()
        }),
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, KvError>
where
    F: FnOnce() -> Result<T, KvError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KvError::Unavailable(format!("storage task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    use crate::persistence::MemoryKvStore;
    use crate::types::Service;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 13, 9, 0, 0).unwrap()
    }

    fn changed(old: Option<&str>, new: &str) -> Request {
        Request::StatusChanged {
            task_id: "acme_TEST-4".to_string(),
            new_status: new.to_string(),
            old_status: old.map(str::to_string),
            service: Service::Backlog,
            task_title: "Fix login".to_string(),
            project_name: "TEST".to_string(),
            issue_key: Some("TEST-4".to_string()),
            space_or_org: Some("acme".to_string()),
            tab_id: Some(3),
        }
    }

    fn initialized(status: &str) -> Request {
        Request::TaskInitialized {
            task_id: "acme_TEST-4".to_string(),
            status: status.to_string(),
            service: Service::Backlog,
            task_title: "Fix login".to_string(),
            project_name: "TEST".to_string(),
            issue_key: Some("TEST-4".to_string()),
            space_or_org: Some("acme".to_string()),
        }
    }

    async fn tracker() -> (TrackerService, Arc<MemoryKvStore>, TimerBroadcaster) {
        let kv = Arc::new(MemoryKvStore::new());
        let broadcaster = TimerBroadcaster::new();
        let tracker = TrackerService::load(kv.clone(), broadcaster.clone(), t0()).await.unwrap();
        (tracker, kv, broadcaster)
    }

    #[tokio::test]
    async fn baseline_fills_missing_old_status() {
        let (tracker, _kv, _) = tracker().await;
        tracker.handle_at(initialized("処理中"), t0()).await;

        // Known to be in progress already: moving within is not a start.
        tracker.handle_at(changed(None, "処理中"), t0()).await;
        assert_eq!(tracker.active_timer_count().await, 0);

        tracker.handle_at(changed(None, "未対応"), t0()).await;
        tracker.handle_at(changed(None, "処理中"), t0()).await;
        assert_eq!(tracker.active_timer_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_old_status_with_running_timer_continues() {
        let (tracker, _kv, _) = tracker().await;
        tracker.handle_at(changed(Some("未対応"), "処理中"), t0()).await;

        let later = t0() + Duration::minutes(5);
        let fresh = TrackerService::load(tracker.kv.clone(), TimerBroadcaster::new(), later)
            .await
            .unwrap();
        fresh.handle_at(changed(None, "処理中"), later).await;

        let timers = match fresh.handle_at(Request::GetActiveTimers, later).await {
            Response::ActiveTimers(timers) => timers,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].duration, 5 * 60_000);
    }

    #[tokio::test]
    async fn unknown_old_status_with_running_timer_stops_when_leaving() {
        let (tracker, _kv, _) = tracker().await;
        tracker.handle_at(changed(Some("未対応"), "処理中"), t0()).await;

        let fresh = TrackerService::load(tracker.kv.clone(), TimerBroadcaster::new(), t0())
            .await
            .unwrap();
        fresh.handle_at(changed(None, "完了"), t0() + Duration::minutes(1)).await;
        assert_eq!(fresh.active_timer_count().await, 0);
        assert_eq!(fresh.time_logs().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_old_status_is_treated_as_missing() {
        let (tracker, _kv, _) = tracker().await;
        tracker.handle_at(changed(Some(""), "処理中"), t0()).await;
        assert_eq!(tracker.active_timer_count().await, 1);
    }

    #[tokio::test]
    async fn write_failure_keeps_state_and_retries_on_sync() {
        let (tracker, kv, _) = tracker().await;
        kv.set_fail_writes(true);

        let response = tracker.handle_at(changed(Some("未対応"), "処理中"), t0()).await;
        assert_eq!(response, Response::ok());
        assert_eq!(tracker.active_timer_count().await, 1);
        assert!(tracker.has_unsaved_changes().await);
        assert!(tracker.sync_at(t0()).await.is_err());

        kv.set_fail_writes(false);
        let report = tracker.sync_at(t0()).await.unwrap();
        assert!(report.wrote);
        assert!(!tracker.has_unsaved_changes().await);
        let persisted = kv.get(ACTIVE_TIMERS_KEY).unwrap().unwrap();
        assert!(persisted.get("acme_TEST-4").is_some());
    }

    #[tokio::test]
    async fn logs_written_elsewhere_are_merged_not_clobbered() {
        let (tracker, kv, _) = tracker().await;
        let foreign = json!([{
            "id": "other_1",
            "taskId": "other",
            "service": "github",
            "taskTitle": "Other",
            "startTime": 1_000,
            "endTime": 2_000,
            "duration": 1_000,
            "date": "1970-01-01"
        }]);
        kv.set(TIME_LOGS_KEY, foreign).unwrap();

        tracker.handle_at(changed(Some("未対応"), "処理中"), t0()).await;
        tracker.handle_at(changed(Some("処理中"), "完了"), t0() + Duration::minutes(1)).await;

        let persisted: Vec<TimeLog> = serde_json::from_value(kv.get(TIME_LOGS_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].id, "other_1");
        assert_eq!(tracker.time_logs().await.len(), 2);
    }

    fn log_entry(id: &str, duration: Value) -> Value {
        json!({
            "id": id,
            "taskId": "other",
            "service": "github",
            "taskTitle": "Other",
            "startTime": 1_000,
            "endTime": 61_000,
            "duration": duration,
            "date": "1970-01-01"
        })
    }

    #[tokio::test]
    async fn unreadable_log_entry_does_not_erase_history() {
        let kv = Arc::new(MemoryKvStore::new());
        let bad = log_entry("b_1", json!(60_000.5));
        kv.set(TIME_LOGS_KEY, json!([log_entry("a_1", json!(60_000)), bad.clone()]))
            .unwrap();

        let tracker = TrackerService::load(kv.clone(), TimerBroadcaster::new(), t0()).await.unwrap();
        assert_eq!(tracker.time_logs().await.len(), 1);

        tracker.handle_at(changed(Some("未対応"), "処理中"), t0()).await;
        tracker.handle_at(changed(Some("処理中"), "完了"), t0() + Duration::minutes(1)).await;

        let persisted = kv.get(TIME_LOGS_KEY).unwrap().unwrap();
        let entries = persisted.as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0]["id"], "a_1");
        assert_eq!(entries[1], bad);
        assert!(entries[2]["id"].as_str().unwrap().starts_with("acme_TEST-4_"));
        assert_eq!(tracker.time_logs().await.len(), 2);
    }

    #[tokio::test]
    async fn non_array_time_logs_are_never_overwritten() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(TIME_LOGS_KEY, json!({"broken": true})).unwrap();
        let tracker = TrackerService::load(kv.clone(), TimerBroadcaster::new(), t0()).await.unwrap();

        tracker.handle_at(changed(Some("未対応"), "処理中"), t0()).await;
        tracker.handle_at(changed(Some("処理中"), "完了"), t0() + Duration::minutes(1)).await;

        assert_eq!(kv.get(TIME_LOGS_KEY).unwrap(), Some(json!({"broken": true})));
        assert_eq!(kv.get(ACTIVE_TIMERS_KEY).unwrap(), Some(json!({})));
        assert_eq!(tracker.time_logs().await.len(), 1);
        assert!(tracker.has_unsaved_changes().await);
    }

    #[tokio::test]
    async fn unreadable_timer_entry_does_not_drop_the_others() {
        let (tracker, kv, _) = tracker().await;
        tracker.handle_at(changed(Some("未対応"), "処理中"), t0()).await;

        let mut timers = kv.get(ACTIVE_TIMERS_KEY).unwrap().unwrap();
        let mut broken = timers["acme_TEST-4"].clone();
        broken["key"] = json!("acme_TEST-5");
        broken["startTime"] = json!("2024-03-13T09:00:00Z");
        timers["acme_TEST-5"] = broken;
        kv.set(ACTIVE_TIMERS_KEY, timers).unwrap();

        let restarted = TrackerService::load(kv, TimerBroadcaster::new(), t0()).await.unwrap();
        assert_eq!(restarted.active_timer_count().await, 1);
        assert!(restarted.state.lock().await.store.is_running("acme_TEST-4"));
    }

    #[tokio::test]
    async fn baselines_are_bounded() {
        let (tracker, _kv, _) = tracker().await;
        for i in 0..=KNOWN_STATUS_CAPACITY {
            let request = Request::TaskInitialized {
                task_id: format!("acme_TEST-{i}"),
                status: "未対応".to_string(),
                service: Service::Backlog,
                task_title: format!("Task {i}"),
                project_name: "TEST".to_string(),
                issue_key: Some(format!("TEST-{i}")),
                space_or_org: Some("acme".to_string()),
            };
            tracker.handle_at(request, t0()).await;
        }

        let state = tracker.state.lock().await;
        assert_eq!(state.known_status.len(), KNOWN_STATUS_CAPACITY);
        assert!(!state.known_status.contains("acme_TEST-0"));
        assert!(state.known_status.contains(&format!("acme_TEST-{KNOWN_STATUS_CAPACITY}")));
    }

    #[tokio::test]
    async fn sync_sweeps_aged_out_timers() {
        let (tracker, kv, _) = tracker().await;
        tracker.handle_at(changed(Some("未対応"), "処理中"), t0()).await;

        let report = tracker.sync_at(t0() + Duration::hours(25)).await.unwrap();
        assert_eq!(report, SyncReport { swept: 1, wrote: true });
        assert_eq!(tracker.active_timer_count().await, 0);
        assert!(tracker.time_logs().await.is_empty());
        assert_eq!(kv.get(ACTIVE_TIMERS_KEY).unwrap(), Some(json!({})));

        let idle = tracker.sync_at(t0() + Duration::hours(26)).await.unwrap();
        assert_eq!(idle, SyncReport::default());
    }

    #[tokio::test]
    async fn notifications_follow_settings() {
        let (tracker, _kv, broadcaster) = tracker().await;
        let mut rx = broadcaster.subscribe();

        tracker.handle_at(changed(Some("未対応"), "処理中"), t0()).await;
        assert!(matches!(rx.try_recv(), Ok(TimerNotification::TimerStarted { tab_id: Some(3), .. })));

        let mut settings = Settings::default();
        settings.notifications = false;
        tracker.handle_at(Request::UpdateSettings { settings }, t0()).await;
        tracker.handle_at(changed(Some("処理中"), "完了"), t0() + Duration::minutes(1)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.time_logs().await.len(), 1);
    }

    #[tokio::test]
    async fn settings_round_trip_through_storage() {
        let (tracker, kv, _) = tracker().await;
        let mut settings = Settings::default();
        settings.tracking_statuses.github.start = vec!["Doing".to_string()];
        tracker.handle_at(Request::UpdateSettings { settings: settings.clone() }, t0()).await;

        let reloaded = TrackerService::load(kv, TimerBroadcaster::new(), t0()).await.unwrap();
        assert_eq!(
            reloaded.handle_at(Request::GetSettings, t0()).await,
            Response::Settings { success: true, settings }
        );
    }

    #[tokio::test]
    async fn corrupt_persisted_values_fall_back_to_defaults() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(SETTINGS_KEY, json!("garbage")).unwrap();
        kv.set(ACTIVE_TIMERS_KEY, json!([1, 2])).unwrap();

        let tracker = TrackerService::load(kv, TimerBroadcaster::new(), t0()).await.unwrap();
        assert_eq!(tracker.active_timer_count().await, 0);
        assert_eq!(
            tracker.handle_at(Request::GetSettings, t0()).await,
            Response::Settings {
                success: true,
                settings: Settings::default()
            }
        );
    }
}
