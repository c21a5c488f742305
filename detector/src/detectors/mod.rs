//! Change detectors.
//!
//! Three independent strategies watch the board and produce tentative
//! status transitions:
//!
//! - [`mutation`]: structural and attribute mutations of the page
//! - [`pointer`]: drag gestures, rechecked after the page settles
//! - [`network`]: intercepted responses of the board's own update API
//!
//! All of them share one [`StatusLedger`] holding the last known status per
//! task key, so the first detector to see a transition records it and the
//! others see no difference afterwards. Their output is a [`Detection`]:
//! either a baseline for a card seen for the first time, or an
//! [`Observation`] for the deduplicator.

pub mod mutation;
pub mod network;
pub mod pointer;

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::dom::{Document, NodeId};
use crate::identity::{fields_from_card, resolve, TaskIdentity};
use crate::selectors::ServiceProfile;
use crate::status::extract_status_from_dom;
use crate::types::{OutboundMessage, Service};

pub use mutation::MutationDetector;
pub use network::{NetworkDetector, NetworkExchange};
pub use pointer::{PointerDetector, RecheckOutcome, RECHECK_DELAYS_MS};

/// Default number of task keys kept in the ledger.
pub const DEFAULT_LEDGER_CAPACITY: usize = 2000;

/// Which detector produced an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    DomMutation,
    Pointer,
    Network,
}

impl std::fmt::Display for ObservationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DomMutation => "dom_mutation",
            Self::Pointer => "pointer",
            Self::Network => "network",
        };
        f.write_str(name)
    }
}

/// A single detector's report of a status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub task_id: String,
    /// `None` when the detector never saw the task before.
    pub old_status: Option<String>,
    pub new_status: String,
    pub title: String,
    pub project_name: String,
    pub issue_key: Option<String>,
    pub space_or_org: Option<String>,
    pub service: Service,
    pub detected_at: DateTime<Utc>,
    pub source: ObservationSource,
}

impl Observation {
    /// Returns true if the transition does not change the status.
    #[must_use]
    pub fn is_no_op(&self) -> bool {
        self.old_status.as_deref() == Some(self.new_status.as_str())
    }

    #[must_use]
    pub fn into_message(self) -> OutboundMessage {
        OutboundMessage::StatusChanged {
            task_id: self.task_id,
            new_status: self.new_status,
            old_status: self.old_status,
            service: self.service,
            task_title: self.title,
            project_name: self.project_name,
            issue_key: self.issue_key,
            space_or_org: self.space_or_org,
        }
    }
}

/// Identity and current status of one task as seen right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub identity: TaskIdentity,
    pub status: String,
    pub title: String,
    pub project_name: String,
}

impl TaskSnapshot {
    #[must_use]
    pub fn key(&self) -> &str {
        self.identity.key()
    }

    /// Builds the observation of a transition into this snapshot's status.
    #[must_use]
    pub fn observation(&self, old_status: Option<String>, source: ObservationSource) -> Observation {
        Observation {
            task_id: self.key().to_string(),
            old_status,
            new_status: self.status.clone(),
            title: self.title.clone(),
            project_name: self.project_name.clone(),
            issue_key: self.identity.issue_key.clone(),
            space_or_org: self.identity.space_or_org.clone(),
            service: self.identity.service,
            detected_at: Utc::now(),
            source,
        }
    }

    #[must_use]
    pub fn initialized_message(&self) -> OutboundMessage {
        OutboundMessage::TaskInitialized {
            task_id: self.key().to_string(),
            status: self.status.clone(),
            service: self.identity.service,
            task_title: self.title.clone(),
            project_name: self.project_name.clone(),
            issue_key: self.identity.issue_key.clone(),
            space_or_org: self.identity.space_or_org.clone(),
        }
    }
}

/// Output of a detector check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// First sighting of a task; its status becomes the baseline.
    Initialized(TaskSnapshot),
    /// A status differing from the last known one.
    Changed(Observation),
}

/// Result of recording a status in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerUpdate {
    First,
    Unchanged,
    Changed { old: String },
}

/// Last known status per task key, bounded by LRU eviction.
#[derive(Debug)]
pub struct StatusLedger {
    entries: LruCache<String, String>,
}

impl StatusLedger {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Records `status` for `key`, returning how it relates to the previous
    /// entry. The ledger is updated in every case.
    pub fn observe(&mut self, key: &str, status: &str) -> LedgerUpdate {
        match self.entries.put(key.to_string(), status.to_string()) {
            None => LedgerUpdate::First,
            Some(old) if old == status => LedgerUpdate::Unchanged,
            Some(old) => LedgerUpdate::Changed { old },
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.peek(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StatusLedger {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_LEDGER_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

/// Reads identity and status of a card.
///
/// Returns `None` when either cannot be determined, or when the only
/// identity available would be a generated one.
#[must_use]
pub fn inspect_card(doc: &Document, card: NodeId, profile: &ServiceProfile) -> Option<TaskSnapshot> {
    let fields = fields_from_card(doc, card, profile);
    if !fields.has_stable_signal() {
        return None;
    }
    let status = extract_status_from_dom(doc, card, profile)?;
    let identity = resolve(&fields);
    let title = fields
        .title
        .clone()
        .or_else(|| identity.issue_key.clone())
        .unwrap_or_default();
    Some(TaskSnapshot {
        identity,
        status,
        title,
        project_name: fields.project_name.unwrap_or_default(),
    })
}

/// Applies a snapshot to the ledger and turns the result into a detection.
pub(crate) fn track(
    ledger: &mut StatusLedger,
    snapshot: TaskSnapshot,
    source: ObservationSource,
) -> Option<Detection> {
    match ledger.observe(snapshot.key(), &snapshot.status) {
        LedgerUpdate::First => Some(Detection::Initialized(snapshot)),
        LedgerUpdate::Unchanged => None,
        LedgerUpdate::Changed { old } => Some(Detection::Changed(snapshot.observation(Some(old), source))),
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::board;
    use super::*;

    #[test]
    fn ledger_reports_first_unchanged_and_changed() {
        let mut ledger = StatusLedger::default();
        assert_eq!(ledger.observe("a", "未対応"), LedgerUpdate::First);
        assert_eq!(ledger.observe("a", "未対応"), LedgerUpdate::Unchanged);
        assert_eq!(
            ledger.observe("a", "処理中"),
            LedgerUpdate::Changed {
                old: "未対応".to_string()
            }
        );
        assert_eq!(ledger.get("a"), Some("処理中"));
    }

    #[test]
    fn ledger_evicts_least_recently_used() {
        let mut ledger = StatusLedger::new(NonZeroUsize::new(2).unwrap());
        ledger.observe("a", "x");
        ledger.observe("b", "x");
        ledger.observe("c", "x");
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get("a"), None);
    }

    #[test]
    fn inspect_card_reads_identity_and_status() {
        let doc = board();
        let snapshot = inspect_card(&doc, NodeId(100), &ServiceProfile::backlog()).unwrap();
        assert_eq!(snapshot.key(), "acme_TEST-4");
        assert_eq!(snapshot.status, "未対応");
        assert_eq!(snapshot.title, "Fix login");
        assert_eq!(snapshot.project_name, "TEST");
    }

    #[test]
    fn first_sighting_is_a_baseline() {
        let doc = board();
        let mut ledger = StatusLedger::default();
        let snapshot = inspect_card(&doc, NodeId(100), &ServiceProfile::backlog()).unwrap();

        let detection = track(&mut ledger, snapshot.clone(), ObservationSource::DomMutation);
        assert!(matches!(detection, Some(Detection::Initialized(_))));
        assert_eq!(track(&mut ledger, snapshot, ObservationSource::DomMutation), None);
    }

    #[test]
    fn observation_becomes_status_changed_message() {
        let doc = board();
        let snapshot = inspect_card(&doc, NodeId(100), &ServiceProfile::backlog()).unwrap();
        let message = snapshot
            .observation(Some("処理中".to_string()), ObservationSource::Network)
            .into_message();
        match message {
            OutboundMessage::StatusChanged {
                task_id,
                old_status,
                new_status,
                ..
            } => {
                assert_eq!(task_id, "acme_TEST-4");
                assert_eq!(old_status.as_deref(), Some("処理中"));
                assert_eq!(new_status, "未対応");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
}
