//! Network response detector.
//!
//! The browser shim forwards every completed request of the page as a
//! [`NetworkExchange`]; this is the single interception point. Exchanges
//! that hit the board's API are decoded and searched recursively for
//! issue-like objects carrying a status, which is the service's own source
//! of truth.
//!
//! Only mutating requests report changes for tasks seen for the first time.
//! A read-only listing merely records baselines, like the initial DOM scan.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use super::{Detection, LedgerUpdate, ObservationSource, StatusLedger, TaskSnapshot};
use crate::identity::{fields_from_payload, resolve};
use crate::selectors::ServiceProfile;
use crate::status::extract_status_from_payload;

/// Nesting depth at which the payload search gives up.
const MAX_DEPTH: usize = 32;

const MUTATING_METHODS: &[&str] = &["POST", "PUT", "PATCH"];

/// A completed request observed on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkExchange {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub request_body: Option<String>,
    pub status: u16,
    #[serde(default)]
    pub response_body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone)]
pub struct NetworkDetector {
    profile: ServiceProfile,
}

impl NetworkDetector {
    #[must_use]
    pub fn new(profile: ServiceProfile) -> Self {
        Self { profile }
    }

    /// Returns true if the exchange is a successful call to the board's API.
    ///
    /// GraphQL calls only match with a mutation signature in the request.
    #[must_use]
    pub fn matches(&self, exchange: &NetworkExchange) -> bool {
        if !(200..300).contains(&exchange.status) {
            return false;
        }
        if self
            .profile
            .api_url_patterns
            .iter()
            .any(|pattern| exchange.url.contains(pattern))
        {
            return true;
        }
        let Some(graphql) = self.profile.graphql_url_pattern else {
            return false;
        };
        exchange.url.contains(graphql)
            && exchange.request_body.as_deref().is_some_and(|body| {
                self.profile
                    .graphql_signatures
                    .iter()
                    .any(|signature| body.contains(signature))
            })
    }

    /// Returns true if the request can have changed a task.
    #[must_use]
    pub fn is_mutation(exchange: &NetworkExchange) -> bool {
        MUTATING_METHODS
            .iter()
            .any(|method| exchange.method.eq_ignore_ascii_case(method))
    }

    /// Extracts status updates from a matching exchange.
    ///
    /// Non-matching exchanges and undecodable bodies yield nothing. Tasks
    /// first seen in a read-only response become baselines.
    pub fn process(
        &self,
        exchange: &NetworkExchange,
        page_url: Option<&str>,
        ledger: &mut StatusLedger,
    ) -> Vec<Detection> {
        if !self.matches(exchange) {
            return Vec::new();
        }
        let Some(body) = exchange.response_body.as_deref() else {
            return Vec::new();
        };
        let payload: Value = match serde_json::from_str(body) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(url = %exchange.url, error = %e, "Undecodable board API response");
                return Vec::new();
            }
        };

        let page_url = page_url.unwrap_or(&exchange.url);
        let mut snapshots = Vec::new();
        self.collect(&payload, page_url, 0, &mut snapshots);
        let mutation = Self::is_mutation(exchange);
        trace!(url = %exchange.url, mutation, updates = snapshots.len(), "Board API response");

        let mut seen = HashSet::new();
        snapshots
            .into_iter()
            .filter(|snapshot| seen.insert(snapshot.key().to_string()))
            .filter_map(|snapshot| match ledger.observe(snapshot.key(), &snapshot.status) {
                LedgerUpdate::Unchanged => None,
                LedgerUpdate::First if mutation => {
                    Some(Detection::Changed(snapshot.observation(None, ObservationSource::Network)))
                }
                LedgerUpdate::First => Some(Detection::Initialized(snapshot)),
                LedgerUpdate::Changed { old } => Some(Detection::Changed(
                    snapshot.observation(Some(old), ObservationSource::Network),
                )),
            })
            .collect()
    }

    fn collect(&self, value: &Value, page_url: &str, depth: usize, out: &mut Vec<TaskSnapshot>) {
        if depth > MAX_DEPTH {
            return;
        }
        match value {
            Value::Object(obj) => {
                if let Some(snapshot) = self.snapshot_of(value, page_url) {
                    out.push(snapshot);
                }
                for child in obj.values() {
                    self.collect(child, page_url, depth + 1, out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.collect(item, page_url, depth + 1, out);
                }
            }
            _ => {}
        }
    }

    fn snapshot_of(&self, value: &Value, page_url: &str) -> Option<TaskSnapshot> {
        let status = extract_status_from_payload(value, &self.profile)?;
        let fields = fields_from_payload(value.as_object()?, self.profile.service, page_url);
        if fields.issue_key.is_none() && fields.title.is_none() {
            return None;
        }
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = "https://acme.backlog.com/board/TEST";

    fn exchange(url: &str, body: Value) -> NetworkExchange {
        NetworkExchange {
            url: url.to_string(),
            method: "PATCH".to_string(),
            request_body: None,
            status: 200,
            response_body: Some(body.to_string()),
        }
    }

    #[test]
    fn backlog_issue_update_is_detected() {
        let detector = NetworkDetector::new(ServiceProfile::backlog());
        let mut ledger = StatusLedger::default();
        ledger.observe("acme_TEST-4", "未対応");

        let response = json!({
            "id": 1001,
            "issueKey": "TEST-4",
            "summary": "Fix login",
            "status": {"id": 2, "name": "処理中"}
        });
        let detections = detector.process(
            &exchange("https://acme.backlog.com/api/v2/issues/TEST-4", response),
            Some(PAGE),
            &mut ledger,
        );

        assert_eq!(detections.len(), 1);
        let Detection::Changed(obs) = &detections[0] else {
            panic!("expected change");
        };
        assert_eq!(obs.task_id, "acme_TEST-4");
        assert_eq!(obs.old_status.as_deref(), Some("未対応"));
        assert_eq!(obs.new_status, "処理中");
        assert_eq!(obs.title, "Fix login");
        assert_eq!(obs.source, ObservationSource::Network);
    }

    #[test]
    fn nested_kanban_payload_is_searched() {
        let detector = NetworkDetector::new(ServiceProfile::backlog());
        let mut ledger = StatusLedger::default();
        let response = json!({
            "data": {
                "cards": [
                    {"issue": {"issueKey": "TEST-4", "summary": "Fix login", "status": {"name": "完了"}}}
                ]
            }
        });
        let detections = detector.process(
            &exchange("https://acme.backlog.com/board-api/kanban/move", response),
            Some(PAGE),
            &mut ledger,
        );

        assert_eq!(detections.len(), 1);
        let Detection::Changed(obs) = &detections[0] else {
            panic!("expected change");
        };
        assert_eq!(obs.old_status, None);
        assert_eq!(obs.new_status, "完了");
    }

    #[test]
    fn read_only_listing_records_baselines() {
        let detector = NetworkDetector::new(ServiceProfile::backlog());
        let mut ledger = StatusLedger::default();
        let listing = json!({
            "cards": [{"issue": {"issueKey": "TEST-9", "summary": "Export CSV", "status": {"name": "処理中"}}}]
        });
        let mut get = exchange("https://acme.backlog.com/board-api/kanban/TEST", listing);
        get.method = "GET".to_string();

        let detections = detector.process(&get, Some(PAGE), &mut ledger);
        assert_eq!(detections.len(), 1);
        assert!(matches!(&detections[0], Detection::Initialized(s) if s.key() == "acme_TEST-9"));
        assert_eq!(ledger.get("acme_TEST-9"), Some("処理中"));

        // A later update against that baseline is a real change.
        let update = json!({"issueKey": "TEST-9", "summary": "Export CSV", "status": {"name": "完了"}});
        let detections = detector.process(
            &exchange("https://acme.backlog.com/api/v2/issues/TEST-9", update),
            Some(PAGE),
            &mut ledger,
        );
        let [Detection::Changed(obs)] = detections.as_slice() else {
            panic!("expected one change, got {detections:?}");
        };
        assert_eq!(obs.old_status.as_deref(), Some("処理中"));
        assert_eq!(obs.new_status, "完了");
    }

    #[test]
    fn methods_are_classified_case_insensitively() {
        let mut call = exchange("https://acme.backlog.com/api/v2/issues/TEST-4", json!({}));
        for method in ["patch", "POST", "Put"] {
            call.method = method.to_string();
            assert!(NetworkDetector::is_mutation(&call), "{method}");
        }
        for method in ["GET", "HEAD", "OPTIONS"] {
            call.method = method.to_string();
            assert!(!NetworkDetector::is_mutation(&call), "{method}");
        }
    }

    #[test]
    fn known_status_is_not_reported_again() {
        let detector = NetworkDetector::new(ServiceProfile::backlog());
        let mut ledger = StatusLedger::default();
        ledger.observe("acme_TEST-4", "処理中");
        let response = json!({"issueKey": "TEST-4", "status": {"name": "処理中"}});
        assert!(detector
            .process(
                &exchange("https://acme.backlog.com/api/v2/issues/TEST-4", response),
                Some(PAGE),
                &mut ledger
            )
            .is_empty());
    }

    #[test]
    fn unrelated_and_failed_requests_are_ignored() {
        let detector = NetworkDetector::new(ServiceProfile::backlog());
        let body = json!({"issueKey": "TEST-4", "status": {"name": "処理中"}});

        let other = exchange("https://acme.backlog.com/api/v2/users/myself", body.clone());
        assert!(!detector.matches(&other));

        let mut failed = exchange("https://acme.backlog.com/api/v2/issues/TEST-4", body);
        failed.status = 500;
        assert!(!detector.matches(&failed));
    }

    #[test]
    fn malformed_body_yields_nothing() {
        let detector = NetworkDetector::new(ServiceProfile::backlog());
        let mut bad = exchange("https://acme.backlog.com/api/v2/issues/TEST-4", json!({}));
        bad.response_body = Some("<html>".to_string());
        assert!(detector.process(&bad, Some(PAGE), &mut StatusLedger::default()).is_empty());
    }

    #[test]
    fn github_graphql_mutation_requires_signature() {
        let detector = NetworkDetector::new(ServiceProfile::github());
        let response = json!({
            "data": {
                "updateProjectV2ItemFieldValue": {
                    "projectV2Item": {
                        "content": {"number": 6, "title": "Add export"},
                        "fieldValueByName": {"name": "In Progress"}
                    }
                }
            }
        });
        let mut call = exchange("https://github.com/_graphql", response);
        assert!(!detector.matches(&call));

        call.request_body = Some(r#"{"query":"mutation { updateProjectV2ItemFieldValue(input: {}) { } }"}"#.to_string());
        let detections = detector.process(
            &call,
            Some("https://github.com/orgs/octo/projects/3"),
            &mut StatusLedger::default(),
        );
        assert_eq!(detections.len(), 1);
        let Detection::Changed(obs) = &detections[0] else {
            panic!("expected change");
        };
        assert_eq!(obs.task_id, "octo_#6");
        assert_eq!(obs.new_status, "In Progress");
    }

    #[test]
    fn exchange_deserializes_with_defaults() {
        let exchange: NetworkExchange =
            serde_json::from_str(r#"{"url":"https://x/api/v2/issues/1","status":204}"#).unwrap();
        assert_eq!(exchange.method, "GET");
        assert!(exchange.response_body.is_none());
    }
}
