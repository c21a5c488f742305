//! Task identity resolution.
//!
//! Board cards and API payloads expose only partial, inconsistent signals
//! about which task they represent. This module gathers those signals into
//! [`RawTaskFields`] and resolves them into a stable [`TaskIdentity`].
//!
//! # Resolution order
//!
//! | Signals present | Key |
//! |-----------------|-----|
//! | issue key + space | `{space}_{issueKey}` |
//! | issue key | `{service}-{issueKey}` |
//! | title (+ space) | `{service}-title-{normalizedTitle}[-{space}]` |
//! | numeric id | `{service}-id-{numericId}` |
//! | nothing usable | `{service}-task-{millis}-{random}` |
//!
//! Title keys cannot tell apart two tasks that share a title in the same
//! space. Generated keys are never stable, so detectors drop tasks that
//! resolve to one.
//!
//! # Example
//!
//! ```
//! use kanbantime_detector::identity::{resolve, RawTaskFields};
//! use kanbantime_detector::types::Service;
//!
//! let fields = RawTaskFields {
//!     service: Service::Backlog,
//!     issue_key: Some("TEST-4".to_string()),
//!     space_or_org: Some("myspace".to_string()),
//!     ..RawTaskFields::new(Service::Backlog)
//! };
//! assert_eq!(resolve(&fields).key(), "myspace_TEST-4");
//! ```

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde_json::{Map, Value};

use crate::dom::{Document, NodeId};
use crate::selectors::{ServiceProfile, ISSUE_KEY_ATTRIBUTES, NUMERIC_ID_ATTRIBUTES};
use crate::types::Service;

static BACKLOG_ISSUE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][A-Z0-9_]*-[0-9]+)\b").expect("valid regex"));

static GITHUB_ISSUE_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(?:issues|pull)/([0-9]+)").expect("valid regex"));

static GITHUB_ISSUE_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([0-9]+)\b").expect("valid regex"));

static BACKLOG_SPACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://([A-Za-z0-9-]+)\.backlog\.(?:com|jp)(?:[/?#]|$)").expect("valid regex")
});

static BACKLOG_PROJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/board/([A-Za-z0-9_]+)").expect("valid regex"));

static GITHUB_PROJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"github\.com/(?:(?:orgs|users)/)?([A-Za-z0-9_.-]+)/projects/([0-9]+)")
        .expect("valid regex")
});

static GITHUB_OWNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"github\.com/(?:(?:orgs|users)/)?([A-Za-z0-9_.-]+)").expect("valid regex"));

/// Partial identity signals gathered from a card or payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTaskFields {
    pub service: Service,
    pub issue_key: Option<String>,
    pub numeric_id: Option<String>,
    pub title: Option<String>,
    pub space_or_org: Option<String>,
    pub project_name: Option<String>,
}

impl RawTaskFields {
    /// Empty field set for a service.
    #[must_use]
    pub fn new(service: Service) -> Self {
        Self {
            service,
            issue_key: None,
            numeric_id: None,
            title: None,
            space_or_org: None,
            project_name: None,
        }
    }

    /// Returns true if at least one signal that yields a stable key is present.
    #[must_use]
    pub fn has_stable_signal(&self) -> bool {
        self.issue_key.is_some() || self.numeric_id.is_some() || self.title.is_some()
    }

    /// Fills space and project from the page URL where they are still missing.
    pub fn fill_from_url(&mut self, url: &str) {
        if self.space_or_org.is_none() {
            self.space_or_org = space_from_url(self.service, url);
        }
        if self.project_name.is_none() {
            self.project_name = project_from_url(self.service, url);
        }
    }
}

/// Which signal the key was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    SpaceAndIssue,
    Issue,
    Title,
    NumericId,
    Generated,
}

/// A resolved task identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskIdentity {
    pub service: Service,
    pub space_or_org: Option<String>,
    pub issue_key: Option<String>,
    /// Key body used when no issue key is available.
    pub fallback_id: Option<String>,
    origin: KeyOrigin,
    key: String,
}

impl TaskIdentity {
    /// The resolved task key, also used as the `taskId` on the wire.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn origin(&self) -> KeyOrigin {
        self.origin
    }

    /// Generated keys change on every resolution and cannot be matched later.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.origin == KeyOrigin::Generated
    }
}

/// Resolves raw signals into a task identity.
///
/// Deterministic for every input except the last-resort generated key.
#[must_use]
pub fn resolve(fields: &RawTaskFields) -> TaskIdentity {
    let service = fields.service;
    let space = non_empty(fields.space_or_org.as_deref());
    let issue_key = non_empty(fields.issue_key.as_deref());

    let (origin, key, fallback_id) = if let Some(issue) = issue_key {
        match space {
            Some(space) => (KeyOrigin::SpaceAndIssue, format!("{space}_{issue}"), None),
            None => (KeyOrigin::Issue, format!("{service}-{issue}"), None),
        }
    } else if let Some(title) = fields.title.as_deref().map(normalize_title).filter(|t| !t.is_empty()) {
        let body = match space {
            Some(space) => format!("title-{title}-{space}"),
            None => format!("title-{title}"),
        };
        (KeyOrigin::Title, format!("{service}-{body}"), Some(body))
    } else if let Some(id) = non_empty(fields.numeric_id.as_deref()) {
        let body = format!("id-{id}");
        (KeyOrigin::NumericId, format!("{service}-{body}"), Some(body))
    } else {
        let body = format!(
            "task-{}-{:08x}",
            Utc::now().timestamp_millis(),
            rand::rng().random_range(0..u32::MAX)
        );
        (KeyOrigin::Generated, format!("{service}-{body}"), Some(body))
    };

    TaskIdentity {
        service,
        space_or_org: space.map(str::to_string),
        issue_key: issue_key.map(str::to_string),
        fallback_id,
        origin,
        key,
    }
}

/// Trims and collapses internal whitespace.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Finds the first issue-key-shaped token in free text.
#[must_use]
pub fn issue_key_in_text(service: Service, text: &str) -> Option<String> {
    match service {
        Service::Backlog => BACKLOG_ISSUE_KEY
            .captures(text)
            .map(|caps| caps[1].to_string()),
        Service::Github => GITHUB_ISSUE_TEXT
            .captures(text)
            .map(|caps| format!("#{}", &caps[1])),
    }
}

/// Extracts an issue key from a link target.
#[must_use]
pub fn issue_key_in_href(service: Service, href: &str) -> Option<String> {
    match service {
        Service::Backlog => BACKLOG_ISSUE_KEY
            .captures(href)
            .map(|caps| caps[1].to_string()),
        Service::Github => GITHUB_ISSUE_HREF
            .captures(href)
            .map(|caps| format!("#{}", &caps[1])),
    }
}

/// Backlog space subdomain, or the GitHub owner path segment.
#[must_use]
pub fn space_from_url(service: Service, url: &str) -> Option<String> {
    let caps = match service {
        Service::Backlog => BACKLOG_SPACE.captures(url),
        Service::Github => GITHUB_OWNER.captures(url),
    }?;
    Some(caps[1].to_string())
}

/// Project name encoded in the board URL.
#[must_use]
pub fn project_from_url(service: Service, url: &str) -> Option<String> {
    match service {
        Service::Backlog => BACKLOG_PROJECT
            .captures(url)
            .map(|caps| caps[1].to_string()),
        Service::Github => GITHUB_PROJECT
            .captures(url)
            .map(|caps| format!("{}/projects/{}", &caps[1], &caps[2])),
    }
}

/// Backlog issue keys carry their project key as prefix.
fn project_from_issue_key(service: Service, issue_key: &str) -> Option<String> {
    match service {
        Service::Backlog => issue_key
            .rsplit_once('-')
            .map(|(project, _)| project.to_string()),
        Service::Github => None,
    }
}

/// Gathers identity signals from a card element and its subtree.
#[must_use]
pub fn fields_from_card(doc: &Document, card: NodeId, profile: &ServiceProfile) -> RawTaskFields {
    let service = profile.service;
    let mut fields = RawTaskFields::new(service);
    let Some(el) = doc.get(card) else {
        return fields;
    };

    fields.issue_key = ISSUE_KEY_ATTRIBUTES
        .iter()
        .filter_map(|name| el.attr(name))
        .find_map(|value| issue_key_in_text(service, value).or_else(|| non_empty(Some(value)).map(str::to_string)));

    let subtree: Vec<NodeId> = std::iter::once(card).chain(doc.descendants(card)).collect();

    if fields.issue_key.is_none() {
        fields.issue_key = subtree.iter().filter_map(|id| doc.get(*id)).find_map(|node| {
            node.attr("href")
                .and_then(|href| issue_key_in_href(service, href))
                .or_else(|| issue_key_in_text(service, &node.text))
        });
    }

    fields.numeric_id = NUMERIC_ID_ATTRIBUTES
        .iter()
        .filter_map(|name| el.attr(name))
        .map(str::trim)
        .find(|value| !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string);

    fields.title = subtree
        .iter()
        .skip(1)
        .copied()
        .find(|id| doc.get(*id).is_some_and(|node| profile.is_title(node)))
        .or_else(|| {
            subtree
                .iter()
                .skip(1)
                .copied()
                .find(|id| doc.get(*id).is_some_and(|node| node.is_tag("a")))
        })
        .map(|id| normalize_title(&doc.text_content(id)))
        .filter(|title| !title.is_empty());

    fields.fill_from_url(doc.url());
    if fields.project_name.is_none() {
        fields.project_name = fields
            .issue_key
            .as_deref()
            .and_then(|key| project_from_issue_key(service, key));
    }
    fields
}

/// Gathers identity signals from an issue-like JSON object.
///
/// Looks at the object itself and then at an embedded `issue` or `content`
/// object, which is where board APIs nest the underlying issue.
#[must_use]
pub fn fields_from_payload(obj: &Map<String, Value>, service: Service, page_url: &str) -> RawTaskFields {
    let mut fields = RawTaskFields::new(service);
    let nested = ["issue", "content"]
        .iter()
        .filter_map(|name| obj.get(*name).and_then(Value::as_object));

    for source in std::iter::once(obj).chain(nested) {
        if fields.issue_key.is_none() {
            fields.issue_key = payload_issue_key(source, service);
        }
        if fields.title.is_none() {
            fields.title = ["summary", "title"]
                .iter()
                .find_map(|name| source.get(*name).and_then(Value::as_str))
                .map(normalize_title)
                .filter(|title| !title.is_empty());
        }
        if fields.numeric_id.is_none() {
            fields.numeric_id = source.get("id").and_then(Value::as_u64).map(|id| id.to_string());
        }
    }

    fields.fill_from_url(page_url);
    if fields.project_name.is_none() {
        fields.project_name = fields
            .issue_key
            .as_deref()
            .and_then(|key| project_from_issue_key(service, key));
    }
    fields
}

fn payload_issue_key(obj: &Map<String, Value>, service: Service) -> Option<String> {
    match service {
        Service::Backlog => ["issueKey", "key"]
            .iter()
            .filter_map(|name| obj.get(*name).and_then(Value::as_str))
            .find_map(|value| issue_key_in_text(service, value)),
        Service::Github => obj
            .get("number")
            .and_then(Value::as_u64)
            .map(|n| format!("#{n}"))
            .or_else(|| {
                obj.get("url")
                    .and_then(Value::as_str)
                    .and_then(|url| issue_key_in_href(service, url))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::ElementSnapshot;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn fields(service: Service) -> RawTaskFields {
        RawTaskFields::new(service)
    }

    #[test]
    fn space_and_issue_key_wins() {
        let mut raw = fields(Service::Backlog);
        raw.issue_key = Some("TEST-4".to_string());
        raw.space_or_org = Some("acme".to_string());
        raw.title = Some("Fix login".to_string());

        let identity = resolve(&raw);
        assert_eq!(identity.key(), "acme_TEST-4");
        assert_eq!(identity.origin(), KeyOrigin::SpaceAndIssue);
    }

    #[test]
    fn issue_key_without_space_uses_service_prefix() {
        let mut raw = fields(Service::Github);
        raw.issue_key = Some("#6".to_string());
        assert_eq!(resolve(&raw).key(), "github-#6");
    }

    #[test]
    fn title_drift_does_not_change_issue_keyed_identity() {
        let mut a = fields(Service::Backlog);
        a.issue_key = Some("TEST-4".to_string());
        a.space_or_org = Some("acme".to_string());
        a.title = Some("Old title".to_string());
        let mut b = a.clone();
        b.title = Some("New title".to_string());
        assert_eq!(resolve(&a).key(), resolve(&b).key());
    }

    #[test]
    fn title_fallback_is_normalized() {
        let mut raw = fields(Service::Backlog);
        raw.title = Some("  Fix   the\tlogin ".to_string());
        raw.space_or_org = Some("acme".to_string());
        let identity = resolve(&raw);
        assert_eq!(identity.key(), "backlog-title-Fix the login-acme");
        assert_eq!(identity.fallback_id.as_deref(), Some("title-Fix the login-acme"));
    }

    #[test]
    fn numeric_id_is_used_after_title() {
        let mut raw = fields(Service::Github);
        raw.numeric_id = Some("12345".to_string());
        assert_eq!(resolve(&raw).key(), "github-id-12345");
    }

    #[test]
    fn empty_fields_generate_unstable_key() {
        let raw = fields(Service::Backlog);
        let identity = resolve(&raw);
        assert!(identity.is_generated());
        assert!(identity.key().starts_with("backlog-task-"));
    }

    #[test]
    fn blank_issue_key_is_ignored() {
        let mut raw = fields(Service::Backlog);
        raw.issue_key = Some("   ".to_string());
        raw.title = Some("Fix".to_string());
        assert_eq!(resolve(&raw).origin(), KeyOrigin::Title);
    }

    #[test]
    fn urls_yield_space_and_project() {
        let url = "https://acme.backlog.com/board/TEST?category=1";
        assert_eq!(space_from_url(Service::Backlog, url).as_deref(), Some("acme"));
        assert_eq!(project_from_url(Service::Backlog, url).as_deref(), Some("TEST"));

        let gh = "https://github.com/orgs/octo/projects/3/views/1";
        assert_eq!(space_from_url(Service::Github, gh).as_deref(), Some("octo"));
        assert_eq!(project_from_url(Service::Github, gh).as_deref(), Some("octo/projects/3"));
    }

    #[test]
    fn issue_keys_in_text_and_links() {
        assert_eq!(issue_key_in_text(Service::Backlog, "TEST-4 Fix login").as_deref(), Some("TEST-4"));
        assert_eq!(issue_key_in_text(Service::Backlog, "no key here"), None);
        assert_eq!(
            issue_key_in_href(Service::Github, "https://github.com/octo/repo/issues/6").as_deref(),
            Some("#6")
        );
        assert_eq!(issue_key_in_text(Service::Github, "repo #42").as_deref(), Some("#42"));
    }

    fn node(id: u64, tag: &str, attrs: &[(&str, &str)], text: &str, children: Vec<ElementSnapshot>) -> ElementSnapshot {
        ElementSnapshot {
            id: NodeId(id),
            tag: tag.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            text: text.to_string(),
            rect: None,
            children,
        }
    }

    #[test]
    fn card_fields_come_from_links_and_url() {
        let doc = Document::from_snapshot(
            "https://acme.backlog.com/board/TEST",
            node(
                1,
                "div",
                &[],
                "",
                vec![node(
                    2,
                    "div",
                    &[("data-rbd-draggable-id", "card-1")],
                    "",
                    vec![
                        node(3, "a", &[("href", "/view/TEST-4")], "TEST-4", vec![]),
                        node(4, "p", &[("class", "card-summary")], "Fix login", vec![]),
                    ],
                )],
            ),
        );

        let raw = fields_from_card(&doc, NodeId(2), &ServiceProfile::backlog());
        assert_eq!(raw.issue_key.as_deref(), Some("TEST-4"));
        assert_eq!(raw.title.as_deref(), Some("Fix login"));
        assert_eq!(raw.space_or_org.as_deref(), Some("acme"));
        assert_eq!(raw.project_name.as_deref(), Some("TEST"));
        assert_eq!(resolve(&raw).key(), "acme_TEST-4");
    }

    #[test]
    fn payload_fields_read_nested_issue() {
        let value = json!({
            "issue": {"issueKey": "TEST-4", "summary": "Fix login", "id": 99},
            "status": {"name": "処理中"}
        });
        let raw = fields_from_payload(
            value.as_object().unwrap(),
            Service::Backlog,
            "https://acme.backlog.jp/board/TEST",
        );
        assert_eq!(raw.issue_key.as_deref(), Some("TEST-4"));
        assert_eq!(raw.title.as_deref(), Some("Fix login"));
        assert_eq!(raw.numeric_id.as_deref(), Some("99"));
        assert_eq!(resolve(&raw).key(), "acme_TEST-4");
    }

    #[test]
    fn github_payload_uses_content_number() {
        let value = json!({
            "id": "PVTI_abc",
            "content": {"number": 6, "title": "Add export"}
        });
        let raw = fields_from_payload(
            value.as_object().unwrap(),
            Service::Github,
            "https://github.com/orgs/octo/projects/3",
        );
        assert_eq!(resolve(&raw).key(), "octo_#6");
        assert_eq!(raw.title.as_deref(), Some("Add export"));
    }
}
