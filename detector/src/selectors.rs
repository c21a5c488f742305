//! Per-service marker tables for the board markup.
//!
//! Every service gets exactly one [`ServiceProfile`]. Supporting another
//! kanban tool means adding a profile here, not another detector.
//!
//! Third-party markup changes without notice, so every list is a tiered
//! fallback: the first entries are the most specific markers, the last ones
//! are loose heuristics.

use crate::dom::Element;
use crate::types::Service;

/// A predicate over a single element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The attribute is present, whatever its value.
    Attr(&'static str),
    /// The attribute has exactly this value.
    AttrValue(&'static str, &'static str),
    /// One of the element's classes contains this substring.
    ClassContains(&'static str),
    Tag(&'static str),
}

impl Marker {
    #[must_use]
    pub fn matches(&self, el: &Element) -> bool {
        match *self {
            Self::Attr(name) => el.has_attr(name),
            Self::AttrValue(name, value) => el.attr(name) == Some(value),
            Self::ClassContains(fragment) => el.classes().any(|class| class.contains(fragment)),
            Self::Tag(tag) => el.is_tag(tag),
        }
    }
}

/// Returns true if any marker in the list matches.
#[must_use]
pub fn matches_any(markers: &[Marker], el: &Element) -> bool {
    markers.iter().any(|marker| marker.matches(el))
}

/// Attributes that carry a status directly, checked on the card and then on
/// its ancestors.
pub const STATUS_ATTRIBUTES: &[&str] = &["data-status", "data-column", "data-column-id", "data-statusid"];

/// Attributes that carry an explicit issue key.
pub const ISSUE_KEY_ATTRIBUTES: &[&str] = &["data-issue-key", "data-issuekey", "data-key"];

/// Attributes that carry a numeric card or item id.
pub const NUMERIC_ID_ATTRIBUTES: &[&str] = &[
    "data-id",
    "data-item-id",
    "data-board-card-id",
    "data-issue-id",
];

/// Status vocabulary, grouped by family. Matching is case-insensitive
/// substring matching on normalized header text.
pub const STATUS_KEYWORDS: &[&[&str]] = &[
    // progress
    &["処理中", "進行中", "作業中", "対応中", "in progress", "doing", "progress", "wip"],
    // done
    &["完了", "処理済み", "終了", "done", "closed", "completed", "complete", "resolved"],
    // todo
    &["未対応", "未着手", "todo", "to do", "backlog", "open", "new"],
    // review
    &["レビュー", "確認中", "review", "in review", "qa"],
];

/// Returns true if normalized header text looks like a status name.
#[must_use]
pub fn is_status_keyword(text: &str) -> bool {
    let lowered = text.to_lowercase();
    STATUS_KEYWORDS
        .iter()
        .flat_map(|family| family.iter())
        .any(|keyword| lowered.contains(keyword))
}

/// Selector table for one kanban service.
#[derive(Debug, Clone)]
pub struct ServiceProfile {
    pub service: Service,
    /// Markers identifying a task card element.
    pub card: &'static [Marker],
    /// Markers identifying a board column container.
    pub column: &'static [Marker],
    /// Markers identifying a column header holding the status name.
    pub column_header: &'static [Marker],
    /// Markers identifying the element holding a card's title.
    pub title: &'static [Marker],
    /// URL fragments of the board-mutation REST endpoints.
    pub api_url_patterns: &'static [&'static str],
    /// URL fragment identifying the GraphQL endpoint.
    pub graphql_url_pattern: Option<&'static str>,
    /// Request-body fragments identifying a card-moving GraphQL mutation.
    pub graphql_signatures: &'static [&'static str],
    /// JSON paths, tried in order, at which an update payload carries the
    /// status name.
    pub payload_status_paths: &'static [&'static [&'static str]],
}

impl ServiceProfile {
    #[must_use]
    pub fn for_service(service: Service) -> Self {
        match service {
            Service::Backlog => Self::backlog(),
            Service::Github => Self::github(),
        }
    }

    #[must_use]
    pub fn backlog() -> Self {
        Self {
            service: Service::Backlog,
            card: &[
                Marker::Attr("data-issue-key"),
                Marker::Attr("data-rbd-draggable-id"),
                Marker::Attr("data-react-beautiful-dnd-draggable"),
                Marker::ClassContains("SlotItem"),
                Marker::ClassContains("kanban-card"),
                Marker::AttrValue("draggable", "true"),
            ],
            column: &[
                Marker::Attr("data-rbd-droppable-id"),
                Marker::Attr("data-statusid"),
                Marker::ClassContains("SlotBox"),
                Marker::ClassContains("kanban-column"),
                Marker::Tag("section"),
            ],
            column_header: &[
                Marker::ClassContains("SlotHead"),
                Marker::ClassContains("column-header"),
                Marker::ClassContains("statusName"),
                Marker::Tag("h3"),
            ],
            title: &[
                Marker::ClassContains("card-summary"),
                Marker::ClassContains("summary"),
                Marker::ClassContains("title"),
            ],
            api_url_patterns: &["board-api/kanban", "/api/v2/issues/"],
            graphql_url_pattern: None,
            graphql_signatures: &[],
            payload_status_paths: &[&["issue", "status", "name"], &["status", "name"]],
        }
    }

    #[must_use]
    pub fn github() -> Self {
        Self {
            service: Service::Github,
            card: &[
                Marker::AttrValue("data-testid", "board-view-column-card"),
                Marker::Attr("data-board-card-id"),
                Marker::ClassContains("board-card"),
                Marker::AttrValue("draggable", "true"),
            ],
            column: &[
                Marker::AttrValue("data-testid", "board-view-column"),
                Marker::Attr("data-board-column"),
                Marker::ClassContains("board-column"),
            ],
            column_header: &[
                Marker::AttrValue("data-testid", "board-view-column-title-text"),
                Marker::ClassContains("column-header"),
                Marker::Tag("h3"),
            ],
            title: &[
                Marker::AttrValue("data-testid", "board-card-title"),
                Marker::ClassContains("card-title"),
                Marker::ClassContains("title"),
            ],
            api_url_patterns: &["/memexes/", "/project_items/"],
            graphql_url_pattern: Some("graphql"),
            graphql_signatures: &[
                "updateProjectV2ItemFieldValue",
                "updateProjectV2ItemPosition",
                "updateCard",
            ],
            payload_status_paths: &[
                &["status", "name"],
                &["fieldValue", "name"],
                &["fieldValueByName", "name"],
                &["singleSelectOption", "name"],
            ],
        }
    }

    /// Returns true if the element is a task card.
    #[must_use]
    pub fn is_card(&self, el: &Element) -> bool {
        matches_any(self.card, el)
    }

    #[must_use]
    pub fn is_column(&self, el: &Element) -> bool {
        matches_any(self.column, el)
    }

    #[must_use]
    pub fn is_column_header(&self, el: &Element) -> bool {
        matches_any(self.column_header, el)
    }

    #[must_use]
    pub fn is_title(&self, el: &Element) -> bool {
        matches_any(self.title, el)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeId;
    use std::collections::BTreeMap;

    fn element(tag: &str, attrs: &[(&str, &str)]) -> Element {
        Element {
            id: NodeId(1),
            tag: tag.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            text: String::new(),
            rect: None,
            parent: None,
            children: vec![],
        }
    }

    #[test]
    fn class_marker_matches_substring_of_any_class() {
        let el = element("div", &[("class", "foo SlotItem_abc123 bar")]);
        assert!(Marker::ClassContains("SlotItem").matches(&el));
        assert!(!Marker::ClassContains("SlotHead").matches(&el));
    }

    #[test]
    fn attr_value_marker_requires_exact_value() {
        let el = element("div", &[("draggable", "false")]);
        assert!(Marker::Attr("draggable").matches(&el));
        assert!(!Marker::AttrValue("draggable", "true").matches(&el));
    }

    #[test]
    fn tag_marker_ignores_case() {
        assert!(Marker::Tag("h3").matches(&element("H3", &[])));
    }

    #[test]
    fn github_card_marker() {
        let profile = ServiceProfile::github();
        let card = element("div", &[("data-testid", "board-view-column-card")]);
        assert!(profile.is_card(&card));
        assert!(!profile.is_column(&card));
    }

    #[test]
    fn status_keywords_are_bilingual() {
        assert!(is_status_keyword("処理中"));
        assert!(is_status_keyword("In Progress"));
        assert!(is_status_keyword("DONE"));
        assert!(is_status_keyword("レビュー待ち"));
        assert!(!is_status_keyword("Icebox"));
    }

    #[test]
    fn profile_lookup_by_service() {
        assert_eq!(ServiceProfile::for_service(Service::Backlog).service, Service::Backlog);
        assert!(ServiceProfile::for_service(Service::Github)
            .graphql_url_pattern
            .is_some());
    }
}
