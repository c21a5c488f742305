//! Status extraction from board markup and API payloads.
//!
//! DOM extraction runs three tiers in order and stops at the first hit:
//!
//! 1. A status data attribute on the card or its nearest ancestor.
//! 2. The header of the column that contains the card, if its text matches
//!    the status vocabulary.
//! 3. Geometry: the column header above the card whose horizontal extent
//!    overlaps it, nearest by vertical distance.
//!
//! Every DOM-derived string goes through [`normalize_status`]. Payload
//! statuses are only trimmed.

use serde_json::Value;
use tracing::trace;

use crate::dom::{Document, NodeId};
use crate::selectors::{is_status_keyword, ServiceProfile, STATUS_ATTRIBUTES};

const DECORATIONS: &[char] = &[
    '(', ')', '[', ']', '{', '}', '（', '）', '【', '】', '「', '」', '〔', '〕',
];

/// Strips count suffixes and bracket decorations from a raw status string.
///
/// Returns `None` when nothing meaningful remains.
///
/// ```
/// use kanbantime_detector::status::normalize_status;
///
/// assert_eq!(normalize_status("処理中(3)").as_deref(), Some("処理中"));
/// assert_eq!(normalize_status(" In Progress  [12] ").as_deref(), Some("In Progress"));
/// assert_eq!(normalize_status("(0)"), None);
/// ```
#[must_use]
pub fn normalize_status(raw: &str) -> Option<String> {
    let stripped: String = raw
        .chars()
        .filter(|c| !c.is_ascii_digit() && !('０'..='９').contains(c) && !DECORATIONS.contains(c))
        .collect();
    let normalized = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Determines the status of a card from the surrounding markup.
#[must_use]
pub fn extract_status_from_dom(doc: &Document, card: NodeId, profile: &ServiceProfile) -> Option<String> {
    if !doc.contains(card) {
        return None;
    }
    from_attributes(doc, card)
        .or_else(|| from_column_header(doc, card, profile))
        .or_else(|| from_geometry(doc, card, profile))
}

fn from_attributes(doc: &Document, card: NodeId) -> Option<String> {
    std::iter::once(card)
        .chain(doc.ancestors(card))
        .filter_map(|id| doc.get(id))
        .find_map(|el| {
            STATUS_ATTRIBUTES
                .iter()
                .filter_map(|name| el.attr(name))
                .find_map(normalize_status)
        })
        .inspect(|status| trace!(card = %card, status = %status, "Status from data attribute"))
}

/// Headers under `scope` that belong to the column itself, not to a card.
fn headers_within(doc: &Document, scope: NodeId, card: NodeId, profile: &ServiceProfile) -> Vec<NodeId> {
    doc.descendants(scope)
        .into_iter()
        .filter(|id| *id != card)
        .filter(|id| doc.get(*id).is_some_and(|el| profile.is_column_header(el)))
        .filter(|id| doc.closest(*id, |el| profile.is_card(el)).is_none())
        .collect()
}

fn from_column_header(doc: &Document, card: NodeId, profile: &ServiceProfile) -> Option<String> {
    let ancestors = doc.ancestors(card);
    let column = ancestors
        .iter()
        .copied()
        .find(|id| doc.get(*id).is_some_and(|el| profile.is_column(el)));

    // Without a recognizable column, only a scope holding a single header is
    // unambiguous.
    let headers = match column {
        Some(column) => headers_within(doc, column, card, profile),
        None => ancestors
            .iter()
            .map(|scope| headers_within(doc, *scope, card, profile))
            .find(|headers| !headers.is_empty())
            .filter(|headers| headers.len() == 1)?,
    };

    headers
        .into_iter()
        .filter_map(|id| normalize_status(&doc.text_content(id)))
        .find(|text| is_status_keyword(text))
        .inspect(|status| trace!(card = %card, status = %status, "Status from column header"))
}

fn from_geometry(doc: &Document, card: NodeId, profile: &ServiceProfile) -> Option<String> {
    let card_rect = doc.get(card)?.rect?;

    doc.find_all(|el| profile.is_column_header(el))
        .into_iter()
        .filter(|id| doc.closest(*id, |el| profile.is_card(el)).is_none())
        .filter_map(|id| {
            let rect = doc.get(id)?.rect?;
            if !rect.overlaps_horizontally(&card_rect) || rect.top >= card_rect.top {
                return None;
            }
            let distance = (card_rect.top - rect.bottom()).max(0.0);
            Some((distance, id))
        })
        .filter_map(|(distance, id)| normalize_status(&doc.text_content(id)).map(|text| (distance, text)))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, text)| text)
        .inspect(|status| trace!(card = %card, status = %status, "Status from header geometry"))
}

/// Reads the status name from an update payload at the profile's known paths.
#[must_use]
pub fn extract_status_from_payload(value: &Value, profile: &ServiceProfile) -> Option<String> {
    profile.payload_status_paths.iter().find_map(|path| {
        path.iter()
            .try_fold(value, |current, segment| current.get(*segment))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    })
}
