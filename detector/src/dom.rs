//! Page model for the observed kanban board.
//!
//! The host page is never touched directly. A thin browser shim serializes
//! the board into an [`ElementSnapshot`] tree once, then streams
//! [`DomPatch`] operations as the page mutates. This module keeps an arena
//! [`Document`] in sync with those patches and turns every applied patch into
//! [`MutationRecord`]s, which are the input of the DOM mutation detector.
//!
//! # Tolerance
//!
//! The page is uncontrolled and mutates continuously, so patches routinely
//! reference nodes that were already removed. Such patches fail with a
//! [`DomError`] that callers log and skip; the document is left unchanged.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use kanbantime_detector::dom::{Document, DomPatch, ElementSnapshot, NodeId};
//!
//! let root = ElementSnapshot {
//!     id: NodeId(1),
//!     tag: "div".to_string(),
//!     attrs: BTreeMap::new(),
//!     text: String::new(),
//!     rect: None,
//!     children: vec![],
//! };
//! let mut doc = Document::from_snapshot("https://example.backlog.com/board/TEST", root);
//!
//! let records = doc
//!     .apply(DomPatch::SetText { node: NodeId(1), text: "hello".to_string() })
//!     .unwrap();
//! assert_eq!(records.len(), 1);
//! assert_eq!(doc.text_content(NodeId(1)), "hello");
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Identifier assigned to an element by the browser shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bounding box of an element in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Returns true if the horizontal extents of both rectangles intersect.
    #[must_use]
    pub fn overlaps_horizontally(&self, other: &Rect) -> bool {
        self.left < other.right() && other.left < self.right()
    }
}

/// Serialized element subtree as sent by the browser shim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    pub id: NodeId,
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Text owned directly by this element (not including children).
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub children: Vec<ElementSnapshot>,
}

/// A single element in the [`Document`] arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub id: NodeId,
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub rect: Option<Rect>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Element {
    /// Returns the value of an attribute, if present.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Iterates over the whitespace separated entries of the `class` attribute.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    /// Tag name comparison is case-insensitive, as in HTML.
    #[must_use]
    pub fn is_tag(&self, tag: &str) -> bool {
        self.tag.eq_ignore_ascii_case(tag)
    }
}

/// Structural operation applied to the [`Document`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DomPatch {
    /// Inserts a subtree under `parent` at `index` (appends when absent).
    Insert {
        parent: NodeId,
        #[serde(default)]
        index: Option<usize>,
        node: ElementSnapshot,
    },
    /// Removes a node and its whole subtree.
    Remove { node: NodeId },
    /// Moves an attached node to a new parent.
    Move {
        node: NodeId,
        parent: NodeId,
        #[serde(default)]
        index: Option<usize>,
    },
    SetAttribute {
        node: NodeId,
        name: String,
        value: String,
    },
    RemoveAttribute { node: NodeId, name: String },
    SetText { node: NodeId, text: String },
    /// Layout update. Not a mutation, so it produces no records.
    SetRect { node: NodeId, rect: Option<Rect> },
}

/// What changed in a [`MutationRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attributes {
        name: String,
    },
    CharacterData,
}

/// Record produced for every structural, attribute or text change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

/// Errors raised when a patch cannot be applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    /// The patch references a node that is not attached to the document.
    #[error("unknown or detached node {0}")]
    UnknownNode(NodeId),

    /// An inserted subtree reuses an id already present in the document.
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),

    /// The root element cannot be removed or moved.
    #[error("cannot detach the document root {0}")]
    RootDetach(NodeId),

    /// The move would place a node inside its own subtree.
    #[error("cannot move {node} into its own subtree")]
    Cycle { node: NodeId },
}

/// Arena representation of the observed page.
#[derive(Debug, Clone)]
pub struct Document {
    url: String,
    root: NodeId,
    nodes: HashMap<NodeId, Element>,
}

impl Document {
    /// Builds a document from a full page snapshot.
    ///
    /// Duplicate ids inside the snapshot keep the first occurrence.
    #[must_use]
    pub fn from_snapshot(url: impl Into<String>, root: ElementSnapshot) -> Self {
        let root_id = root.id;
        let mut nodes = HashMap::new();
        insert_subtree(&mut nodes, root, None);
        Self {
            url: url.into(),
            root: root_id,
            nodes,
        }
    }

    /// URL of the page the document was captured from.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Element> {
        self.nodes.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|el| el.parent)
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    #[must_use]
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.parent(id);
        while let Some(node) = current {
            out.push(node);
            current = self.parent(node);
        }
        out
    }

    /// Nearest element, starting with `id` itself, that satisfies `pred`.
    pub fn closest(&self, id: NodeId, pred: impl Fn(&Element) -> bool) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            let el = self.nodes.get(&node)?;
            if pred(el) {
                return Some(node);
            }
            current = el.parent;
        }
        None
    }

    /// Descendants of `id` in document order, excluding `id` itself.
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = match self.nodes.get(&id) {
            Some(el) => el.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(node) = stack.pop() {
            if let Some(el) = self.nodes.get(&node) {
                out.push(node);
                stack.extend(el.children.iter().rev().copied());
            }
        }
        out
    }

    /// All elements in document order that satisfy `pred`.
    pub fn find_all(&self, pred: impl Fn(&Element) -> bool) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.get(self.root).is_some_and(&pred) {
            out.push(self.root);
        }
        out.extend(
            self.descendants(self.root)
                .into_iter()
                .filter(|id| self.get(*id).is_some_and(&pred)),
        );
        out
    }

    /// Concatenated text of the element and its descendants, space separated.
    #[must_use]
    pub fn text_content(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        if let Some(el) = self.nodes.get(&id) {
            push_text(&mut parts, &el.text);
        }
        for node in self.descendants(id) {
            if let Some(el) = self.nodes.get(&node) {
                push_text(&mut parts, &el.text);
            }
        }
        parts.join(" ")
    }

    /// Applies a patch, returning the mutation records it produced.
    ///
    /// # Errors
    ///
    /// Returns a [`DomError`] when the patch references detached nodes,
    /// reuses ids, detaches the root or would create a cycle. The document is
    /// unchanged in that case.
    pub fn apply(&mut self, patch: DomPatch) -> Result<Vec<MutationRecord>, DomError> {
        match patch {
            DomPatch::Insert {
                parent,
                index,
                node,
            } => {
                self.require(parent)?;
                if let Some(dup) = first_duplicate(&self.nodes, &node) {
                    return Err(DomError::DuplicateNode(dup));
                }
                let added = node.id;
                insert_subtree(&mut self.nodes, node, Some(parent));
                self.attach(parent, added, index);
                trace!(parent = %parent, node = %added, "Inserted subtree");
                Ok(vec![MutationRecord {
                    target: parent,
                    kind: MutationKind::ChildList {
                        added: vec![added],
                        removed: vec![],
                    },
                }])
            }
            DomPatch::Remove { node } => {
                self.require(node)?;
                if node == self.root {
                    return Err(DomError::RootDetach(node));
                }
                let parent = self.detach(node);
                for id in self.descendants(node) {
                    self.nodes.remove(&id);
                }
                self.nodes.remove(&node);
                Ok(parent
                    .map(|parent| MutationRecord {
                        target: parent,
                        kind: MutationKind::ChildList {
                            added: vec![],
                            removed: vec![node],
                        },
                    })
                    .into_iter()
                    .collect())
            }
            DomPatch::Move {
                node,
                parent,
                index,
            } => {
                self.require(node)?;
                self.require(parent)?;
                if node == self.root {
                    return Err(DomError::RootDetach(node));
                }
                if node == parent || self.ancestors(parent).contains(&node) {
                    return Err(DomError::Cycle { node });
                }
                let old_parent = self.detach(node);
                self.attach(parent, node, index);
                let mut records = Vec::with_capacity(2);
                if let Some(old) = old_parent {
                    records.push(MutationRecord {
                        target: old,
                        kind: MutationKind::ChildList {
                            added: vec![],
                            removed: vec![node],
                        },
                    });
                }
                records.push(MutationRecord {
                    target: parent,
                    kind: MutationKind::ChildList {
                        added: vec![node],
                        removed: vec![],
                    },
                });
                Ok(records)
            }
            DomPatch::SetAttribute { node, name, value } => {
                let el = self.require_mut(node)?;
                el.attrs.insert(name.clone(), value);
                Ok(vec![MutationRecord {
                    target: node,
                    kind: MutationKind::Attributes { name },
                }])
            }
            DomPatch::RemoveAttribute { node, name } => {
                let el = self.require_mut(node)?;
                if el.attrs.remove(&name).is_none() {
                    return Ok(vec![]);
                }
                Ok(vec![MutationRecord {
                    target: node,
                    kind: MutationKind::Attributes { name },
                }])
            }
            DomPatch::SetText { node, text } => {
                let el = self.require_mut(node)?;
                if el.text == text {
                    return Ok(vec![]);
                }
                el.text = text;
                Ok(vec![MutationRecord {
                    target: node,
                    kind: MutationKind::CharacterData,
                }])
            }
            DomPatch::SetRect { node, rect } => {
                self.require_mut(node)?.rect = rect;
                Ok(vec![])
            }
        }
    }

    fn require(&self, id: NodeId) -> Result<&Element, DomError> {
        self.nodes.get(&id).ok_or(DomError::UnknownNode(id))
    }

    fn require_mut(&mut self, id: NodeId) -> Result<&mut Element, DomError> {
        self.nodes.get_mut(&id).ok_or(DomError::UnknownNode(id))
    }

    fn detach(&mut self, node: NodeId) -> Option<NodeId> {
        let parent = self.parent(node)?;
        if let Some(el) = self.nodes.get_mut(&parent) {
            el.children.retain(|child| *child != node);
        }
        if let Some(el) = self.nodes.get_mut(&node) {
            el.parent = None;
        }
        Some(parent)
    }

    fn attach(&mut self, parent: NodeId, node: NodeId, index: Option<usize>) {
        if let Some(el) = self.nodes.get_mut(&parent) {
            let at = index.unwrap_or(el.children.len()).min(el.children.len());
            el.children.insert(at, node);
        }
        if let Some(el) = self.nodes.get_mut(&node) {
            el.parent = Some(parent);
        }
    }
}

fn push_text(parts: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
}

fn first_duplicate(nodes: &HashMap<NodeId, Element>, snapshot: &ElementSnapshot) -> Option<NodeId> {
    if nodes.contains_key(&snapshot.id) {
        return Some(snapshot.id);
    }
    snapshot
        .children
        .iter()
        .find_map(|child| first_duplicate(nodes, child))
}

fn insert_subtree(
    nodes: &mut HashMap<NodeId, Element>,
    snapshot: ElementSnapshot,
    parent: Option<NodeId>,
) {
    if nodes.contains_key(&snapshot.id) {
        return;
    }
    let id = snapshot.id;
    let mut children = Vec::with_capacity(snapshot.children.len());
    nodes.insert(
        id,
        Element {
            id,
            tag: snapshot.tag,
            attrs: snapshot.attrs,
            text: snapshot.text,
            rect: snapshot.rect,
            parent,
            children: Vec::new(),
        },
    );
    for child in snapshot.children {
        let child_id = child.id;
        if nodes.contains_key(&child_id) {
            continue;
        }
        insert_subtree(nodes, child, Some(id));
        children.push(child_id);
    }
    if let Some(el) = nodes.get_mut(&id) {
        el.children = children;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(id: u64, tag: &str, text: &str, children: Vec<ElementSnapshot>) -> ElementSnapshot {
        ElementSnapshot {
            id: NodeId(id),
            tag: tag.to_string(),
            attrs: BTreeMap::new(),
            text: text.to_string(),
            rect: None,
            children,
        }
    }

    fn board() -> Document {
        Document::from_snapshot(
            "https://space.backlog.com/board/TEST",
            el(
                1,
                "body",
                "",
                vec![
                    el(2, "section", "", vec![el(3, "h3", "未対応", vec![]), el(4, "div", "card a", vec![])]),
                    el(5, "section", "", vec![el(6, "h3", "処理中", vec![])]),
                ],
            ),
        )
    }

    #[test]
    fn snapshot_builds_parent_links() {
        let doc = board();
        assert_eq!(doc.len(), 6);
        assert_eq!(doc.parent(NodeId(4)), Some(NodeId(2)));
        assert_eq!(doc.ancestors(NodeId(4)), vec![NodeId(2), NodeId(1)]);
        assert_eq!(doc.root(), NodeId(1));
    }

    #[test]
    fn descendants_are_in_document_order() {
        let doc = board();
        let ids: Vec<u64> = doc.descendants(NodeId(1)).iter().map(|n| n.0).collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn text_content_joins_subtree() {
        let doc = board();
        assert_eq!(doc.text_content(NodeId(2)), "未対応 card a");
        assert_eq!(doc.text_content(NodeId(99)), "");
    }

    #[test]
    fn move_emits_records_for_both_parents() {
        let mut doc = board();
        let records = doc
            .apply(DomPatch::Move {
                node: NodeId(4),
                parent: NodeId(5),
                index: None,
            })
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].target, NodeId(2));
        assert_eq!(records[1].target, NodeId(5));
        assert_eq!(doc.parent(NodeId(4)), Some(NodeId(5)));
        assert_eq!(doc.get(NodeId(5)).unwrap().children, vec![NodeId(6), NodeId(4)]);
        assert!(!doc.get(NodeId(2)).unwrap().children.contains(&NodeId(4)));
    }

    #[test]
    fn move_into_own_subtree_is_rejected() {
        let mut doc = board();
        let err = doc
            .apply(DomPatch::Move {
                node: NodeId(2),
                parent: NodeId(4),
                index: None,
            })
            .unwrap_err();
        assert_eq!(err, DomError::Cycle { node: NodeId(2) });
        assert_eq!(doc.parent(NodeId(2)), Some(NodeId(1)));
    }

    #[test]
    fn remove_drops_whole_subtree() {
        let mut doc = board();
        let records = doc.apply(DomPatch::Remove { node: NodeId(2) }).unwrap();
        assert_eq!(records.len(), 1);
        assert!(!doc.contains(NodeId(2)));
        assert!(!doc.contains(NodeId(3)));
        assert!(!doc.contains(NodeId(4)));
        assert_eq!(doc.len(), 3);
    }

    #[test]
    fn patches_on_detached_nodes_fail_without_changes() {
        let mut doc = board();
        doc.apply(DomPatch::Remove { node: NodeId(4) }).unwrap();

        let err = doc
            .apply(DomPatch::SetAttribute {
                node: NodeId(4),
                name: "data-status".to_string(),
                value: "done".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, DomError::UnknownNode(NodeId(4)));
    }

    #[test]
    fn root_cannot_be_removed() {
        let mut doc = board();
        assert_eq!(
            doc.apply(DomPatch::Remove { node: NodeId(1) }).unwrap_err(),
            DomError::RootDetach(NodeId(1))
        );
    }

    #[test]
    fn insert_with_duplicate_id_is_rejected() {
        let mut doc = board();
        let err = doc
            .apply(DomPatch::Insert {
                parent: NodeId(5),
                index: None,
                node: el(7, "div", "", vec![el(3, "span", "", vec![])]),
            })
            .unwrap_err();
        assert_eq!(err, DomError::DuplicateNode(NodeId(3)));
        assert!(!doc.contains(NodeId(7)));
    }

    #[test]
    fn insert_at_index() {
        let mut doc = board();
        doc.apply(DomPatch::Insert {
            parent: NodeId(5),
            index: Some(0),
            node: el(7, "div", "", vec![]),
        })
        .unwrap();
        assert_eq!(doc.get(NodeId(5)).unwrap().children, vec![NodeId(7), NodeId(6)]);
    }

    #[test]
    fn unchanged_text_produces_no_record() {
        let mut doc = board();
        let records = doc
            .apply(DomPatch::SetText {
                node: NodeId(3),
                text: "未対応".to_string(),
            })
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn set_rect_is_not_a_mutation() {
        let mut doc = board();
        let rect = Rect {
            left: 0.0,
            top: 10.0,
            width: 100.0,
            height: 20.0,
        };
        let records = doc
            .apply(DomPatch::SetRect {
                node: NodeId(3),
                rect: Some(rect),
            })
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(doc.get(NodeId(3)).unwrap().rect, Some(rect));
    }

    #[test]
    fn patch_deserializes_from_shim_json() {
        let patch: DomPatch = serde_json::from_str(
            r#"{"op":"setAttribute","node":12,"name":"data-status","value":"処理中"}"#,
        )
        .unwrap();
        assert_eq!(
            patch,
            DomPatch::SetAttribute {
                node: NodeId(12),
                name: "data-status".to_string(),
                value: "処理中".to_string(),
            }
        );
    }

    #[test]
    fn rect_overlap() {
        let a = Rect {
            left: 0.0,
            top: 0.0,
            width: 100.0,
            height: 10.0,
        };
        let b = Rect {
            left: 50.0,
            top: 40.0,
            width: 100.0,
            height: 10.0,
        };
        let c = Rect {
            left: 100.0,
            top: 0.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(a.overlaps_horizontally(&b));
        assert!(!a.overlaps_horizontally(&c));
        assert_eq!(b.bottom(), 50.0);
    }
}
