//! DOM mutation detector.
//!
//! Turns the mutation records of applied page patches into status
//! observations. A record is relevant when its target (or an added node) is
//! a card, sits inside a card or a column, or contains cards. Every affected
//! card is re-checked together with its column peers, since a column-level
//! change can move any card in it.

use std::collections::HashSet;

use tracing::{debug, trace};

use super::{inspect_card, track, Detection, ObservationSource, StatusLedger};
use crate::dom::{Document, MutationKind, MutationRecord, NodeId};
use crate::selectors::ServiceProfile;

#[derive(Debug, Clone)]
pub struct MutationDetector {
    profile: ServiceProfile,
}

impl MutationDetector {
    #[must_use]
    pub fn new(profile: ServiceProfile) -> Self {
        Self { profile }
    }

    /// Checks every card on the page, e.g. right after a full snapshot.
    pub fn scan(&self, doc: &Document, ledger: &mut StatusLedger) -> Vec<Detection> {
        let cards = doc.find_all(|el| self.profile.is_card(el));
        debug!(cards = cards.len(), "Scanning board");
        self.check_cards(doc, cards, ledger)
    }

    /// Checks the cards affected by a batch of mutation records.
    pub fn process(&self, doc: &Document, records: &[MutationRecord], ledger: &mut StatusLedger) -> Vec<Detection> {
        let cards = self.affected_cards(doc, records);
        if cards.is_empty() {
            return Vec::new();
        }
        trace!(records = records.len(), cards = cards.len(), "Relevant mutations");
        self.check_cards(doc, cards, ledger)
    }

    fn check_cards(&self, doc: &Document, cards: Vec<NodeId>, ledger: &mut StatusLedger) -> Vec<Detection> {
        let mut seen_keys = HashSet::new();
        cards
            .into_iter()
            .filter_map(|card| inspect_card(doc, card, &self.profile))
            .filter(|snapshot| seen_keys.insert(snapshot.key().to_string()))
            .filter_map(|snapshot| track(ledger, snapshot, ObservationSource::DomMutation))
            .collect()
    }

    /// Cards touched by the records, plus their column peers, in order of
    /// first appearance.
    fn affected_cards(&self, doc: &Document, records: &[MutationRecord]) -> Vec<NodeId> {
        let mut ordered = Vec::new();
        let mut seen = HashSet::new();
        let mut push = |id: NodeId| {
            if seen.insert(id) {
                ordered.push(id);
            }
        };

        for node in records.iter().flat_map(candidates) {
            if !doc.contains(node) {
                continue;
            }
            if let Some(card) = doc.closest(node, |el| self.profile.is_card(el)) {
                push(card);
                if let Some(column) = doc.closest(card, |el| self.profile.is_column(el)) {
                    for peer in self.cards_within(doc, column) {
                        push(peer);
                    }
                }
            } else {
                let scope = doc
                    .closest(node, |el| self.profile.is_column(el))
                    .unwrap_or(node);
                for card in self.cards_within(doc, scope) {
                    push(card);
                }
            }
        }
        ordered
    }

    fn cards_within(&self, doc: &Document, scope: NodeId) -> Vec<NodeId> {
        doc.descendants(scope)
            .into_iter()
            .filter(|id| doc.get(*id).is_some_and(|el| self.profile.is_card(el)))
            .collect()
    }
}

fn candidates(record: &MutationRecord) -> Vec<NodeId> {
    let mut nodes = vec![record.target];
    if let MutationKind::ChildList { added, .. } = &record.kind {
        nodes.extend(added.iter().copied());
    }
    nodes
}
