//! Pointer/drag detector.
//!
//! On pointer-down over a card, the card's identity and status are
//! snapshotted. On pointer-up the owner schedules rechecks at
//! [`RECHECK_DELAYS_MS`]; each recheck re-resolves the same task by key
//! against the current document and reports the first status change.
//!
//! Rechecks are plain delayed messages and are never cancelled. Each one
//! carries the drag generation it was scheduled for and re-validates the
//! current state before acting, so a stale recheck is a no-op.

use tracing::{debug, trace};

use super::{inspect_card, Observation, ObservationSource, StatusLedger, TaskSnapshot};
use crate::dom::{Document, NodeId};
use crate::selectors::ServiceProfile;

/// Delays after pointer-up at which the dragged card is re-checked.
pub const RECHECK_DELAYS_MS: [u64; 3] = [100, 300, 600];

/// Result of one recheck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecheckOutcome {
    /// The drag was superseded, already resolved, or recorded by another
    /// detector.
    Stale,
    /// The card could not be found in the current document.
    Missing,
    Unchanged,
    Changed(Observation),
}

#[derive(Debug, Clone)]
struct PendingDrag {
    generation: u64,
    snapshot: TaskSnapshot,
    released: bool,
}

#[derive(Debug)]
pub struct PointerDetector {
    profile: ServiceProfile,
    generation: u64,
    pending: Option<PendingDrag>,
}

impl PointerDetector {
    #[must_use]
    pub fn new(profile: ServiceProfile) -> Self {
        Self {
            profile,
            generation: 0,
            pending: None,
        }
    }

    /// Snapshots the card under the pointer, if any.
    ///
    /// Returns the drag generation, or `None` when the target is not part of
    /// a readable card.
    pub fn pointer_down(&mut self, doc: &Document, target: NodeId) -> Option<u64> {
        let card = doc.closest(target, |el| self.profile.is_card(el))?;
        let snapshot = inspect_card(doc, card, &self.profile)?;
        self.generation += 1;
        debug!(
            generation = self.generation,
            task_id = %snapshot.key(),
            status = %snapshot.status,
            "Drag started"
        );
        self.pending = Some(PendingDrag {
            generation: self.generation,
            snapshot,
            released: false,
        });
        Some(self.generation)
    }

    /// Marks the current drag as released.
    ///
    /// Returns the generation to schedule rechecks for.
    pub fn pointer_up(&mut self) -> Option<u64> {
        let pending = self.pending.as_mut().filter(|p| !p.released)?;
        pending.released = true;
        Some(pending.generation)
    }

    /// Re-resolves the dragged task and compares its status with the
    /// pointer-down snapshot.
    ///
    /// `is_final` marks the last scheduled attempt, after which the drag is
    /// forgotten even if nothing changed.
    pub fn recheck(
        &mut self,
        doc: &Document,
        generation: u64,
        is_final: bool,
        ledger: &mut StatusLedger,
    ) -> RecheckOutcome {
        let Some(pending) = self.pending.as_ref().filter(|p| p.generation == generation && p.released) else {
            return RecheckOutcome::Stale;
        };
        let key = pending.snapshot.key().to_string();
        let old_status = pending.snapshot.status.clone();

        let current = doc
            .find_all(|el| self.profile.is_card(el))
            .into_iter()
            .filter_map(|card| inspect_card(doc, card, &self.profile))
            .find(|snapshot| snapshot.key() == key);

        let outcome = match current {
            None => RecheckOutcome::Missing,
            Some(snapshot) if snapshot.status == old_status => RecheckOutcome::Unchanged,
            Some(snapshot) if ledger.get(&key) == Some(snapshot.status.as_str()) => {
                trace!(task_id = %key, "Change already recorded by another detector");
                self.pending = None;
                return RecheckOutcome::Stale;
            }
            Some(snapshot) => {
                ledger.observe(&key, &snapshot.status);
                self.pending = None;
                return RecheckOutcome::Changed(snapshot.observation(Some(old_status), ObservationSource::Pointer));
            }
        };

        if is_final {
            debug!(generation, task_id = %key, "Drag ended without a status change");
            self.pending = None;
        }
        outcome
    }
}
