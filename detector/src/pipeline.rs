//! The detector pipeline.
//!
//! A single task owns the page model, the status ledger, all three
//! detectors, the deduplicator and the relay. Page events arrive on one
//! channel; pointer rechecks are delayed messages fed back into the same
//! loop, so no detector state is ever shared between tasks.
//!
//! ```text
//! stdin (NDJSON) ──► PageEvent ──► detectors ──► deduplicator ──► relay ──► core
//!                        ▲              │
//!                        └── rechecks ◄─┘ (pointer-up, 100/300/600ms)
//! ```
//!
//! A failing event (malformed line, patch on a detached node) is logged and
//! skipped; it never stops the loop.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::dedup::ChangeDeduplicator;
use crate::detectors::{
    Detection, MutationDetector, NetworkDetector, NetworkExchange, ObservationSource, PointerDetector,
    RecheckOutcome, StatusLedger, RECHECK_DELAYS_MS,
};
use crate::dom::{Document, DomPatch, ElementSnapshot, NodeId};
use crate::error::DetectorError;
use crate::relay::{Relay, RelayError};
use crate::selectors::ServiceProfile;
use crate::types::{Notice, OutboundMessage};

/// Capacity of the page event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

const PAUSED_MESSAGE: &str = "Timer core unreachable. Tracking paused, reload to resume.";

/// Event sent by the browser shim, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageEvent {
    /// Full board snapshot, sent on load and after navigation.
    Snapshot { url: String, root: ElementSnapshot },
    /// Patches observed since the previous event, in order.
    Mutations { patches: Vec<DomPatch> },
    PointerDown { target: NodeId },
    PointerUp,
    /// A completed request of the page.
    Network(NetworkExchange),
}

/// Delayed pointer recheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Recheck {
    generation: u64,
    is_final: bool,
}

/// Counters reported when the pipeline stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub events: u64,
    pub detections: u64,
    pub rejected: u64,
    pub sent: u64,
    /// Messages dropped because the relay paused.
    pub dropped: u64,
    pub failed: u64,
}

pub struct Pipeline {
    profile: ServiceProfile,
    document: Option<Document>,
    ledger: StatusLedger,
    mutation: MutationDetector,
    pointer: PointerDetector,
    network: NetworkDetector,
    dedup: ChangeDeduplicator,
    relay: Relay,
    /// Timer keys the core reported as running at the last snapshot.
    active_keys: HashSet<String>,
    notices: mpsc::UnboundedSender<Notice>,
    pause_notified: bool,
    stats: PipelineStats,
}

impl Pipeline {
    /// Creates a pipeline for one service.
    ///
    /// Notices for the shim (e.g. tracking paused) are sent on `notices`.
    #[must_use]
    pub fn new(
        profile: ServiceProfile,
        ledger: StatusLedger,
        dedup: ChangeDeduplicator,
        relay: Relay,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        Self {
            mutation: MutationDetector::new(profile.clone()),
            pointer: PointerDetector::new(profile.clone()),
            network: NetworkDetector::new(profile.clone()),
            profile,
            document: None,
            ledger,
            dedup,
            relay,
            active_keys: HashSet::new(),
            notices,
            pause_notified: false,
            stats: PipelineStats::default(),
        }
    }

    /// Processes page events until the channel closes.
    ///
    /// Rechecks still pending at that point are dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<PageEvent>) -> PipelineStats {
        let (recheck_tx, mut rechecks) = mpsc::unbounded_channel();
        info!(service = %self.profile.service, "Detector pipeline running");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, &recheck_tx).await,
                    None => break,
                },
                Some(recheck) = rechecks.recv() => self.handle_recheck(recheck).await,
            }
        }

        info!(
            events = self.stats.events,
            sent = self.stats.sent,
            rejected = self.stats.rejected,
            "Detector pipeline stopped"
        );
        self.stats
    }

    async fn handle_event(&mut self, event: PageEvent, recheck_tx: &mpsc::UnboundedSender<Recheck>) {
        self.stats.events += 1;
        match event {
            PageEvent::Snapshot { url, root } => {
                let doc = Document::from_snapshot(url, root);
                debug!(url = %doc.url(), nodes = doc.len(), "Page snapshot");
                self.refresh_active_timers().await;
                let detections = self.mutation.scan(&doc, &mut self.ledger);
                self.document = Some(doc);
                self.dispatch(detections).await;
            }
            PageEvent::Mutations { patches } => {
                let Some(doc) = self.document.as_mut() else {
                    debug!("Mutations before first snapshot, ignoring");
                    return;
                };
                let mut records = Vec::new();
                for patch in patches {
                    match doc.apply(patch) {
                        Ok(applied) => records.extend(applied),
                        Err(e) => debug!(error = %e, "Skipping patch"),
                    }
                }
                let detections = self.mutation.process(doc, &records, &mut self.ledger);
                self.dispatch(detections).await;
            }
            PageEvent::PointerDown { target } => {
                if let Some(doc) = &self.document {
                    self.pointer.pointer_down(doc, target);
                }
            }
            PageEvent::PointerUp => {
                if let Some(generation) = self.pointer.pointer_up() {
                    schedule_rechecks(generation, recheck_tx);
                }
            }
            PageEvent::Network(exchange) => {
                let page_url = self.document.as_ref().map(|doc| doc.url().to_string());
                let detections = self.network.process(&exchange, page_url.as_deref(), &mut self.ledger);
                self.dispatch(detections).await;
            }
        }
    }

    async fn handle_recheck(&mut self, recheck: Recheck) {
        let Some(doc) = &self.document else {
            return;
        };
        match self
            .pointer
            .recheck(doc, recheck.generation, recheck.is_final, &mut self.ledger)
        {
            RecheckOutcome::Changed(observation) => {
                self.dispatch(vec![Detection::Changed(observation)]).await;
            }
            outcome => trace!(generation = recheck.generation, ?outcome, "Pointer recheck"),
        }
    }

    async fn dispatch(&mut self, detections: Vec<Detection>) {
        for detection in detections {
            self.stats.detections += 1;
            let observation = match detection {
                Detection::Initialized(snapshot) if self.active_keys.contains(snapshot.key()) => {
                    // A timer is running for a task seen for the first time
                    // in this session: let the core reconcile its status.
                    snapshot.observation(None, ObservationSource::DomMutation)
                }
                Detection::Initialized(snapshot) => {
                    self.deliver(snapshot.initialized_message()).await;
                    continue;
                }
                Detection::Changed(observation) => observation,
            };

            match self.dedup.accept(observation, Instant::now()) {
                Ok(observation) => {
                    info!(
                        task_id = %observation.task_id,
                        old_status = ?observation.old_status,
                        new_status = %observation.new_status,
                        source = %observation.source,
                        "Status change detected"
                    );
                    self.deliver(observation.into_message()).await;
                }
                Err(rejected) => {
                    self.stats.rejected += 1;
                    debug!(task_id = %rejected.task_id, reason = %rejected.reason, "Observation dropped");
                }
            }
        }
    }

    async fn deliver(&mut self, message: OutboundMessage) {
        match self.relay.send(&message).await {
            Ok(response) => {
                self.stats.sent += 1;
                trace!(kind = message.kind(), %response, "Message delivered");
            }
            Err(RelayError::Paused) => {
                self.stats.dropped += 1;
                trace!(kind = message.kind(), "Relay paused, message dropped");
            }
            Err(e @ RelayError::HostUnavailable { .. }) => {
                self.stats.dropped += 1;
                error!(error = %e, kind = message.kind(), "Message lost");
                self.notify_paused();
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!(error = %e, kind = message.kind(), "Message not accepted by core");
            }
        }
    }

    async fn refresh_active_timers(&mut self) {
        if self.relay.is_paused() {
            return;
        }
        match self.relay.active_timers().await {
            Ok(timers) => {
                self.active_keys = timers
                    .into_iter()
                    .flat_map(|timer| [timer.timer_key, timer.task_id])
                    .collect();
                debug!(active = self.active_keys.len(), "Active timers refreshed");
            }
            Err(e @ RelayError::HostUnavailable { .. }) => {
                error!(error = %e, "Could not query active timers");
                self.notify_paused();
            }
            Err(e) => warn!(error = %e, "Could not query active timers"),
        }
    }

    fn notify_paused(&mut self) {
        if self.pause_notified {
            return;
        }
        self.pause_notified = true;
        let notice = Notice::TrackingPaused {
            message: PAUSED_MESSAGE.to_string(),
        };
        if self.notices.send(notice).is_err() {
            debug!("Notice receiver closed");
        }
    }
}

fn schedule_rechecks(generation: u64, recheck_tx: &mpsc::UnboundedSender<Recheck>) {
    let last = RECHECK_DELAYS_MS.len() - 1;
    for (attempt, delay_ms) in RECHECK_DELAYS_MS.into_iter().enumerate() {
        let tx = recheck_tx.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(delay_ms)).await;
            // The loop may have stopped in the meantime.
            let _ = tx.send(Recheck {
                generation,
                is_final: attempt == last,
            });
        });
    }
}

/// Parses one NDJSON line into a page event.
///
/// # Errors
///
/// Returns `DetectorError::Json` if the line is not a valid page event.
pub fn parse_page_event(line: &str) -> Result<PageEvent, DetectorError> {
    Ok(serde_json::from_str(line)?)
}

/// Reads page events line by line and forwards them to the pipeline.
///
/// Blank and malformed lines are skipped. Returns the number of forwarded
/// events once the reader is exhausted or the pipeline has stopped.
///
/// # Errors
///
/// Returns `DetectorError::Io` if reading fails.
pub async fn forward_page_events<R>(reader: R, events: mpsc::Sender<PageEvent>) -> Result<u64, DetectorError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_page_event(&line) {
            Ok(event) => {
                if events.send(event).await.is_err() {
                    debug!("Pipeline stopped, no longer reading page events");
                    break;
                }
                forwarded += 1;
            }
            Err(e) => warn!(error = %e, "Malformed page event, skipping"),
        }
    }
    Ok(forwarded)
}

/// Writes notices as NDJSON until all senders are dropped.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub async fn write_notices<W>(mut notices: mpsc::UnboundedReceiver<Notice>, mut writer: W) -> Result<(), DetectorError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(notice) = notices.recv().await {
        let mut line = serde_json::to_vec(&notice)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_events_parse_from_shim_json() {
        let event = parse_page_event(r#"{"type":"pointerDown","target":42}"#).unwrap();
        assert_eq!(event, PageEvent::PointerDown { target: NodeId(42) });

        let event = parse_page_event(r#"{"type":"pointerUp"}"#).unwrap();
        assert_eq!(event, PageEvent::PointerUp);

        let event = parse_page_event(
            r#"{"type":"network","url":"https://acme.backlog.com/api/v2/issues/1","method":"PATCH","status":200,"responseBody":"{}"}"#,
        )
        .unwrap();
        assert!(matches!(event, PageEvent::Network(ref ex) if ex.method == "PATCH"));

        let event = parse_page_event(
            r#"{"type":"mutations","patches":[{"op":"remove","node":5},{"op":"setText","node":6,"text":"完了"}]}"#,
        )
        .unwrap();
        assert!(matches!(event, PageEvent::Mutations { ref patches } if patches.len() == 2));
    }

    #[test]
    fn unknown_event_type_is_an_error() {
        assert!(matches!(
            parse_page_event(r#"{"type":"scroll"}"#),
            Err(DetectorError::Json(_))
        ));
    }

    #[tokio::test]
    async fn forwarding_skips_blank_and_malformed_lines() {
        let input = b"{\"type\":\"pointerUp\"}\n\nnot json\n{\"type\":\"pointerDown\",\"target\":1}\n";
        let (tx, mut rx) = mpsc::channel(8);

        let forwarded = forward_page_events(&input[..], tx).await.unwrap();
        assert_eq!(forwarded, 2);
        assert_eq!(rx.recv().await, Some(PageEvent::PointerUp));
        assert_eq!(rx.recv().await, Some(PageEvent::PointerDown { target: NodeId(1) }));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn notices_are_written_as_lines() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Notice::TrackingPaused {
            message: "paused".to_string(),
        })
        .unwrap();
        drop(tx);

        let mut out = Vec::new();
        write_notices(rx, &mut out).await.unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "{\"type\":\"trackingPaused\",\"message\":\"paused\"}\n"
        );
    }
}
