//! kanbantime detector - kanban board status change detection.
//!
//! This crate watches a Backlog or GitHub Projects board through a small
//! page protocol and reports task status transitions to the kanbantime
//! timer core.
//!
//! # Overview
//!
//! A thin browser shim serializes the board once and then streams DOM
//! patches, pointer gestures and completed network requests as
//! newline-delimited JSON. The [`pipeline`] keeps a [`dom::Document`] in
//! sync with those events and runs three independent detectors over it.
//! Their observations are deduplicated per task and relayed to the core,
//! which owns every timer decision.
//!
//! # Modules
//!
//! - [`types`]: Wire messages exchanged with the timer core
//! - [`dom`]: Arena page model and patch application
//! - [`selectors`]: Per-service marker tables
//! - [`identity`]: Task identity resolution
//! - [`status`]: Status extraction and normalization
//! - [`detectors`]: DOM mutation, pointer and network detectors
//! - [`dedup`]: Per-task change deduplication
//! - [`relay`]: HTTP client for the core with retry and pause
//! - [`pipeline`]: Single-owner event loop tying it all together
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for detector operations

pub mod config;
pub mod dedup;
pub mod detectors;
pub mod dom;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod relay;
pub mod selectors;
pub mod status;
pub mod types;

pub use config::Config;
pub use dedup::{ChangeDeduplicator, RejectReason, Rejected, DEFAULT_DEBOUNCE_MS};
pub use detectors::{Detection, Observation, ObservationSource, StatusLedger};
pub use dom::{Document, DomPatch, ElementSnapshot, NodeId};
pub use error::{DetectorError, Result};
pub use identity::{resolve, RawTaskFields, TaskIdentity};
pub use pipeline::{PageEvent, Pipeline, PipelineStats};
pub use relay::{Relay, RelayConfig, RelayError, RetryPolicy};
pub use selectors::ServiceProfile;
pub use types::{OutboundMessage, Service};
