//! kanbantime server - the local timer core.
//!
//! This crate owns everything that happens after a status change has been
//! detected on a kanban board:
//! - Classifying each change with the configured start statuses ([`policy`])
//! - Starting and stopping timers and logging completed sessions ([`store`])
//! - Daily and weekly totals per task ([`summary`])
//! - Durable storage of settings, logs and running timers ([`persistence`])
//! - Serving the message interface over local HTTP ([`routes`])
//! - Notifying the banner layer of timer transitions ([`broadcast`])
//!
//! # Architecture
//!
//! [`tracker::TrackerService`] is the single owner of timer state. Every
//! message is applied under one lock in arrival order; the in-memory state
//! is authoritative and written through to a [`persistence::KvStore`].

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod messages;
pub mod persistence;
pub mod policy;
pub mod routes;
pub mod store;
pub mod summary;
pub mod tracker;
pub mod types;
