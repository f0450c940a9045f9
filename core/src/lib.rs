//! # Commitstream Core
//!
//! Core traits and types for the commitstream event-sourcing architecture.
//!
//! This crate provides the fundamental abstractions for the write side of an
//! event-sourced system: aggregates whose state is derived from an ordered
//! event history, commits as the durable unit of truth, and the trait
//! boundaries to the storage backend and the event-delivery transport.
//!
//! ## Core Concepts
//!
//! - **Aggregate**: a versioned state machine that applies and stages domain events
//! - **Commit**: one durable, atomically-appended batch of events for one aggregate
//! - **Optimistic concurrency**: conflicts detected at append time via a version check
//! - **Replay**: state reconstruction by reapplying the full commit history in order
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐  emit    ┌────────────────────┐
//! │  Domain code  │─────────►│  AggregateRoot<S>  │
//! └───────────────┘          │  (staged events)   │
//!                            └─────────┬──────────┘
//!                                      │ save (commitstream-runtime)
//!                                      ▼
//!                            ┌────────────────────┐
//!                            │   StorageBackend   │◄── atomic check-and-append
//!                            └─────────┬──────────┘
//!                                      │ durable commit
//!                                      ▼
//!                            ┌────────────────────┐
//!                            │   EventHandler(s)  │◄── post-append delivery
//!                            └────────────────────┘
//! ```
//!
//! The orchestration pieces (commit store, repository, publisher, process
//! manager) live in `commitstream-runtime`; in-memory test doubles live in
//! `commitstream-testing`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod backend;
pub mod commit;
pub mod environment;
pub mod event;
pub mod handler;
pub mod stream;
pub mod value_object;
