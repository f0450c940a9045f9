//! # Commitstream Runtime
//!
//! Orchestration layer for the commitstream event-sourcing architecture.
//!
//! This crate wires the `commitstream-core` boundaries into the write-side
//! consistency protocol:
//!
//! - **`CommitStore`**: builds commits and delegates the atomic
//!   check-and-append to a storage backend
//! - **`CommitPublisher`**: distributes the events of durable commits to
//!   subscribed handlers, in causal order per aggregate
//! - **`Repository`**: loads aggregates by replay and saves them as commits
//! - **`ProcessManager`**: correlates published events into persisted,
//!   event-sourced process state machines
//!
//! ## Control Flow
//!
//! ```text
//! ┌─────────────┐ emit  ┌───────────────┐ save  ┌──────────────┐
//! │ Domain code │──────►│ AggregateRoot │──────►│  Repository  │
//! └─────────────┘       └───────────────┘       └──────┬───────┘
//!                                                      │ append
//!                                                      ▼
//!                                               ┌──────────────┐
//!                                               │ CommitStore  │◄── optimistic
//!                                               └──────┬───────┘    concurrency
//!                                                      │ durable commit
//!                                                      ▼
//!                                               ┌───────────────┐
//!                                               │CommitPublisher│
//!                                               └──────┬────────┘
//!                                                 ┌────┴────┐
//!                                                 ▼         ▼
//!                                            ┌────────┐ ┌─────────┐
//!                                            │Handlers│ │ Process │
//!                                            │        │ │ Manager │──► commands
//!                                            └────────┘ └─────────┘
//! ```
//!
//! A save only publishes after the append has returned success; a publish
//! failure (or a cancelled publish) never undoes the durable commit.
//! Recovery from missed publishes is the explicit
//! [`CommitPublisher::republish_from`](publisher::CommitPublisher::republish_from)
//! operation, never implicit.

use chrono::{DateTime, Utc};
use commitstream_core::environment::Clock;

pub mod commit_store;
pub mod dead_letter;
pub mod process_manager;
pub mod publisher;
pub mod repository;
pub mod retry;

pub use commit_store::{CommitStore, CommitStoreError, CommitStream};
pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use process_manager::{
    CommandDispatcher, CommandEnvelope, CompletedProcessPolicy, DispatchError, ProcessDefinition,
    ProcessError, ProcessManager, ProcessState,
};
pub use publisher::{CommitPublisher, HandlerDeliveryError, PublishReport};
pub use repository::{Repository, RepositoryError, SaveOutcome};
pub use retry::{RetryPolicy, retry_with_predicate};

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
