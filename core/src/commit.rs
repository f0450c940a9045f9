//! The commit: one durable, atomically-appended batch of events.
//!
//! A commit is the unit of truth in the system. It is created exactly once
//! per successful append and never mutated afterwards; aggregate state only
//! truly lives in the sequence of commits recorded for its id.

use crate::event::RecordedEvent;
use crate::stream::{AggregateId, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when constructing a commit with no events.
///
/// Empty commits are never written; the repository treats a save with no
/// staged events as a no-op well before a commit is built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("A commit must contain at least one event")]
pub struct EmptyCommit;

/// An immutable batch of events appended to one aggregate's stream.
///
/// `base_version` is the aggregate's version *before* the commit's events
/// are applied; the version after the commit is
/// [`resulting_version`](Commit::resulting_version) = `base_version + events.len()`.
///
/// # Examples
///
/// ```
/// use commitstream_core::commit::Commit;
/// use commitstream_core::event::RecordedEvent;
/// use commitstream_core::stream::{AggregateId, Version};
/// use chrono::Utc;
///
/// let events = vec![RecordedEvent::new("OrderPlaced.v1".to_string(), vec![1, 2], None)];
/// let commit = Commit::new(
///     AggregateId::new("order-1"),
///     Version::INITIAL,
///     events,
///     Utc::now(),
///     None,
/// ).unwrap();
///
/// assert_eq!(commit.resulting_version(), Version::new(1));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    aggregate_id: AggregateId,
    base_version: Version,
    events: Vec<RecordedEvent>,
    committed_at: DateTime<Utc>,
    metadata: Option<serde_json::Value>,
}

impl Commit {
    /// Build a commit from an ordered, non-empty event batch.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyCommit`] if `events` is empty.
    pub fn new(
        aggregate_id: AggregateId,
        base_version: Version,
        events: Vec<RecordedEvent>,
        committed_at: DateTime<Utc>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EmptyCommit> {
        if events.is_empty() {
            return Err(EmptyCommit);
        }
        Ok(Self {
            aggregate_id,
            base_version,
            events,
            committed_at,
            metadata,
        })
    }

    /// The aggregate this commit belongs to.
    #[must_use]
    pub const fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    /// The aggregate version this commit was applied against.
    #[must_use]
    pub const fn base_version(&self) -> Version {
        self.base_version
    }

    /// The events of this commit, in application order.
    #[must_use]
    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    /// The aggregate version after this commit: `base_version + events.len()`.
    #[must_use]
    pub fn resulting_version(&self) -> Version {
        self.base_version + self.events.len() as u64
    }

    /// When the commit was durably stored.
    #[must_use]
    pub const fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    /// Optional opaque commit metadata.
    #[must_use]
    pub const fn metadata(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref()
    }
}
