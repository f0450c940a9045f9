//! Commit store: append-only, per-aggregate commit log with an optimistic
//! concurrency guard.
//!
//! The store builds the immutable [`Commit`] (stamping `committed_at`
//! through the injected [`Clock`]) and delegates durability to a
//! [`StorageBackend`]. The backend's compare-and-append is the single
//! system-wide serialization point: the version check and the write are one
//! atomic operation per aggregate id.

use async_stream::try_stream;
use commitstream_core::backend::{AppendOutcome, BackendError, StorageBackend};
use commitstream_core::commit::{Commit, EmptyCommit};
use commitstream_core::environment::Clock;
use commitstream_core::event::RecordedEvent;
use commitstream_core::stream::{AggregateId, Version};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// How many commits each backend read requests while streaming.
const READ_BATCH: usize = 64;

/// Errors surfaced by commit store operations.
#[derive(Error, Debug)]
pub enum CommitStoreError {
    /// Optimistic concurrency conflict: another writer committed in
    /// between. Safe to retry after a fresh load.
    #[error(
        "Concurrency conflict on '{aggregate_id}': expected version {expected}, found {actual}"
    )]
    Concurrency {
        /// The aggregate the conflicting append targeted.
        aggregate_id: AggregateId,
        /// The base version the append was built against.
        expected: Version,
        /// The stream's actual current version.
        actual: Version,
    },

    /// The storage backend failed; nothing was stored. Propagated
    /// unmodified — retry policy is owned by the caller.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] BackendError),

    /// An append was attempted with no events.
    #[error(transparent)]
    EmptyCommit(#[from] EmptyCommit),
}

impl CommitStoreError {
    /// Whether this error is a concurrency conflict (retryable after a
    /// fresh load).
    #[must_use]
    pub const fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

/// Lazy, finite, restartable sequence of commits for one aggregate id, in
/// strictly increasing `base_version` order.
///
/// Restart by calling [`CommitStore::read_stream`] again; each stream pages
/// from the backend on demand.
pub type CommitStream = Pin<Box<dyn Stream<Item = Result<Commit, CommitStoreError>> + Send>>;

/// Append-only commit log over a storage backend.
///
/// Cloning is cheap; backend and clock are shared.
pub struct CommitStore<B> {
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
}

impl<B> Clone for CommitStore<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<B: StorageBackend + 'static> CommitStore<B> {
    /// Create a commit store over the given backend and clock.
    #[must_use]
    pub fn new(backend: Arc<B>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// Durably append a batch of events as one commit.
    ///
    /// The append succeeds only if the stream's current version equals
    /// `base_version`; the check and the write are atomic in the backend.
    /// On success the stream's latest version advances to
    /// `base_version + events.len()`.
    ///
    /// # Errors
    ///
    /// - [`CommitStoreError::EmptyCommit`] if `events` is empty (no empty
    ///   commit is ever written).
    /// - [`CommitStoreError::Concurrency`] if another writer committed in
    ///   between; retry after a fresh load.
    /// - [`CommitStoreError::StorageUnavailable`] on backend failure;
    ///   either the commit is fully durable or nothing was stored.
    pub async fn append(
        &self,
        aggregate_id: AggregateId,
        base_version: Version,
        events: Vec<RecordedEvent>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Commit, CommitStoreError> {
        let event_count = events.len();
        let commit = Commit::new(
            aggregate_id.clone(),
            base_version,
            events,
            self.clock.now(),
            metadata,
        )?;

        match self.backend.append_if_version_matches(commit.clone()).await {
            Ok(AppendOutcome::Committed) => {
                metrics::counter!("commitstream.commits_appended").increment(1);
                metrics::counter!("commitstream.events_appended").increment(event_count as u64);
                tracing::debug!(
                    aggregate_id = %aggregate_id,
                    base_version = %base_version,
                    events = event_count,
                    "commit appended"
                );
                Ok(commit)
            }
            Ok(AppendOutcome::Conflict { actual }) => {
                metrics::counter!("commitstream.append_conflicts").increment(1);
                tracing::debug!(
                    aggregate_id = %aggregate_id,
                    expected = %base_version,
                    actual = %actual,
                    "append conflict"
                );
                Err(CommitStoreError::Concurrency {
                    aggregate_id,
                    expected: base_version,
                    actual,
                })
            }
            Err(error) => {
                tracing::error!(
                    aggregate_id = %aggregate_id,
                    error = %error,
                    "backend append failed"
                );
                Err(CommitStoreError::StorageUnavailable(error))
            }
        }
    }

    /// The latest known version for an aggregate id (0 for unknown ids).
    ///
    /// # Errors
    ///
    /// Returns [`CommitStoreError::StorageUnavailable`] on backend failure.
    pub async fn latest_version(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Version, CommitStoreError> {
        Ok(self.backend.latest_version(aggregate_id).await?)
    }

    /// Stream the commits for `aggregate_id`, starting at the first commit
    /// whose `base_version >= from_version`.
    ///
    /// An id with no commits produces an empty stream (not an error). The
    /// stream is lazy — commits are paged from the backend as the caller
    /// polls — and restartable by calling this method again.
    #[must_use]
    pub fn read_stream(&self, aggregate_id: AggregateId, from_version: Version) -> CommitStream {
        let backend = Arc::clone(&self.backend);
        Box::pin(try_stream! {
            let mut cursor = from_version;
            loop {
                let batch = backend
                    .read_commits(&aggregate_id, cursor, READ_BATCH)
                    .await
                    .map_err(CommitStoreError::StorageUnavailable)?;
                let exhausted = batch.len() < READ_BATCH;
                for commit in batch {
                    cursor = commit.resulting_version();
                    yield commit;
                }
                if exhausted {
                    break;
                }
            }
        })
    }
}
