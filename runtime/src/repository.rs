//! Repository: load-by-replay and save-as-commit orchestration for one
//! aggregate type.
//!
//! `load` reads the full commit stream and replays every event through the
//! aggregate's handler table; `save` extracts the staged events into a
//! commit, appends it under the optimistic concurrency check, and — only
//! after the append has succeeded — clears the staged events and hands the
//! commit to the publisher.

use crate::commit_store::{CommitStore, CommitStoreError};
use crate::publisher::{CommitPublisher, PublishReport};
use commitstream_core::aggregate::{AggregateError, AggregateRoot, AggregateState};
use commitstream_core::backend::StorageBackend;
use commitstream_core::commit::Commit;
use commitstream_core::stream::{AggregateId, Version};
use futures::TryStreamExt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by repository operations.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Load of an id with no commit history. Loading is not
    /// create-if-absent; construct a fresh [`AggregateRoot`] instead.
    #[error("Aggregate not found: {0}")]
    AggregateNotFound(AggregateId),

    /// The stored stream is not contiguous: a commit's base version does
    /// not line up with the events replayed so far.
    #[error(
        "Corrupt commit stream for '{aggregate_id}': commit at base version {found} \
         does not follow replayed version {expected}"
    )]
    CorruptStream {
        /// The aggregate whose stream is corrupt.
        aggregate_id: AggregateId,
        /// The version replay had reached.
        expected: Version,
        /// The out-of-place commit's base version.
        found: Version,
    },

    /// A commit store failure (concurrency conflict or storage outage),
    /// propagated unchanged.
    #[error(transparent)]
    Store(#[from] CommitStoreError),

    /// An event could not be applied during replay.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl RepositoryError {
    /// Whether this error is an optimistic concurrency conflict (safe to
    /// retry after a fresh load).
    #[must_use]
    pub const fn is_concurrency(&self) -> bool {
        matches!(self, Self::Store(CommitStoreError::Concurrency { .. }))
    }
}

/// Result of a non-empty save: the durable commit and its publish report.
#[derive(Debug)]
pub struct SaveOutcome {
    /// The commit as durably stored.
    pub commit: Commit,
    /// Delivery results for the commit's events.
    pub publish: PublishReport,
}

/// Load/save orchestration for aggregates of state type `S`.
///
/// Cloning is cheap; store and publisher are shared.
pub struct Repository<S, B> {
    store: Arc<CommitStore<B>>,
    publisher: Arc<CommitPublisher>,
    _state: PhantomData<fn() -> S>,
}

impl<S, B> Clone for Repository<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            publisher: Arc::clone(&self.publisher),
            _state: PhantomData,
        }
    }
}

impl<S, B> Repository<S, B>
where
    S: AggregateState,
    B: StorageBackend + 'static,
{
    /// Create a repository over the given commit store and publisher.
    #[must_use]
    pub const fn new(store: Arc<CommitStore<B>>, publisher: Arc<CommitPublisher>) -> Self {
        Self {
            store,
            publisher,
            _state: PhantomData,
        }
    }

    /// Rehydrate an aggregate by replaying its full commit stream.
    ///
    /// Replay is read-only and side-effect-free: nothing is published and
    /// the returned aggregate has no staged events. Two loads with no
    /// intervening writes return equal state and version.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::AggregateNotFound`] if the id has no commits.
    /// - [`RepositoryError::CorruptStream`] if the stored commits are not
    ///   contiguous.
    /// - [`RepositoryError::Store`] on storage failure, and
    ///   [`RepositoryError::Aggregate`] if a stored event has no handler.
    pub async fn load(&self, aggregate_id: &AggregateId) -> Result<AggregateRoot<S>, RepositoryError> {
        let mut commits = self
            .store
            .read_stream(aggregate_id.clone(), Version::INITIAL);

        let mut root = AggregateRoot::new(aggregate_id.clone());
        let mut found_any = false;
        while let Some(commit) = commits.try_next().await? {
            found_any = true;
            if commit.base_version() != root.version() {
                return Err(RepositoryError::CorruptStream {
                    aggregate_id: aggregate_id.clone(),
                    expected: root.version(),
                    found: commit.base_version(),
                });
            }
            for event in commit.events() {
                root.apply_recorded(event)?;
            }
        }

        if !found_any {
            return Err(RepositoryError::AggregateNotFound(aggregate_id.clone()));
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            aggregate_type = S::AGGREGATE_TYPE,
            version = %root.version(),
            "aggregate loaded"
        );
        Ok(root)
    }

    /// Persist the aggregate's staged events as one commit, then publish
    /// them.
    ///
    /// A save with no staged events is a no-op returning `Ok(None)` — no
    /// empty commit is ever written. Otherwise the commit's base version is
    /// `aggregate.version - staged.len()` (the version before the batch was
    /// staged). On success the staged events are cleared and the commit is
    /// published; the publish report never fails the save.
    ///
    /// # Errors
    ///
    /// On [`CommitStoreError::Concurrency`] the save is abandoned entirely:
    /// the staged events remain on the aggregate so the caller can reload,
    /// re-derive the business operation against the fresher state, and
    /// retry. The same staged events must not be blindly re-appended
    /// against a new base version. Storage failures propagate unchanged.
    pub async fn save(
        &self,
        aggregate: &mut AggregateRoot<S>,
    ) -> Result<Option<SaveOutcome>, RepositoryError> {
        self.save_with_metadata(aggregate, None).await
    }

    /// Like [`save`](Self::save), attaching opaque metadata to the commit.
    ///
    /// # Errors
    ///
    /// Same as [`save`](Self::save).
    pub async fn save_with_metadata(
        &self,
        aggregate: &mut AggregateRoot<S>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Option<SaveOutcome>, RepositoryError> {
        if !aggregate.has_uncommitted_events() {
            return Ok(None);
        }

        let staged = aggregate.uncommitted_events().to_vec();
        let base_version = aggregate.version() - staged.len() as u64;
        let commit = self
            .store
            .append(aggregate.id().clone(), base_version, staged, metadata)
            .await?;

        aggregate.clear_uncommitted_events();

        let publish = self.publisher.publish(&commit).await;
        Ok(Some(SaveOutcome { commit, publish }))
    }
}
