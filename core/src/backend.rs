//! Storage backend boundary: durable, per-aggregate commit persistence.
//!
//! The commit store delegates durability to an implementation of
//! [`StorageBackend`]. The backend owns exactly one hard guarantee: the
//! version check and the append are a single atomic operation per aggregate
//! id. There is no read-then-write window, so concurrent writers against the
//! same id cannot both succeed from the same base version.
//!
//! # Implementations
//!
//! - `InMemoryBackend` (in `commitstream-testing`): fast, deterministic tests
//! - Production backends (SQL, log-structured stores, ...) live outside this
//!   workspace behind this trait
//!
//! # Dyn Compatibility
//!
//! This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` to enable trait object usage (`Arc<dyn StorageBackend>`).

use crate::commit::Commit;
use crate::stream::{AggregateId, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A backend failure: the operation did not take effect.
///
/// Backends must never partially apply an append — either the commit is
/// fully durable or this error is returned and nothing was stored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Storage backend failure: {0}")]
pub struct BackendError(String);

impl BackendError {
    /// Create a new backend error with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Result of an atomic check-and-append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The version matched and the commit is durable.
    Committed,
    /// Another writer committed in between; nothing was stored.
    Conflict {
        /// The stream's actual current version at check time.
        actual: Version,
    },
}

/// Append-only, per-aggregate-id commit storage with compare-and-append
/// semantics.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; different aggregate ids may be
/// appended and read fully in parallel.
pub trait StorageBackend: Send + Sync {
    /// The latest known version for an aggregate id.
    ///
    /// An id with no commits is at [`Version::INITIAL`] (not an error).
    fn latest_version<'a>(
        &'a self,
        aggregate_id: &'a AggregateId,
    ) -> BackendFuture<'a, Result<Version, BackendError>>;

    /// Atomically append `commit` if the stream's current version equals
    /// `commit.base_version()`.
    ///
    /// The expected version is read from the commit itself: a commit
    /// already names the aggregate id and the base version it was built
    /// against, so separate arguments could only disagree with it.
    ///
    /// Returns [`AppendOutcome::Conflict`] when the check fails; returns
    /// [`BackendError`] when the backend itself failed, in which case the
    /// commit must not be visible to any reader.
    fn append_if_version_matches(
        &self,
        commit: Commit,
    ) -> BackendFuture<'_, Result<AppendOutcome, BackendError>>;

    /// Read up to `limit` commits for `aggregate_id`, in strictly
    /// increasing `base_version` order, starting at the first commit whose
    /// `base_version >= from_version`.
    ///
    /// An id with no commits yields an empty batch (not an error).
    fn read_commits<'a>(
        &'a self,
        aggregate_id: &'a AggregateId,
        from_version: Version,
        limit: usize,
    ) -> BackendFuture<'a, Result<Vec<Commit>, BackendError>>;
}
