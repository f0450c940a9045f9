//! # Commitstream Testing
//!
//! Testing utilities and in-memory doubles for the commitstream
//! architecture.
//!
//! This crate provides:
//! - `InMemoryBackend`: a storage backend with real compare-and-append
//!   semantics, for fast, deterministic tests
//! - `FlakyBackend`: a failure-injecting wrapper for exercising
//!   storage-unavailable paths
//! - `FixedClock` / `test_clock()`: deterministic time
//! - `RecordingHandler` / `FailingHandler`: publish subscribers that
//!   capture deliveries or fail them
//!
//! ## Example
//!
//! ```ignore
//! use commitstream_testing::mocks::{InMemoryBackend, test_clock};
//! use commitstream_runtime::CommitStore;
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_append() {
//!     let store = CommitStore::new(
//!         Arc::new(InMemoryBackend::new()),
//!         Arc::new(test_clock()),
//!     );
//!     // ...
//! }
//! ```

use chrono::{DateTime, Utc};
use commitstream_core::environment::Clock;

/// In-memory doubles for the commitstream trait boundaries.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use commitstream_core::backend::{
        AppendOutcome, BackendError, BackendFuture, StorageBackend,
    };
    use commitstream_core::commit::Commit;
    use commitstream_core::event::RecordedEvent;
    use commitstream_core::handler::{EventHandler, HandlerError, HandlerFuture};
    use commitstream_core::stream::{AggregateId, Version};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fixed clock for deterministic tests.
    ///
    /// Always returns the same time, making commit timestamps reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use commitstream_testing::mocks::FixedClock;
    /// use commitstream_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// In-memory storage backend with real compare-and-append semantics.
    ///
    /// One mutex guards the whole id → commits map, so the version check
    /// and the append are a single atomic operation per aggregate id —
    /// the same guarantee production backends must provide.
    #[derive(Debug, Default)]
    pub struct InMemoryBackend {
        streams: Mutex<HashMap<AggregateId, Vec<Commit>>>,
    }

    impl InMemoryBackend {
        /// Create an empty backend.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of commits stored for an aggregate id.
        #[must_use]
        pub fn commit_count(&self, aggregate_id: &AggregateId) -> usize {
            self.streams
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(aggregate_id)
                .map_or(0, Vec::len)
        }

        /// Snapshot of the commits stored for an aggregate id.
        #[must_use]
        pub fn commits(&self, aggregate_id: &AggregateId) -> Vec<Commit> {
            self.streams
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(aggregate_id)
                .cloned()
                .unwrap_or_default()
        }

        fn current_version(commits: &[Commit]) -> Version {
            commits
                .last()
                .map_or(Version::INITIAL, Commit::resulting_version)
        }
    }

    impl StorageBackend for InMemoryBackend {
        fn latest_version<'a>(
            &'a self,
            aggregate_id: &'a AggregateId,
        ) -> BackendFuture<'a, Result<Version, BackendError>> {
            Box::pin(async move {
                let streams = self
                    .streams
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                Ok(streams
                    .get(aggregate_id)
                    .map_or(Version::INITIAL, |commits| Self::current_version(commits)))
            })
        }

        fn append_if_version_matches(
            &self,
            commit: Commit,
        ) -> BackendFuture<'_, Result<AppendOutcome, BackendError>> {
            Box::pin(async move {
                // The lock spans check and append: no read-then-write window.
                let mut streams = self
                    .streams
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                let commits = streams.entry(commit.aggregate_id().clone()).or_default();

                let actual = Self::current_version(commits);
                if actual != commit.base_version() {
                    return Ok(AppendOutcome::Conflict { actual });
                }

                commits.push(commit);
                Ok(AppendOutcome::Committed)
            })
        }

        fn read_commits<'a>(
            &'a self,
            aggregate_id: &'a AggregateId,
            from_version: Version,
            limit: usize,
        ) -> BackendFuture<'a, Result<Vec<Commit>, BackendError>> {
            Box::pin(async move {
                let streams = self
                    .streams
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                Ok(streams.get(aggregate_id).map_or_else(Vec::new, |commits| {
                    commits
                        .iter()
                        .filter(|commit| commit.base_version() >= from_version)
                        .take(limit)
                        .cloned()
                        .collect()
                }))
            })
        }
    }

    /// Failure-injecting wrapper around another backend.
    ///
    /// Arms a number of upcoming appends and/or reads to fail with
    /// [`BackendError`], then passes operations through unchanged.
    #[derive(Debug)]
    pub struct FlakyBackend<B = InMemoryBackend> {
        inner: B,
        failing_appends: AtomicUsize,
        failing_reads: AtomicUsize,
    }

    impl<B: StorageBackend> FlakyBackend<B> {
        /// Wrap a backend with no failures armed.
        #[must_use]
        pub const fn new(inner: B) -> Self {
            Self {
                inner,
                failing_appends: AtomicUsize::new(0),
                failing_reads: AtomicUsize::new(0),
            }
        }

        /// Make the next `count` appends fail.
        pub fn fail_next_appends(&self, count: usize) {
            self.failing_appends.store(count, Ordering::SeqCst);
        }

        /// Make the next `count` reads fail.
        pub fn fail_next_reads(&self, count: usize) {
            self.failing_reads.store(count, Ordering::SeqCst);
        }

        fn take_failure(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                    remaining.checked_sub(1)
                })
                .is_ok()
        }
    }

    impl<B: StorageBackend> StorageBackend for FlakyBackend<B> {
        fn latest_version<'a>(
            &'a self,
            aggregate_id: &'a AggregateId,
        ) -> BackendFuture<'a, Result<Version, BackendError>> {
            self.inner.latest_version(aggregate_id)
        }

        fn append_if_version_matches(
            &self,
            commit: Commit,
        ) -> BackendFuture<'_, Result<AppendOutcome, BackendError>> {
            if Self::take_failure(&self.failing_appends) {
                return Box::pin(async { Err(BackendError::new("injected append failure")) });
            }
            self.inner.append_if_version_matches(commit)
        }

        fn read_commits<'a>(
            &'a self,
            aggregate_id: &'a AggregateId,
            from_version: Version,
            limit: usize,
        ) -> BackendFuture<'a, Result<Vec<Commit>, BackendError>> {
            if Self::take_failure(&self.failing_reads) {
                return Box::pin(async { Err(BackendError::new("injected read failure")) });
            }
            self.inner.read_commits(aggregate_id, from_version, limit)
        }
    }

    /// Publish subscriber that records every delivery, in delivery order.
    ///
    /// An optional per-delivery delay widens race windows in ordering
    /// tests.
    #[derive(Debug)]
    pub struct RecordingHandler {
        name: String,
        delay: Option<Duration>,
        deliveries: Mutex<Vec<(AggregateId, RecordedEvent)>>,
    }

    impl RecordingHandler {
        /// Create a recording handler with the given name.
        #[must_use]
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                delay: None,
                deliveries: Mutex::new(Vec::new()),
            }
        }

        /// Create a recording handler that sleeps before recording each
        /// delivery.
        #[must_use]
        pub fn with_delay(name: impl Into<String>, delay: Duration) -> Self {
            Self {
                name: name.into(),
                delay: Some(delay),
                deliveries: Mutex::new(Vec::new()),
            }
        }

        /// Number of deliveries recorded.
        #[must_use]
        pub fn len(&self) -> usize {
            self.deliveries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .len()
        }

        /// Whether nothing was delivered.
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// The event type tags of all deliveries, in order.
        #[must_use]
        pub fn event_types(&self) -> Vec<String> {
            self.deliveries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .map(|(_, event)| event.event_type().to_string())
                .collect()
        }

        /// Snapshot of all deliveries, in order.
        #[must_use]
        pub fn deliveries(&self) -> Vec<(AggregateId, RecordedEvent)> {
            self.deliveries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
        }
    }

    impl EventHandler for RecordingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle<'a>(
            &'a self,
            aggregate_id: &'a AggregateId,
            event: &'a RecordedEvent,
        ) -> HandlerFuture<'a> {
            Box::pin(async move {
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.deliveries
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push((aggregate_id.clone(), event.clone()));
                Ok(())
            })
        }
    }

    /// Publish subscriber that fails every delivery.
    #[derive(Debug)]
    pub struct FailingHandler {
        name: String,
    }

    impl FailingHandler {
        /// Create a failing handler with the given name.
        #[must_use]
        pub fn new(name: impl Into<String>) -> Self {
            Self { name: name.into() }
        }
    }

    impl EventHandler for FailingHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn handle<'a>(
            &'a self,
            _aggregate_id: &'a AggregateId,
            _event: &'a RecordedEvent,
        ) -> HandlerFuture<'a> {
            Box::pin(async move { Err(HandlerError::new(format!("{} always fails", self.name))) })
        }
    }

}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::mocks::*;
    use commitstream_core::backend::{AppendOutcome, StorageBackend};
    use commitstream_core::commit::Commit;
    use commitstream_core::event::RecordedEvent;
    use commitstream_core::stream::{AggregateId, Version};
    use chrono::Utc;
    use commitstream_core::environment::Clock;

    #[allow(clippy::expect_used)] // Panics: fixture commits are never empty
    fn commit_at(id: &AggregateId, base: u64) -> Commit {
        Commit::new(
            id.clone(),
            Version::new(base),
            vec![RecordedEvent::new("E.v1".to_string(), vec![0], None)],
            Utc::now(),
            None,
        )
        .expect("non-empty commit")
    }

    #[test]
    fn fixed_clock_is_fixed() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Panics: Test will fail on backend errors
    async fn in_memory_backend_checks_and_appends_atomically() {
        let backend = InMemoryBackend::new();
        let id = AggregateId::new("a-1");

        let outcome = backend
            .append_if_version_matches(commit_at(&id, 0))
            .await
            .expect("append should succeed");
        assert_eq!(outcome, AppendOutcome::Committed);

        // A stale append reports the actual version and stores nothing.
        let outcome = backend
            .append_if_version_matches(commit_at(&id, 0))
            .await
            .expect("append should succeed");
        assert_eq!(
            outcome,
            AppendOutcome::Conflict {
                actual: Version::new(1)
            }
        );
        assert_eq!(backend.commit_count(&id), 1);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Panics: Test will fail on backend errors
    async fn in_memory_backend_reads_from_version() {
        let backend = InMemoryBackend::new();
        let id = AggregateId::new("a-1");
        for base in 0..3 {
            backend
                .append_if_version_matches(commit_at(&id, base))
                .await
                .expect("append should succeed");
        }

        let all = backend
            .read_commits(&id, Version::INITIAL, 10)
            .await
            .expect("read should succeed");
        assert_eq!(all.len(), 3);

        let tail = backend
            .read_commits(&id, Version::new(2), 10)
            .await
            .expect("read should succeed");
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].base_version(), Version::new(2));

        let limited = backend
            .read_commits(&id, Version::INITIAL, 2)
            .await
            .expect("read should succeed");
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    #[allow(clippy::expect_used)] // Panics: Test will fail on backend errors
    async fn flaky_backend_fails_only_armed_operations() {
        let backend = FlakyBackend::new(InMemoryBackend::new());
        let id = AggregateId::new("a-1");

        backend.fail_next_appends(1);
        assert!(
            backend
                .append_if_version_matches(commit_at(&id, 0))
                .await
                .is_err()
        );

        // Disarmed: the same append now succeeds.
        let outcome = backend
            .append_if_version_matches(commit_at(&id, 0))
            .await
            .expect("append should succeed");
        assert_eq!(outcome, AppendOutcome::Committed);

        backend.fail_next_reads(1);
        assert!(backend.read_commits(&id, Version::INITIAL, 10).await.is_err());
        assert!(backend.read_commits(&id, Version::INITIAL, 10).await.is_ok());
    }

    #[tokio::test]
    async fn recording_handler_records_in_order() {
        use commitstream_core::handler::EventHandler;

        let handler = RecordingHandler::new("recorder");
        let id = AggregateId::new("a-1");
        let first = RecordedEvent::new("First.v1".to_string(), vec![], None);
        let second = RecordedEvent::new("Second.v1".to_string(), vec![], None);

        assert!(handler.handle(&id, &first).await.is_ok());
        assert!(handler.handle(&id, &second).await.is_ok());

        assert_eq!(handler.event_types(), vec!["First.v1", "Second.v1"]);
        assert!(!handler.is_empty());
    }

    #[tokio::test]
    async fn failing_handler_always_fails() {
        use commitstream_core::handler::EventHandler;

        let handler = FailingHandler::new("broken");
        let id = AggregateId::new("a-1");
        let event = RecordedEvent::new("E.v1".to_string(), vec![], None);

        let result = handler.handle(&id, &event).await;
        assert!(result.is_err());
    }
}
