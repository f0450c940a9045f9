//! Commit publisher: post-append event distribution.
//!
//! The publisher is invoked by the repository only after the commit store
//! has reported a commit durable. It delivers each event of the commit, in
//! stored order, to every handler subscribed to that event's type.
//!
//! # Ordering
//!
//! For a single aggregate id, commit N is fully delivered (to all
//! subscribers) before any event of commit N+1 for the same id begins
//! delivery: `publish` serializes same-id commits behind a per-aggregate
//! mutex. Commits of different ids publish fully in parallel. For one
//! event, delivery to different handlers is concurrent — no relative order
//! is guaranteed between handlers.
//!
//! # Delivery Semantics
//!
//! At-least-once per durable commit. A crash between append and publish is
//! not repaired implicitly; recovery is the explicit
//! [`CommitPublisher::republish_from`] operation. Handlers must therefore
//! tolerate redelivery.
//!
//! A handler failure is caught and reported per-handler in the
//! [`PublishReport`]; it does not roll back the durable commit and does not
//! prevent delivery to other handlers.

use crate::commit_store::{CommitStore, CommitStoreError};
use commitstream_core::backend::StorageBackend;
use commitstream_core::commit::Commit;
use commitstream_core::handler::EventHandler;
use commitstream_core::stream::{AggregateId, Version};
use futures::TryStreamExt;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::Mutex;

/// A subscriber failed a delivery. Reported, never fatal to the commit or
/// to other subscribers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Handler '{handler}' failed for '{event_type}' on '{aggregate_id}': {reason}")]
pub struct HandlerDeliveryError {
    /// The failing handler's name.
    pub handler: String,
    /// The event type being delivered.
    pub event_type: String,
    /// The aggregate the commit belongs to.
    pub aggregate_id: AggregateId,
    /// The handler's failure reason.
    pub reason: String,
}

/// Outcome of one publish pass: successful deliveries and per-handler
/// failures.
#[derive(Debug, Default)]
pub struct PublishReport {
    /// Number of successful handler deliveries.
    pub delivered: usize,
    /// Per-handler failures, in delivery order.
    pub failures: Vec<HandlerDeliveryError>,
}

impl PublishReport {
    /// Whether every delivery succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.failures.extend(other.failures);
    }
}

/// Process-scoped subscription registry and delivery engine.
///
/// Constructed once, subscriptions registered at startup, torn down with
/// the owning process — there is no ambient global registry.
#[derive(Default)]
pub struct CommitPublisher {
    subscriptions: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    // One mutex per aggregate id orders same-id commits across publishes.
    stream_locks: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

impl CommitPublisher {
    /// Create an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to an event type.
    ///
    /// A handler may be subscribed to any number of event types; each
    /// subscription delivers independently.
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        tracing::debug!(event_type = %event_type, handler = handler.name(), "subscribed");
        self.subscriptions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Number of handlers subscribed to an event type.
    #[must_use]
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Deliver every event of a durable commit to its subscribers.
    ///
    /// Must only be called after the commit store has returned success for
    /// this exact commit. Events are delivered in stored order; handlers of
    /// one event run concurrently; handler failures are collected in the
    /// returned report.
    pub async fn publish(&self, commit: &Commit) -> PublishReport {
        let stream_lock = self.stream_lock(commit.aggregate_id()).await;
        let _ordering_guard = stream_lock.lock().await;

        let mut report = PublishReport::default();
        for event in commit.events() {
            let handlers = self.handlers_for(event.event_type());
            if handlers.is_empty() {
                continue;
            }

            let deliveries = handlers.into_iter().map(|handler| async move {
                let result = handler.handle(commit.aggregate_id(), event).await;
                (handler, result)
            });

            for (handler, result) in join_all(deliveries).await {
                match result {
                    Ok(()) => {
                        report.delivered += 1;
                        metrics::counter!("commitstream.events_delivered").increment(1);
                    }
                    Err(error) => {
                        metrics::counter!("commitstream.handler_failures").increment(1);
                        tracing::warn!(
                            handler = handler.name(),
                            event_type = event.event_type(),
                            aggregate_id = %commit.aggregate_id(),
                            error = %error,
                            "handler delivery failed"
                        );
                        report.failures.push(HandlerDeliveryError {
                            handler: handler.name().to_string(),
                            event_type: event.event_type().to_string(),
                            aggregate_id: commit.aggregate_id().clone(),
                            reason: error.to_string(),
                        });
                    }
                }
            }
        }

        metrics::counter!("commitstream.commits_published").increment(1);
        report
    }

    /// Replay stored commits through `publish` — the explicit recovery
    /// operation for publishes missed between an append and a crash.
    ///
    /// Redelivers every commit of `aggregate_id` from `from_version`
    /// onwards; subscribers see at-least-once semantics as usual.
    ///
    /// # Errors
    ///
    /// Returns [`CommitStoreError::StorageUnavailable`] if reading the
    /// commit stream fails. Handler failures do not error; they are
    /// collected in the report.
    pub async fn republish_from<B: StorageBackend + 'static>(
        &self,
        store: &CommitStore<B>,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<PublishReport, CommitStoreError> {
        let mut commits = store.read_stream(aggregate_id, from_version);
        let mut report = PublishReport::default();
        while let Some(commit) = commits.try_next().await? {
            report.merge(self.publish(&commit).await);
        }
        Ok(report)
    }

    fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.subscriptions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    async fn stream_lock(&self, aggregate_id: &AggregateId) -> Arc<Mutex<()>> {
        let mut locks = self.stream_locks.lock().await;
        Arc::clone(locks.entry(aggregate_id.clone()).or_default())
    }
}
