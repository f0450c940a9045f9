//! Event delivery boundary: the subscription surface consumed by the
//! publisher.
//!
//! A handler is registered with the publisher for one or more event types
//! and receives each matching event of every durable commit, after the
//! append has succeeded. Handlers report success or failure per delivery;
//! a failure is isolated to that handler and never affects the durable
//! commit or delivery to other handlers.
//!
//! Handlers must tolerate redelivery: the publish protocol is at-least-once,
//! and recovery from missed publishes replays stored commits.
//!
//! # Dyn Compatibility
//!
//! `Pin<Box<dyn Future>>` returns instead of `async fn`, so handlers can be
//! held as `Arc<dyn EventHandler>` in the subscription registry.

use crate::event::RecordedEvent;
use crate::stream::AggregateId;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by a delivery.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;

/// A handler rejected or failed a delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Create a new handler error with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A subscriber to published events.
pub trait EventHandler: Send + Sync {
    /// Stable name used in delivery reports and logs.
    fn name(&self) -> &str;

    /// Deliver one event from a durable commit of `aggregate_id`.
    ///
    /// Returning an error marks this delivery failed for this handler
    /// only; the publisher reports it and carries on.
    fn handle<'a>(
        &'a self,
        aggregate_id: &'a AggregateId,
        event: &'a RecordedEvent,
    ) -> HandlerFuture<'a>;
}
