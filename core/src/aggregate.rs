//! Aggregate abstraction: a versioned state machine that applies and stages
//! domain events.
//!
//! A concrete aggregate declares its state type and registers one
//! state-mutation handler per event type it understands
//! ([`AggregateState::register_handlers`]). [`AggregateRoot`] wraps that
//! state with the commit protocol bookkeeping: the version counter, the
//! staged (uncommitted) events, and the handler dispatch table.
//!
//! Both replay and new mutations go through the same application path —
//! [`AggregateRoot::apply_recorded`] — so the two are side-effect-identical
//! except that [`AggregateRoot::emit`] additionally stages the event for the
//! next commit. Application is pure: no I/O, no publishing.

use crate::event::{DomainEvent, EventError, RecordedEvent};
use crate::stream::{AggregateId, Version};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while applying events to an aggregate.
#[derive(Error, Debug)]
pub enum AggregateError {
    /// An event type with no registered handler was applied.
    ///
    /// This is a programmer error (a missing registration or a stream
    /// written by a newer schema), not a recoverable runtime condition.
    #[error("No handler registered on aggregate '{aggregate_type}' for event type '{event_type}'")]
    UnhandledEvent {
        /// The aggregate type the event was applied to.
        aggregate_type: &'static str,
        /// The unrecognized event type tag.
        event_type: String,
    },

    /// An event payload failed to encode or decode.
    #[error("Event codec failure: {0}")]
    Codec(#[from] EventError),
}

/// Domain state of an aggregate type.
///
/// The implementing type is the aggregate's internal state; versioning and
/// staging live in [`AggregateRoot`]. State must be constructible empty
/// (`Default`) so an instance can be built fresh or by replay.
///
/// # Examples
///
/// ```
/// use commitstream_core::aggregate::{AggregateState, HandlerRegistry};
/// use commitstream_core::event::DomainEvent;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// struct Opened { initial_balance: i64 }
///
/// impl DomainEvent for Opened {
///     const EVENT_TYPE: &'static str = "Opened.v1";
/// }
///
/// #[derive(Debug, Default)]
/// struct Account { balance: i64 }
///
/// impl AggregateState for Account {
///     const AGGREGATE_TYPE: &'static str = "account";
///
///     fn register_handlers(registry: &mut HandlerRegistry<Self>) {
///         registry.on::<Opened, _>(|state, event| {
///             state.balance = event.initial_balance;
///         });
///     }
/// }
/// ```
pub trait AggregateState: Default + Send + Sync + Sized + 'static {
    /// Identifies this aggregate type (e.g. `"order"`).
    const AGGREGATE_TYPE: &'static str;

    /// Declare the state-mutation handler for every event type this
    /// aggregate understands. Applying an unregistered event type fails
    /// with [`AggregateError::UnhandledEvent`].
    fn register_handlers(registry: &mut HandlerRegistry<Self>);
}

/// Type-erased handler: decodes a recorded event and mutates state.
type ApplyFn<S> = Box<dyn Fn(&mut S, &RecordedEvent) -> Result<(), AggregateError> + Send + Sync>;

/// Dispatch table from event type tag to state-mutation handler.
///
/// Populated once at aggregate construction time via
/// [`AggregateState::register_handlers`].
pub struct HandlerRegistry<S> {
    handlers: HashMap<&'static str, ApplyFn<S>>,
}

impl<S: AggregateState> HandlerRegistry<S> {
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for event type `E`, keyed by `E::EVENT_TYPE`.
    ///
    /// The handler receives the decoded, typed event. Registering the same
    /// event type twice replaces the earlier handler.
    pub fn on<E, F>(&mut self, apply: F) -> &mut Self
    where
        E: DomainEvent,
        F: Fn(&mut S, E) + Send + Sync + 'static,
    {
        self.handlers.insert(
            E::EVENT_TYPE,
            Box::new(move |state, recorded| {
                let event = recorded.decode::<E>()?;
                apply(state, event);
                Ok(())
            }),
        );
        self
    }

    /// Whether a handler is registered for the given event type tag.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    fn apply(&self, state: &mut S, recorded: &RecordedEvent) -> Result<(), AggregateError> {
        match self.handlers.get(recorded.event_type()) {
            Some(handler) => handler(state, recorded),
            None => Err(AggregateError::UnhandledEvent {
                aggregate_type: S::AGGREGATE_TYPE,
                event_type: recorded.event_type().to_string(),
            }),
        }
    }
}

/// A live aggregate instance: identity, version, domain state, and the
/// transient list of staged events.
///
/// # Invariants
///
/// - `version` equals the number of events replayed-or-applied into this
///   instance since construction.
/// - Staged events are cleared exactly when a commit built from them has
///   been durably appended (the repository's job, never the aggregate's).
pub struct AggregateRoot<S: AggregateState> {
    id: AggregateId,
    version: Version,
    state: S,
    uncommitted: Vec<RecordedEvent>,
    handlers: HandlerRegistry<S>,
}

// Manual Debug: the handler table is opaque.
impl<S: AggregateState + fmt::Debug> fmt::Debug for AggregateRoot<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("uncommitted", &self.uncommitted.len())
            .finish()
    }
}

impl<S: AggregateState> AggregateRoot<S> {
    /// Construct an empty aggregate at version 0.
    ///
    /// Used both for brand-new aggregates and as the starting point for
    /// replay.
    #[must_use]
    pub fn new(id: AggregateId) -> Self {
        let mut handlers = HandlerRegistry::new();
        S::register_handlers(&mut handlers);
        Self {
            id,
            version: Version::INITIAL,
            state: S::default(),
            uncommitted: Vec::new(),
            handlers,
        }
    }

    /// The aggregate's stable identity.
    #[must_use]
    pub const fn id(&self) -> &AggregateId {
        &self.id
    }

    /// Count of events ever applied into this instance.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Read access to the domain state.
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.state
    }

    /// Apply a recorded event through the handler table, incrementing the
    /// version. Used by replay; [`emit`](Self::emit) routes through here
    /// too so both paths mutate state identically.
    ///
    /// # Errors
    ///
    /// - [`AggregateError::UnhandledEvent`] if no handler is registered for
    ///   the event's type tag.
    /// - [`AggregateError::Codec`] if the payload cannot be decoded.
    pub fn apply_recorded(&mut self, recorded: &RecordedEvent) -> Result<(), AggregateError> {
        self.handlers.apply(&mut self.state, recorded)?;
        self.version = self.version.next();
        Ok(())
    }

    /// Record a new domain change: apply the event and stage it for the
    /// next commit. This is the only way new changes enter an aggregate.
    ///
    /// # Errors
    ///
    /// - [`AggregateError::UnhandledEvent`] if the event type has no
    ///   registered handler (nothing is staged in that case).
    /// - [`AggregateError::Codec`] if the payload cannot be serialized.
    pub fn emit<E: DomainEvent>(&mut self, event: E) -> Result<(), AggregateError> {
        self.emit_with_metadata(event, None)
    }

    /// Like [`emit`](Self::emit), attaching opaque metadata to the recorded
    /// event.
    ///
    /// # Errors
    ///
    /// Same as [`emit`](Self::emit).
    pub fn emit_with_metadata<E: DomainEvent>(
        &mut self,
        event: E,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), AggregateError> {
        let recorded = RecordedEvent::from_event(&event, metadata)?;
        self.apply_recorded(&recorded)?;
        self.uncommitted.push(recorded);
        Ok(())
    }

    /// The staged event sequence, without clearing it.
    #[must_use]
    pub fn uncommitted_events(&self) -> &[RecordedEvent] {
        &self.uncommitted
    }

    /// Whether any events are staged.
    #[must_use]
    pub fn has_uncommitted_events(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Drop the staged events. Called by the repository only after a commit
    /// built from them was successfully appended.
    pub fn clear_uncommitted_events(&mut self) {
        self.uncommitted.clear();
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::{AggregateState, HandlerRegistry};
    use crate::event::DomainEvent;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    pub(crate) struct Incremented;

    impl DomainEvent for Incremented {
        const EVENT_TYPE: &'static str = "Incremented.v1";
    }

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    pub(crate) struct Added {
        pub amount: u64,
    }

    impl DomainEvent for Added {
        const EVENT_TYPE: &'static str = "Added.v1";
    }

    /// A simple tally aggregate used as a test fixture.
    #[derive(Debug, Default, Clone, PartialEq)]
    pub(crate) struct Tally {
        pub total: u64,
        pub applied: u64,
    }

    impl AggregateState for Tally {
        const AGGREGATE_TYPE: &'static str = "tally";

        fn register_handlers(registry: &mut HandlerRegistry<Self>) {
            registry
                .on::<Incremented, _>(|state, _| {
                    state.total += 1;
                    state.applied += 1;
                })
                .on::<Added, _>(|state, event| {
                    state.total += event.amount;
                    state.applied += 1;
                });
        }
    }
}
