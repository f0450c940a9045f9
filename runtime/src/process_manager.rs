//! Process managers: correlating published events into persisted,
//! event-sourced process state machines (sagas).
//!
//! A process definition names the correlation rule (which events belong to
//! which process instance) and the transition function (what each event
//! does to the process state, and which commands it triggers). The process
//! state is itself an aggregate: it lives in the commit store under the
//! correlation id, with the same versioning and optimistic concurrency
//! discipline as any other aggregate.
//!
//! # Transitions
//!
//! - `NotStarted → InProgress`: the first correlated event finds no history
//!   for the correlation id; the transition runs against a fresh process
//!   root at version 0 and emits the "process started" event(s).
//! - `InProgress → InProgress`: later events load the persisted state,
//!   transition it, and save — possibly returning outgoing commands.
//! - `InProgress → Completed`: a terminal transition sets the state's
//!   completion flag. Events correlated to a completed process are ignored
//!   with a logged warning by default ([`CompletedProcessPolicy`]).
//!
//! Each delivery is transactional with respect to its own state: a
//! concurrency conflict means two deliveries raced for the same correlation
//! id, and the losing delivery is re-run (load-transition-save again) under
//! the configured [`RetryPolicy`].

use crate::dead_letter::DeadLetterQueue;
use crate::repository::{Repository, RepositoryError};
use crate::retry::{RetryPolicy, retry_with_predicate};
use commitstream_core::aggregate::{AggregateError, AggregateRoot, AggregateState};
use commitstream_core::backend::StorageBackend;
use commitstream_core::event::RecordedEvent;
use commitstream_core::handler::{EventHandler, HandlerError, HandlerFuture};
use commitstream_core::stream::AggregateId;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Persisted state of a process manager instance.
///
/// A process state is an ordinary aggregate state with one extra bit: the
/// terminal flag marking the process completed.
pub trait ProcessState: AggregateState {
    /// Whether the process has reached a terminal state.
    fn is_completed(&self) -> bool;
}

/// A command produced by a process transition, addressed to some aggregate.
///
/// The payload is type-erased JSON so the process manager can route
/// commands without depending on every target aggregate's command type;
/// the dispatcher on the receiving side decodes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// The target aggregate type (e.g. `"shipment"`).
    pub aggregate_type: String,
    /// The target aggregate instance.
    pub aggregate_id: AggregateId,
    /// The type-erased command payload.
    pub command: serde_json::Value,
    /// Optional opaque metadata (correlation ids and the like).
    pub metadata: Option<serde_json::Value>,
}

/// Boxed future returned by a dispatch.
pub type DispatchFuture<'a> = Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + 'a>>;

/// A command envelope could not be dispatched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Command dispatch failed: {0}")]
pub struct DispatchError(String);

impl DispatchError {
    /// Create a new dispatch error with the given reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Routes command envelopes to their target aggregates.
///
/// Provided by the surrounding application; the process manager only hands
/// envelopes over and records failures.
pub trait CommandDispatcher: Send + Sync {
    /// Dispatch one command envelope.
    fn dispatch(&self, envelope: CommandEnvelope) -> DispatchFuture<'_>;
}

/// Policy for events correlated to an already-completed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletedProcessPolicy {
    /// Drop the event with a `tracing::warn!` (the default).
    #[default]
    IgnoreWithWarning,
    /// Fail the delivery with [`ProcessError::ProcessCompleted`].
    Error,
}

/// Errors raised while processing a correlated event.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The definition rejected the event in its current state.
    #[error("Process '{name}' rejected event '{event_type}': {reason}")]
    Rejected {
        /// The process definition name.
        name: &'static str,
        /// The rejected event's type tag.
        event_type: String,
        /// Why the transition refused it.
        reason: String,
    },

    /// An event was correlated to a completed process under
    /// [`CompletedProcessPolicy::Error`].
    #[error("Process instance '{correlation_id}' is already completed")]
    ProcessCompleted {
        /// The completed process instance.
        correlation_id: AggregateId,
    },

    /// Applying a process-internal event failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Loading or saving the process state failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ProcessError {
    /// Whether this error is an optimistic concurrency conflict on the
    /// process state (two deliveries raced; safe to redeliver).
    #[must_use]
    pub const fn is_concurrency(&self) -> bool {
        matches!(self, Self::Repository(err) if err.is_concurrency())
    }
}

/// Commands returned by one transition. Most transitions emit zero or one.
pub type OutgoingCommands = SmallVec<[CommandEnvelope; 2]>;

/// The domain half of a process manager: correlation and transitions.
pub trait ProcessDefinition: Send + Sync + 'static {
    /// Stable name, used as the handler name and in logs.
    const NAME: &'static str;

    /// The persisted process state type.
    type State: ProcessState;

    /// Extract the correlation id for an incoming event, per event type.
    ///
    /// Returning `None` means the event does not belong to this process
    /// manager and is silently skipped.
    fn correlate(&self, source: &AggregateId, event: &RecordedEvent) -> Option<AggregateId>;

    /// Advance the process by one event.
    ///
    /// The transition emits process-internal events on `process` (via
    /// [`AggregateRoot::emit`]) and returns the commands to dispatch once
    /// the new state is durable. It runs against a fresh root (version 0)
    /// for the first correlated event of an instance.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Rejected`] for events the process cannot
    /// accept in its current state, or an event application error.
    fn transition(
        &self,
        process: &mut AggregateRoot<Self::State>,
        source: &AggregateId,
        event: &RecordedEvent,
    ) -> Result<OutgoingCommands, ProcessError>;
}

/// Drives a [`ProcessDefinition`]: loads, transitions, and saves process
/// state for every correlated event, then dispatches the resulting
/// commands.
///
/// Subscribe it to the publisher for each event type its definition
/// correlates.
pub struct ProcessManager<D: ProcessDefinition, B> {
    definition: D,
    repository: Repository<D::State, B>,
    dispatcher: Arc<dyn CommandDispatcher>,
    policy: CompletedProcessPolicy,
    retry: RetryPolicy,
    dead_letters: DeadLetterQueue<CommandEnvelope>,
}

impl<D, B> ProcessManager<D, B>
where
    D: ProcessDefinition,
    B: StorageBackend + 'static,
{
    /// Create a process manager with the default completion policy and
    /// retry policy.
    #[must_use]
    pub fn new(
        definition: D,
        repository: Repository<D::State, B>,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Self {
        Self {
            definition,
            repository,
            dispatcher,
            policy: CompletedProcessPolicy::default(),
            retry: RetryPolicy::default(),
            dead_letters: DeadLetterQueue::default(),
        }
    }

    /// Override the completed-process policy.
    #[must_use]
    pub fn with_policy(mut self, policy: CompletedProcessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the retry policy used for concurrency races.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The queue of command envelopes whose dispatch failed.
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterQueue<CommandEnvelope> {
        self.dead_letters.clone()
    }

    /// Handle one published event end to end: correlate, transition the
    /// persisted state, and dispatch the resulting commands.
    ///
    /// Uncorrelated events return `Ok(())` without touching storage.
    /// Concurrency conflicts are retried internally (each retry re-runs
    /// load-transition-save, which is exactly a redelivery); other errors
    /// propagate. Dispatch failures are dead-lettered, never fatal — the
    /// transition is already durable at that point.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] if the transition is rejected, the process
    /// is completed under [`CompletedProcessPolicy::Error`], or storage
    /// keeps failing past the retry budget.
    pub async fn deliver(
        &self,
        source: &AggregateId,
        event: &RecordedEvent,
    ) -> Result<(), ProcessError> {
        let Some(correlation_id) = self.definition.correlate(source, event) else {
            return Ok(());
        };

        let commands = retry_with_predicate(
            &self.retry,
            || self.process_once(&correlation_id, source, event),
            ProcessError::is_concurrency,
        )
        .await?;

        for envelope in commands {
            if let Err(error) = self.dispatcher.dispatch(envelope.clone()).await {
                tracing::warn!(
                    process = D::NAME,
                    correlation_id = %correlation_id,
                    target = %envelope.aggregate_id,
                    error = %error,
                    "command dispatch failed, dead-lettering"
                );
                self.dead_letters.push(envelope, error.to_string(), 0);
            }
        }

        Ok(())
    }

    /// One load-transition-save pass for a correlated event.
    async fn process_once(
        &self,
        correlation_id: &AggregateId,
        source: &AggregateId,
        event: &RecordedEvent,
    ) -> Result<OutgoingCommands, ProcessError> {
        let mut process = match self.repository.load(correlation_id).await {
            Ok(root) => root,
            // First correlated event: NotStarted, fresh root at version 0.
            Err(RepositoryError::AggregateNotFound(_)) => {
                AggregateRoot::new(correlation_id.clone())
            }
            Err(error) => return Err(error.into()),
        };

        if process.state().is_completed() {
            return match self.policy {
                CompletedProcessPolicy::IgnoreWithWarning => {
                    tracing::warn!(
                        process = D::NAME,
                        correlation_id = %correlation_id,
                        event_type = event.event_type(),
                        "event correlated to a completed process, ignoring"
                    );
                    Ok(OutgoingCommands::new())
                }
                CompletedProcessPolicy::Error => Err(ProcessError::ProcessCompleted {
                    correlation_id: correlation_id.clone(),
                }),
            };
        }

        let commands = self.definition.transition(&mut process, source, event)?;
        self.repository.save(&mut process).await?;
        Ok(commands)
    }
}

impl<D, B> EventHandler for ProcessManager<D, B>
where
    D: ProcessDefinition,
    B: StorageBackend + 'static,
{
    fn name(&self) -> &str {
        D::NAME
    }

    fn handle<'a>(
        &'a self,
        aggregate_id: &'a AggregateId,
        event: &'a RecordedEvent,
    ) -> HandlerFuture<'a> {
        Box::pin(async move {
            self.deliver(aggregate_id, event)
                .await
                .map_err(|error| HandlerError::new(error.to_string()))
        })
    }
}
