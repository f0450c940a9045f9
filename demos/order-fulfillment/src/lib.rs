//! Order Fulfillment Example
//!
//! Demonstrates the full commitstream write side with a small order domain:
//!
//! - An **Order** aggregate whose state is derived from
//!   `OrderPlaced` / `OrderShipped` / `OrderCancelled` events
//! - A **fulfillment process manager** that correlates those events into a
//!   persisted fulfillment saga and emits warehouse commands
//!
//! ```text
//! place(order) ──► OrderPlaced ──► commit ──► publish ─┬─► projections...
//!                                                      │
//!                                                      ▼
//!                                            FulfillmentProcess
//!                                       NotStarted ──► InProgress
//!                                                      │   pick command
//!                                                      ▼
//!                      OrderShipped ──► ... ──► InProgress ──► Completed
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use commitstream_core::aggregate::{AggregateError, AggregateRoot, AggregateState, HandlerRegistry};
use commitstream_core::event::{DomainEvent, RecordedEvent};
use commitstream_core::stream::AggregateId;
use commitstream_core::value_object::ValueObject;
use commitstream_runtime::process_manager::{
    CommandEnvelope, OutgoingCommands, ProcessDefinition, ProcessError, ProcessState,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ===== Value objects =====
//

/// An amount of money in cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// The amount in cents.
    pub cents: u64,
}

impl Money {
    /// Create an amount from cents.
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self { cents }
    }
}

impl ValueObject for Money {}

/// One line of an order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Stock keeping unit.
    pub sku: String,
    /// Number of units ordered.
    pub quantity: u32,
    /// Price per unit.
    pub unit_price: Money,
}

impl OrderLine {
    /// The line total: `quantity * unit_price`.
    #[must_use]
    pub const fn total(&self) -> Money {
        Money::from_cents(self.unit_price.cents * self.quantity as u64)
    }
}

impl ValueObject for OrderLine {}

//
// ===== Order events =====
//

/// An order was placed by a customer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderPlaced {
    /// The customer who placed the order.
    pub customer_id: String,
    /// The ordered lines.
    pub lines: Vec<OrderLine>,
    /// Sum of all line totals.
    pub total: Money,
}

impl DomainEvent for OrderPlaced {
    const EVENT_TYPE: &'static str = "OrderPlaced.v1";
}

/// An order left the warehouse.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderShipped {
    /// Carrier tracking code.
    pub tracking_code: String,
}

impl DomainEvent for OrderShipped {
    const EVENT_TYPE: &'static str = "OrderShipped.v1";
}

/// An order was cancelled before shipping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderCancelled {
    /// Why the order was cancelled.
    pub reason: String,
}

impl DomainEvent for OrderCancelled {
    const EVENT_TYPE: &'static str = "OrderCancelled.v1";
}

//
// ===== Order aggregate =====
//

/// Order lifecycle status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderStatus {
    /// No events applied yet.
    #[default]
    New,
    /// Placed, awaiting shipment.
    Placed,
    /// Shipped; terminal.
    Shipped,
    /// Cancelled; terminal.
    Cancelled,
}

/// Event-sourced state of one order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrderState {
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// The customer, once placed.
    pub customer_id: Option<String>,
    /// The ordered lines.
    pub lines: Vec<OrderLine>,
    /// The order total.
    pub total: Money,
}

impl AggregateState for OrderState {
    const AGGREGATE_TYPE: &'static str = "order";

    fn register_handlers(registry: &mut HandlerRegistry<Self>) {
        registry
            .on::<OrderPlaced, _>(|state, event| {
                state.status = OrderStatus::Placed;
                state.customer_id = Some(event.customer_id);
                state.lines = event.lines;
                state.total = event.total;
            })
            .on::<OrderShipped, _>(|state, _| {
                state.status = OrderStatus::Shipped;
            })
            .on::<OrderCancelled, _>(|state, _| {
                state.status = OrderStatus::Cancelled;
            });
    }
}

/// Command rejection errors for the order aggregate.
#[derive(Error, Debug)]
pub enum OrderError {
    /// A command arrived in a status that cannot accept it.
    #[error("Order is {status:?}, cannot {action}")]
    InvalidStatus {
        /// The order's current status.
        status: OrderStatus,
        /// The rejected action.
        action: &'static str,
    },

    /// An order must contain at least one line.
    #[error("Cannot place an order with no lines")]
    EmptyOrder,

    /// Recording the event failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Place the order: validates the lines and stages [`OrderPlaced`].
///
/// # Errors
///
/// Rejects empty orders and orders that are not in [`OrderStatus::New`].
pub fn place(
    order: &mut AggregateRoot<OrderState>,
    customer_id: impl Into<String>,
    lines: Vec<OrderLine>,
) -> Result<(), OrderError> {
    if order.state().status != OrderStatus::New {
        return Err(OrderError::InvalidStatus {
            status: order.state().status,
            action: "place",
        });
    }
    if lines.is_empty() {
        return Err(OrderError::EmptyOrder);
    }

    let total = Money::from_cents(lines.iter().map(|line| line.total().cents).sum());
    order.emit(OrderPlaced {
        customer_id: customer_id.into(),
        lines,
        total,
    })?;
    Ok(())
}

/// Ship the order: stages [`OrderShipped`].
///
/// # Errors
///
/// Rejects orders that are not currently [`OrderStatus::Placed`].
pub fn ship(
    order: &mut AggregateRoot<OrderState>,
    tracking_code: impl Into<String>,
) -> Result<(), OrderError> {
    if order.state().status != OrderStatus::Placed {
        return Err(OrderError::InvalidStatus {
            status: order.state().status,
            action: "ship",
        });
    }
    order.emit(OrderShipped {
        tracking_code: tracking_code.into(),
    })?;
    Ok(())
}

/// Cancel the order: stages [`OrderCancelled`].
///
/// # Errors
///
/// Rejects orders that are not currently [`OrderStatus::Placed`].
pub fn cancel(
    order: &mut AggregateRoot<OrderState>,
    reason: impl Into<String>,
) -> Result<(), OrderError> {
    if order.state().status != OrderStatus::Placed {
        return Err(OrderError::InvalidStatus {
            status: order.state().status,
            action: "cancel",
        });
    }
    order.emit(OrderCancelled {
        reason: reason.into(),
    })?;
    Ok(())
}

//
// ===== Fulfillment process =====
//

/// Fulfillment started for an order (process-internal).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FulfillmentStarted {
    /// The order being fulfilled.
    pub order_id: String,
}

impl DomainEvent for FulfillmentStarted {
    const EVENT_TYPE: &'static str = "FulfillmentStarted.v1";
}

/// Fulfillment finished: the order shipped (process-internal).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FulfillmentCompleted;

impl DomainEvent for FulfillmentCompleted {
    const EVENT_TYPE: &'static str = "FulfillmentCompleted.v1";
}

/// Fulfillment aborted: the order was cancelled (process-internal).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FulfillmentAborted {
    /// Why fulfillment stopped.
    pub reason: String,
}

impl DomainEvent for FulfillmentAborted {
    const EVENT_TYPE: &'static str = "FulfillmentAborted.v1";
}

/// Fulfillment saga phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FulfillmentPhase {
    /// No correlated event seen yet.
    #[default]
    NotStarted,
    /// Waiting for the warehouse to ship.
    InProgress,
    /// Shipped or aborted; terminal.
    Completed,
}

/// Persisted state of one fulfillment saga instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FulfillmentState {
    /// Current phase.
    pub phase: FulfillmentPhase,
    /// The order under fulfillment.
    pub order_id: Option<String>,
    /// Whether the saga ended in a shipment (vs. an abort).
    pub shipped: bool,
}

impl AggregateState for FulfillmentState {
    const AGGREGATE_TYPE: &'static str = "fulfillment";

    fn register_handlers(registry: &mut HandlerRegistry<Self>) {
        registry
            .on::<FulfillmentStarted, _>(|state, event| {
                state.phase = FulfillmentPhase::InProgress;
                state.order_id = Some(event.order_id);
            })
            .on::<FulfillmentCompleted, _>(|state, _| {
                state.phase = FulfillmentPhase::Completed;
                state.shipped = true;
            })
            .on::<FulfillmentAborted, _>(|state, _| {
                state.phase = FulfillmentPhase::Completed;
            });
    }
}

impl ProcessState for FulfillmentState {
    fn is_completed(&self) -> bool {
        self.phase == FulfillmentPhase::Completed
    }
}

/// Correlates order events into fulfillment sagas.
///
/// Every order gets one saga instance, keyed by `fulfillment-{order_id}`.
/// `OrderPlaced` opens the saga and asks the warehouse to pick the lines;
/// `OrderShipped` completes it; `OrderCancelled` aborts it.
pub struct FulfillmentProcess;

impl ProcessDefinition for FulfillmentProcess {
    const NAME: &'static str = "fulfillment-process";
    type State = FulfillmentState;

    fn correlate(&self, source: &AggregateId, event: &RecordedEvent) -> Option<AggregateId> {
        match event.event_type() {
            OrderPlaced::EVENT_TYPE | OrderShipped::EVENT_TYPE | OrderCancelled::EVENT_TYPE => {
                Some(AggregateId::new(format!("fulfillment-{source}")))
            }
            _ => None,
        }
    }

    fn transition(
        &self,
        process: &mut AggregateRoot<Self::State>,
        source: &AggregateId,
        event: &RecordedEvent,
    ) -> Result<OutgoingCommands, ProcessError> {
        let phase = process.state().phase;
        match (phase, event.event_type()) {
            (FulfillmentPhase::NotStarted, OrderPlaced::EVENT_TYPE) => {
                let placed: OrderPlaced = event.decode().map_err(AggregateError::from)?;
                process.emit(FulfillmentStarted {
                    order_id: source.to_string(),
                })?;

                let mut commands = OutgoingCommands::new();
                commands.push(CommandEnvelope {
                    aggregate_type: "warehouse".to_string(),
                    aggregate_id: AggregateId::new(format!("warehouse-{source}")),
                    command: serde_json::json!({
                        "action": "pick",
                        "order_id": source.as_str(),
                        "lines": placed.lines.len(),
                    }),
                    metadata: None,
                });
                Ok(commands)
            }
            (FulfillmentPhase::InProgress, OrderShipped::EVENT_TYPE) => {
                process.emit(FulfillmentCompleted)?;
                Ok(OutgoingCommands::new())
            }
            (FulfillmentPhase::InProgress, OrderCancelled::EVENT_TYPE) => {
                let cancelled: OrderCancelled = event.decode().map_err(AggregateError::from)?;
                process.emit(FulfillmentAborted {
                    reason: cancelled.reason,
                })?;
                Ok(OutgoingCommands::new())
            }
            (_, event_type) => Err(ProcessError::Rejected {
                name: Self::NAME,
                event_type: event_type.to_string(),
                reason: format!("unexpected in phase {phase:?}"),
            }),
        }
    }
}
