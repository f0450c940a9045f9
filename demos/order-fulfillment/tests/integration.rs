//! End-to-end tests for the order fulfillment example: the full
//! emit → save → append → publish → process-manager cycle over the
//! in-memory backend.

use commitstream_core::aggregate::AggregateRoot;
use commitstream_core::stream::{AggregateId, Version};
use commitstream_runtime::process_manager::{
    CommandDispatcher, CommandEnvelope, DispatchFuture, ProcessManager,
};
use commitstream_runtime::publisher::CommitPublisher;
use commitstream_runtime::repository::{Repository, RepositoryError};
use commitstream_runtime::commit_store::CommitStore;
use commitstream_testing::mocks::{InMemoryBackend, RecordingHandler, test_clock};
use order_fulfillment::{
    FulfillmentPhase, FulfillmentProcess, FulfillmentState, Money, OrderLine, OrderState,
    OrderStatus, cancel, place, ship,
};
use std::sync::{Arc, Mutex};

/// Dispatcher that records warehouse commands.
#[derive(Default)]
struct CollectingDispatcher {
    envelopes: Mutex<Vec<CommandEnvelope>>,
}

impl CollectingDispatcher {
    fn count(&self) -> usize {
        self.envelopes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl CommandDispatcher for CollectingDispatcher {
    fn dispatch(&self, envelope: CommandEnvelope) -> DispatchFuture<'_> {
        Box::pin(async move {
            self.envelopes
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(envelope);
            Ok(())
        })
    }
}

struct App {
    orders: Repository<OrderState, InMemoryBackend>,
    fulfillments: Repository<FulfillmentState, InMemoryBackend>,
    publisher: Arc<CommitPublisher>,
    dispatcher: Arc<CollectingDispatcher>,
}

/// Wire the write side the way a bootstrap module would: one backend, one
/// publisher, repositories per aggregate type, and the fulfillment process
/// manager subscribed to the order events it correlates.
fn app() -> App {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let backend = Arc::new(InMemoryBackend::new());
    let store = Arc::new(CommitStore::new(backend, Arc::new(test_clock())));
    let publisher = Arc::new(CommitPublisher::new());

    let orders = Repository::new(Arc::clone(&store), Arc::clone(&publisher));
    let fulfillments: Repository<FulfillmentState, InMemoryBackend> =
        Repository::new(Arc::clone(&store), Arc::clone(&publisher));

    let dispatcher = Arc::new(CollectingDispatcher::default());
    let manager = Arc::new(ProcessManager::new(
        FulfillmentProcess,
        fulfillments.clone(),
        Arc::clone(&dispatcher) as Arc<dyn CommandDispatcher>,
    ));
    for event_type in ["OrderPlaced.v1", "OrderShipped.v1", "OrderCancelled.v1"] {
        publisher.subscribe(event_type, Arc::clone(&manager) as _);
    }

    App {
        orders,
        fulfillments,
        publisher,
        dispatcher,
    }
}

fn widget(quantity: u32) -> OrderLine {
    OrderLine {
        sku: "WIDGET".to_string(),
        quantity,
        unit_price: Money::from_cents(250),
    }
}

#[tokio::test]
#[allow(clippy::expect_used)] // Panics: Test will fail on fixture errors
async fn place_save_publish_cycle() {
    let app = app();
    let id = AggregateId::new("order-1");

    let placed_events = Arc::new(RecordingHandler::new("placed-projection"));
    app.publisher
        .subscribe("OrderPlaced.v1", Arc::clone(&placed_events) as _);

    let mut order = AggregateRoot::<OrderState>::new(id.clone());
    place(&mut order, "customer-1", vec![widget(2)]).expect("place");

    let outcome = app
        .orders
        .save(&mut order)
        .await
        .expect("save")
        .expect("commit");

    // Commit stored against base version 0; the aggregate moved to 1.
    assert_eq!(outcome.commit.base_version(), Version::INITIAL);
    assert_eq!(order.version(), Version::new(1));
    assert!(!order.has_uncommitted_events());

    // OrderPlaced was published exactly once.
    assert_eq!(placed_events.len(), 1);
    assert!(outcome.publish.is_clean());
}

#[tokio::test]
async fn load_of_nonexistent_order_fails() {
    let app = app();
    let result = app.orders.load(&AggregateId::new("nonexistent")).await;
    assert!(matches!(
        result,
        Err(RepositoryError::AggregateNotFound(id)) if id.as_str() == "nonexistent"
    ));
}

#[tokio::test]
#[allow(clippy::expect_used)] // Panics: Test will fail on fixture errors
async fn stale_concurrent_saves_have_one_winner() {
    let app = app();
    let id = AggregateId::new("order-1");

    let mut order = AggregateRoot::<OrderState>::new(id.clone());
    place(&mut order, "customer-1", vec![widget(1)]).expect("place");
    app.orders.save(&mut order).await.expect("save");

    // Two separately loaded copies, both at version 1.
    let mut shipping_copy = app.orders.load(&id).await.expect("load");
    let mut cancelling_copy = app.orders.load(&id).await.expect("load");
    ship(&mut shipping_copy, "TRACK-1").expect("ship");
    cancel(&mut cancelling_copy, "out of stock").expect("cancel");

    let (a, b) = tokio::join!(
        app.orders.save(&mut shipping_copy),
        app.orders.save(&mut cancelling_copy)
    );

    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one of the two appends may succeed");
    let loser = if a.is_err() { a } else { b };
    assert!(loser.expect_err("loser").is_concurrency());

    // The stream holds exactly two commits; the order is in one terminal
    // state, not both.
    let settled = app.orders.load(&id).await.expect("load");
    assert_eq!(settled.version(), Version::new(2));
    assert!(matches!(
        settled.state().status,
        OrderStatus::Shipped | OrderStatus::Cancelled
    ));
}

#[tokio::test]
#[allow(clippy::expect_used)] // Panics: Test will fail on fixture errors
async fn idempotent_load_returns_equal_aggregates() {
    let app = app();
    let id = AggregateId::new("order-1");

    let mut order = AggregateRoot::<OrderState>::new(id.clone());
    place(&mut order, "customer-1", vec![widget(3)]).expect("place");
    app.orders.save(&mut order).await.expect("save");

    let first = app.orders.load(&id).await.expect("load");
    let second = app.orders.load(&id).await.expect("load");
    assert_eq!(first.state(), second.state());
    assert_eq!(first.version(), second.version());
}

#[tokio::test]
#[allow(clippy::expect_used)] // Panics: Test will fail on fixture errors
async fn fulfillment_saga_follows_the_order() {
    let app = app();
    let id = AggregateId::new("order-1");
    let saga_id = AggregateId::new("fulfillment-order-1");

    // Place: the saga opens and a warehouse pick is commanded.
    let mut order = AggregateRoot::<OrderState>::new(id.clone());
    place(&mut order, "customer-1", vec![widget(2)]).expect("place");
    app.orders.save(&mut order).await.expect("save");

    let saga = app.fulfillments.load(&saga_id).await.expect("saga exists");
    assert_eq!(saga.state().phase, FulfillmentPhase::InProgress);
    assert_eq!(saga.state().order_id.as_deref(), Some("order-1"));
    assert_eq!(app.dispatcher.count(), 1);

    // Ship: the saga completes.
    let mut order = app.orders.load(&id).await.expect("load");
    ship(&mut order, "TRACK-1").expect("ship");
    app.orders.save(&mut order).await.expect("save");

    let saga = app.fulfillments.load(&saga_id).await.expect("load saga");
    assert!(saga.state().shipped);
    assert_eq!(saga.state().phase, FulfillmentPhase::Completed);
    assert_eq!(saga.version(), Version::new(2));
}

#[tokio::test]
#[allow(clippy::expect_used)] // Panics: Test will fail on fixture errors
async fn completed_saga_ignores_redelivered_events() {
    let app = app();
    let id = AggregateId::new("order-1");
    let saga_id = AggregateId::new("fulfillment-order-1");

    let mut order = AggregateRoot::<OrderState>::new(id.clone());
    place(&mut order, "customer-1", vec![widget(1)]).expect("place");
    let placed_commit = app
        .orders
        .save(&mut order)
        .await
        .expect("save")
        .expect("commit");

    let mut order = app.orders.load(&id).await.expect("load");
    ship(&mut order, "TRACK-1").expect("ship");
    app.orders.save(&mut order).await.expect("save");

    // Redeliver the original OrderPlaced commit (at-least-once delivery):
    // the completed saga must not reopen.
    let report = app.publisher.publish(&placed_commit.commit).await;
    assert!(report.is_clean());

    let saga = app.fulfillments.load(&saga_id).await.expect("load saga");
    assert_eq!(saga.state().phase, FulfillmentPhase::Completed);
    assert_eq!(saga.version(), Version::new(2));
    // No second warehouse pick was commanded.
    assert_eq!(app.dispatcher.count(), 1);
}

#[tokio::test]
#[allow(clippy::expect_used)] // Panics: Test will fail on fixture errors
async fn cancelled_order_aborts_the_saga() {
    let app = app();
    let id = AggregateId::new("order-1");

    let mut order = AggregateRoot::<OrderState>::new(id.clone());
    place(&mut order, "customer-1", vec![widget(1)]).expect("place");
    app.orders.save(&mut order).await.expect("save");

    let mut order = app.orders.load(&id).await.expect("load");
    cancel(&mut order, "out of stock").expect("cancel");
    app.orders.save(&mut order).await.expect("save");

    let saga = app
        .fulfillments
        .load(&AggregateId::new("fulfillment-order-1"))
        .await
        .expect("load saga");
    assert_eq!(saga.state().phase, FulfillmentPhase::Completed);
    assert!(!saga.state().shipped);
}

#[tokio::test]
#[allow(clippy::expect_used)] // Panics: Test will fail on fixture errors
async fn republish_recovers_missed_deliveries() {
    // A projection subscribed after some commits were already published
    // catches up via the explicit republish operation.
    let backend = Arc::new(InMemoryBackend::new());
    let store = Arc::new(CommitStore::new(backend, Arc::new(test_clock())));
    let publisher = Arc::new(CommitPublisher::new());
    let orders: Repository<OrderState, InMemoryBackend> =
        Repository::new(Arc::clone(&store), Arc::clone(&publisher));
    let id = AggregateId::new("order-1");

    let mut order = AggregateRoot::<OrderState>::new(id.clone());
    place(&mut order, "customer-1", vec![widget(1)]).expect("place");
    orders.save(&mut order).await.expect("save");

    // Nobody was listening; subscribe now and replay the stream.
    let late = Arc::new(RecordingHandler::new("late-projection"));
    publisher.subscribe("OrderPlaced.v1", Arc::clone(&late) as _);

    let report = publisher
        .republish_from(&store, id, Version::INITIAL)
        .await
        .expect("republish");

    assert!(report.is_clean());
    assert_eq!(late.event_types(), vec!["OrderPlaced.v1"]);
}
