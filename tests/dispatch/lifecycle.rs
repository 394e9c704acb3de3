//! Dispatch lifecycle: states, settlement and scope release.

use std::time::Duration;

use courier_rust::dispatch::DispatchState::{self, *};
use courier_rust::transport::{Destination, Settlement, TransportError};
use courier_rust::{DeliveryDecision, DispatchError, Dispatcher, Transport};
use tokio_util::sync::CancellationToken;

use crate::support::{Behavior, Harness, PlaceOrder};

#[tokio::test]
async fn successful_dispatch_walks_the_happy_path() {
    let h = Harness::builder().build();

    let report = h.deliver(&PlaceOrder { order_id: 1 }).await;

    assert_eq!(
        report.states,
        vec![Received, Resolving, Invoking, Succeeded, Decided, Closed]
    );
    assert_eq!(
        h.transport.settlements_for(&report.message_id),
        vec![Settlement::Completed]
    );
    assert!(report.settle_error.is_none());
}

#[tokio::test]
async fn failed_dispatch_never_enters_succeeded() {
    let h = Harness::builder().behavior(Behavior::Fail).build();

    let report = h.deliver(&PlaceOrder { order_id: 1 }).await;

    assert_eq!(
        report.states,
        vec![Received, Resolving, Invoking, Failed, Decided, Closed]
    );
}

#[tokio::test]
async fn each_dispatch_settles_exactly_once() {
    for behavior in [Behavior::Succeed, Behavior::Fail, Behavior::Panic] {
        let h = Harness::builder().behavior(behavior).max_attempts(1).build();

        let report = h.deliver(&PlaceOrder { order_id: 1 }).await;

        assert_eq!(
            h.transport.settlements_for(&report.message_id).len(),
            1,
            "{behavior:?}"
        );
        assert_eq!(h.transport.in_flight(), 0, "{behavior:?}");
    }
}

#[tokio::test]
async fn every_scope_opened_is_released() {
    let h = Harness::builder()
        .behavior(Behavior::SucceedOnAttempt(3))
        .max_attempts(5)
        .build();

    h.deliver(&PlaceOrder { order_id: 1 }).await;
    while h.redeliver().await.is_some() {}

    assert_eq!(h.journal.count("handler:1"), 3);
    assert_eq!(h.resolver.scopes_opened(), 3);
    assert_eq!(h.resolver.scopes_released(), 3);
}

#[tokio::test]
async fn panicking_handler_still_releases_its_scope() {
    let h = Harness::builder().behavior(Behavior::Panic).max_attempts(1).build();

    h.deliver(&PlaceOrder { order_id: 1 }).await;

    assert_eq!(h.resolver.scopes_opened(), 1);
    assert_eq!(h.resolver.scopes_released(), 1);
}

#[tokio::test]
async fn cancelled_dispatch_is_abandoned_not_dead_lettered() {
    let h = Harness::builder()
        .behavior(Behavior::Hang)
        .max_attempts(1)
        .build();
    h.transport
        .send(
            h.envelope(&PlaceOrder { order_id: 1 }),
            &Destination::Queue(crate::support::QUEUE.to_string()),
        )
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    let report = h.redeliver_with(cancel).await.expect("envelope enqueued");

    assert!(matches!(report.outcome, Err(DispatchError::Cancelled)));
    assert_eq!(report.decision, DeliveryDecision::RetryAfter(Duration::ZERO));
    assert_eq!(
        h.transport.settlements_for(&report.message_id),
        vec![Settlement::Abandoned]
    );
    assert!(h.transport.dead_letters().is_empty());
    assert_eq!(h.resolver.scopes_released(), 1);

    // Released for another consumer, with the attempt counted by the transport.
    assert_eq!(h.transport.pending(&Harness::source()), 1);
}

#[tokio::test]
async fn lost_lock_is_reported_not_retried() {
    let h = Harness::builder().build();

    // Never received, so it carries no lock token.
    let envelope = h.envelope(&PlaceOrder { order_id: 1 });
    let report = Dispatcher::new(h.runtime.clone(), CancellationToken::new())
        .dispatch(envelope)
        .await;

    assert!(report.succeeded());
    assert!(matches!(report.settle_error, Some(TransportError::LockLost { .. })));
    assert_eq!(report.states.last(), Some(&DispatchState::Closed));
    assert!(h.transport.settlements().is_empty());
}
