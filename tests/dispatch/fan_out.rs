//! Event fan-out: every handler runs, failures are aggregated.

use courier_rust::{DeliveryDecision, DispatchError};

use crate::support::{Behavior, Harness, OrderPlaced, OuterInterceptor};

const EVENT_HANDLERS: usize = 3;

#[tokio::test]
async fn every_event_handler_runs() {
    let h = Harness::builder().build();

    let report = h.deliver(&OrderPlaced { order_id: 1 }).await;

    assert!(report.succeeded());
    assert_eq!(h.journal.count("receipt"), 1);
    assert_eq!(h.journal.count("stock"), 1);
    assert_eq!(h.journal.count("loyalty"), 1);
}

#[tokio::test]
async fn one_failing_handler_does_not_stop_the_others() {
    let h = Harness::builder()
        .behavior(Behavior::Fail)
        .max_attempts(2)
        .build();

    let report = h.deliver(&OrderPlaced { order_id: 2 }).await;

    assert_eq!(h.journal.count("receipt"), 1);
    assert_eq!(h.journal.count("stock"), 1);
    assert_eq!(h.journal.count("loyalty"), 1);
    match &report.outcome {
        Err(DispatchError::Aggregate { failures, handlers }) => {
            assert_eq!(*handlers, EVENT_HANDLERS);
            assert_eq!(failures.len(), 1);
            assert!(failures[0].handler.ends_with("StockHandler"));
        }
        other => panic!("expected aggregate failure, got {other:?}"),
    }
    // The whole event is retried, succeeding handlers included.
    assert!(matches!(report.decision, DeliveryDecision::RetryAfter(_)));
}

#[tokio::test]
async fn aggregate_dead_letter_reason_names_the_failed_handler() {
    let h = Harness::builder()
        .behavior(Behavior::Fail)
        .max_attempts(1)
        .build();

    let report = h.deliver(&OrderPlaced { order_id: 3 }).await;

    match report.decision {
        DeliveryDecision::DeadLetter(reason) => {
            assert!(reason.contains("1 of 3 event handlers failed"));
            assert!(reason.contains("StockHandler"));
        }
        other => panic!("expected dead letter, got {other:?}"),
    }
}

#[tokio::test]
async fn global_interceptors_wrap_each_event_handler() {
    let h = Harness::builder()
        .globals(vec![OuterInterceptor::key()])
        .build();

    h.deliver(&OrderPlaced { order_id: 4 }).await;

    assert_eq!(h.journal.count("outer.executing"), EVENT_HANDLERS);
    assert_eq!(h.journal.count("outer.success"), EVENT_HANDLERS);
}

#[tokio::test]
async fn each_event_handler_gets_its_own_hook_outcome() {
    let h = Harness::builder()
        .behavior(Behavior::Fail)
        .max_attempts(2)
        .build();

    let report = h.deliver(&OrderPlaced { order_id: 5 }).await;

    assert_eq!(h.journal.count("receipt-audit.success"), 1);
    assert_eq!(h.journal.count("loyalty-audit.success"), 1);
    assert_eq!(h.journal.count("stock-audit.error"), 1);
    assert_eq!(h.journal.count("stock-audit.success"), 0);
    assert_eq!(h.journal.count("receipt-audit.error"), 0);
    assert_eq!(h.journal.count("loyalty-audit.error"), 0);
    match &report.outcome {
        Err(DispatchError::Aggregate { failures, handlers }) => {
            assert_eq!(*handlers, EVENT_HANDLERS);
            assert_eq!(failures.len(), 1);
            assert!(failures[0].handler.ends_with("StockHandler"));
        }
        other => panic!("expected aggregate failure, got {other:?}"),
    }
}
