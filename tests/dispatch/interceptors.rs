//! Interceptor pipeline ordering and failure semantics.

use courier_rust::interceptor::HookPoint;
use courier_rust::{DispatchError, HandlerError};

use crate::support::{
    Behavior, Failures, Harness, InnerInterceptor, OuterInterceptor, PlaceOrder,
};

fn strs(entries: &[String]) -> Vec<&str> {
    entries.iter().map(String::as_str).collect()
}

fn harness(behavior: Behavior, failures: Failures) -> Harness {
    Harness::builder()
        .globals(vec![OuterInterceptor::key(), InnerInterceptor::key()])
        .behavior(behavior)
        .failures(failures)
        .max_attempts(1)
        .build()
}

#[tokio::test]
async fn hooks_wrap_the_handler_like_an_onion() {
    let h = harness(Behavior::Succeed, Failures::default());

    let report = h.deliver(&PlaceOrder { order_id: 7 }).await;

    assert!(report.succeeded());
    assert_eq!(
        strs(&h.journal.entries()),
        vec![
            "outer.executing",
            "inner.executing",
            "class.executing",
            "method.executing",
            "handler:7",
            "method.success",
            "class.success",
            "inner.success",
            "outer.success",
        ]
    );
}

#[tokio::test]
async fn handler_failure_runs_error_hooks_inside_out() {
    let h = harness(Behavior::Fail, Failures::default());

    let report = h.deliver(&PlaceOrder { order_id: 1 }).await;

    assert_eq!(
        strs(&h.journal.entries()),
        vec![
            "outer.executing",
            "inner.executing",
            "class.executing",
            "method.executing",
            "handler:1",
            "method.error",
            "class.error",
            "inner.error",
            "outer.error",
        ]
    );
    match report.outcome {
        Err(DispatchError::Handler(failure)) => {
            assert!(failure.handler.ends_with("OrderHandler"));
            assert!(matches!(failure.error, HandlerError::Failed(ref m) if m == "boom"));
            assert!(failure.suppressed.is_empty());
        }
        other => panic!("expected handler failure, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_executing_hook_skips_the_handler() {
    let h = harness(
        Behavior::Succeed,
        Failures {
            class: Some(HookPoint::Executing),
            ..Failures::default()
        },
    );

    let report = h.deliver(&PlaceOrder { order_id: 2 }).await;

    let entries = h.journal.entries();
    assert!(!entries.iter().any(|e| e.starts_with("handler")));
    assert!(!entries.iter().any(|e| e.starts_with("method.")));
    assert!(!entries.iter().any(|e| e.ends_with(".success")));
    assert_eq!(h.journal.count("outer.error"), 1);
    assert_eq!(h.journal.count("class.error"), 1);
    match report.outcome {
        Err(DispatchError::Handler(failure)) => {
            assert!(matches!(failure.error, HandlerError::Failed(ref m) if m == "class refused"));
        }
        other => panic!("expected handler failure, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_success_hook_turns_success_into_failure() {
    let h = harness(
        Behavior::Succeed,
        Failures {
            inner: Some(HookPoint::Success),
            ..Failures::default()
        },
    );

    let report = h.deliver(&PlaceOrder { order_id: 3 }).await;

    assert!(!report.succeeded());
    assert_eq!(h.journal.count("handler:3"), 1);
    assert_eq!(h.journal.count("outer.success"), 0);
    assert_eq!(h.journal.count("outer.error"), 1);
}

#[tokio::test]
async fn error_hook_failure_never_replaces_the_original_error() {
    let h = harness(
        Behavior::Fail,
        Failures {
            class: Some(HookPoint::Error),
            ..Failures::default()
        },
    );

    let report = h.deliver(&PlaceOrder { order_id: 4 }).await;

    // The remaining error hooks still ran.
    assert_eq!(h.journal.count("inner.error"), 1);
    assert_eq!(h.journal.count("outer.error"), 1);

    let failures = report.outcome.as_ref().unwrap_err().handler_failures();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].error, HandlerError::Failed(ref m) if m == "boom"));
    assert_eq!(failures[0].suppressed.len(), 1);
    assert_eq!(failures[0].suppressed[0].hook, HookPoint::Error);
    assert!(failures[0].suppressed[0].interceptor.ends_with("ClassInterceptor"));
}

#[tokio::test]
async fn handler_panic_is_reported_as_a_failure() {
    let h = harness(Behavior::Panic, Failures::default());

    let report = h.deliver(&PlaceOrder { order_id: 5 }).await;

    match report.outcome {
        Err(DispatchError::Handler(failure)) => {
            assert!(matches!(failure.error, HandlerError::Panicked(ref m) if m.contains("handler exploded")));
        }
        other => panic!("expected panic failure, got {other:?}"),
    }
    assert_eq!(h.journal.count("outer.error"), 1);
}
