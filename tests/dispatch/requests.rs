//! Request handling on the responder side.

use courier_rust::interceptor::HookPoint;
use courier_rust::transport::Destination;
use courier_rust::{Codec, DeliveryDecision, MessageKind};

use crate::support::{Behavior, Failures, GetQuote, Harness, OuterInterceptor, Quote};

const CALLER: &str = "r.caller.node-1";

fn request(h: &Harness) -> courier_rust::Envelope {
    h.envelope(&GetQuote { sku: "sku-1".into() })
        .with_correlation_id("corr-1")
        .with_reply_to(CALLER)
}

fn replies(h: &Harness) -> Vec<courier_rust::Envelope> {
    h.transport
        .sent_to(&Destination::Queue(CALLER.to_string()))
}

#[tokio::test]
async fn response_goes_to_the_reply_queue() {
    let h = Harness::builder().build();

    let report = h.deliver_envelope(request(&h)).await;

    assert!(report.succeeded());
    let replies = replies(&h);
    assert_eq!(replies.len(), 1);
    let reply = &replies[0];
    assert_eq!(reply.message_type, "tests.get_quote.reply");
    assert_eq!(reply.kind(), Some(MessageKind::Reply));
    assert_eq!(reply.correlation_id.as_deref(), Some("corr-1"));
    assert!(reply.reply_failure().is_none());
    let quote: Quote = Codec::Json.decode(&reply.payload).unwrap();
    assert_eq!(
        quote,
        Quote {
            sku: "sku-1".into(),
            cents: 1299
        }
    );
}

#[tokio::test]
async fn retried_request_sends_no_reply_yet() {
    let h = Harness::builder()
        .behavior(Behavior::Fail)
        .max_attempts(2)
        .build();

    let report = h.deliver_envelope(request(&h)).await;

    assert!(matches!(report.decision, DeliveryDecision::RetryAfter(_)));
    assert!(replies(&h).is_empty());
}

#[tokio::test]
async fn dead_lettered_request_answers_with_a_failure_reply() {
    let h = Harness::builder()
        .behavior(Behavior::Fail)
        .max_attempts(1)
        .build();

    let report = h.deliver_envelope(request(&h)).await;

    assert!(matches!(report.decision, DeliveryDecision::DeadLetter(_)));
    let replies = replies(&h);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].correlation_id.as_deref(), Some("corr-1"));
    let reason = replies[0].reply_failure().expect("failure reply");
    assert!(reason.contains("boom"));
}

#[tokio::test]
async fn failing_success_hook_sends_only_the_failure_reply() {
    let h = Harness::builder()
        .globals(vec![OuterInterceptor::key()])
        .failures(Failures {
            outer: Some(HookPoint::Success),
            ..Failures::default()
        })
        .max_attempts(1)
        .build();

    let report = h.deliver_envelope(request(&h)).await;

    assert!(matches!(report.decision, DeliveryDecision::DeadLetter(_)));
    assert_eq!(h.journal.count("outer.success"), 1);
    let replies = replies(&h);
    assert_eq!(replies.len(), 1);
    let reason = replies[0].reply_failure().expect("failure reply");
    assert!(reason.contains("outer refused"));
}

#[tokio::test]
async fn success_hook_failure_on_retry_sends_no_reply_yet() {
    let h = Harness::builder()
        .globals(vec![OuterInterceptor::key()])
        .failures(Failures {
            outer: Some(HookPoint::Success),
            ..Failures::default()
        })
        .max_attempts(2)
        .build();

    let report = h.deliver_envelope(request(&h)).await;

    assert!(matches!(report.decision, DeliveryDecision::RetryAfter(_)));
    assert!(replies(&h).is_empty());
}

#[tokio::test]
async fn request_without_reply_to_still_completes() {
    let h = Harness::builder().build();

    let envelope = h.envelope(&GetQuote { sku: "sku-2".into() });
    let report = h.deliver_envelope(envelope).await;

    assert!(report.succeeded());
    assert_eq!(report.decision, DeliveryDecision::Complete);
    assert!(h
        .transport
        .sent()
        .iter()
        .all(|(_, envelope)| !envelope.is_reply()));
}
