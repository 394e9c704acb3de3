//! Send and publish, end to end.

use std::collections::BTreeMap;

use courier_rust::message::CAUSATION_ID_PROPERTY;
use courier_rust::transport::{routing, Destination};
use courier_rust::{BusError, InMemoryTransport, MessageKind};
use serde_json::json;

use crate::support::{eventually, Audited, Deposit, TestBus, WAIT};

#[tokio::test]
async fn command_is_handled_and_its_event_fans_out() {
    let t = TestBus::started(|b| b).await;

    t.bus
        .send(&Deposit {
            account: "alice".into(),
            amount: 10,
        })
        .await
        .unwrap();

    assert!(eventually(WAIT, || t.ledger.audit() == vec!["alice:10".to_string()]).await);
    assert_eq!(t.ledger.balance("alice"), Some(10));

    // The event was caused by the command and shares its correlation.
    let command = &t
        .transport
        .sent_to(&Destination::Queue(routing::command_queue("ledger.deposit")))[0];
    let event = &t
        .transport
        .sent_to(&Destination::Topic(routing::event_topic("ledger.deposited")))[0];
    assert_eq!(event.kind(), Some(MessageKind::Event));
    assert_eq!(event.property(CAUSATION_ID_PROPERTY), Some(command.id.as_str()));
    assert_eq!(event.correlation_id, command.correlation_id);

    t.bus.stop().await.unwrap();
}

#[tokio::test]
async fn event_without_subscribers_is_dropped() {
    let t = TestBus::build(|b| b);

    t.bus
        .publish(&Audited {
            note: "nobody listens".into(),
        })
        .await
        .unwrap();

    assert_eq!(t.transport.sent().len(), 1);
    assert_eq!(t.transport.in_flight(), 0);
}

#[tokio::test]
async fn rejected_command_is_dead_lettered_after_max_attempts() {
    let t = TestBus::started(|b| b.with_max_delivery_attempts(2)).await;

    t.bus
        .send(&Deposit {
            account: "bob".into(),
            amount: -5,
        })
        .await
        .unwrap();

    assert!(eventually(WAIT, || t.transport.dead_letters().len() == 1).await);
    let stats = t.bus.stop().await.unwrap();

    let dead = &t.transport.dead_letters()[0];
    assert_eq!(dead.envelope.delivery_attempt(), 2);
    assert!(dead.reason.contains("amount must be positive"));

    let deposits = stats
        .iter()
        .find(|s| s.source == routing::command_queue("ledger.deposit"))
        .unwrap();
    assert_eq!(deposits.received, 2);
    assert_eq!(deposits.retried, 1);
    assert_eq!(deposits.dead_lettered, 1);
    assert_eq!(t.ledger.balance("bob"), None);
}

#[tokio::test]
async fn send_json_routes_by_message_type_name() {
    let t = TestBus::started(|b| b).await;

    let mut headers = BTreeMap::new();
    headers.insert("x-request-id".to_string(), "req-42".to_string());
    let id = t
        .bus
        .send_json(
            "ledger.deposit",
            &json!({ "account": "carol", "amount": 7 }),
            headers,
        )
        .await
        .unwrap();

    assert!(eventually(WAIT, || t.ledger.balance("carol") == Some(7)).await);
    let sent = t
        .transport
        .sent()
        .into_iter()
        .find(|(_, e)| e.id == id)
        .map(|(_, e)| e)
        .unwrap();
    assert_eq!(sent.property("x-request-id"), Some("req-42"));
    assert_eq!(sent.kind(), Some(MessageKind::Command));

    t.bus.stop().await.unwrap();
}

#[tokio::test]
async fn send_json_refuses_unknown_and_request_types() {
    let t = TestBus::build(|b| b);

    let unknown = t
        .bus
        .send_json("ledger.nope", &json!({}), BTreeMap::new())
        .await;
    assert!(matches!(unknown, Err(BusError::UnknownMessageType(ref t)) if t == "ledger.nope"));

    let request = t
        .bus
        .send_json("ledger.get_balance", &json!({ "account": "x" }), BTreeMap::new())
        .await;
    assert!(matches!(
        request,
        Err(BusError::UnsupportedKind {
            kind: MessageKind::Request,
            ..
        })
    ));
    assert!(t.transport.sent().is_empty());
}

#[tokio::test]
async fn instances_of_one_application_compete_for_messages() {
    let transport = InMemoryTransport::recording();
    let first = TestBus::on(transport.clone(), "node-1", |b| b);
    let second = TestBus::on(transport.clone(), "node-2", |b| b);
    first.bus.start().await.unwrap();
    second.bus.start().await.unwrap();

    for _ in 0..20 {
        first
            .bus
            .send(&Deposit {
                account: "dave".into(),
                amount: 1,
            })
            .await
            .unwrap();
    }

    let total = || {
        first.ledger.balance("dave").unwrap_or(0) + second.ledger.balance("dave").unwrap_or(0)
    };
    let audited = || first.ledger.audit().len() + second.ledger.audit().len();
    assert!(eventually(WAIT, || total() == 20 && audited() == 20).await);

    first.bus.stop().await.unwrap();
    second.bus.stop().await.unwrap();

    // Each command and each event was handled once across both instances.
    assert_eq!(total(), 20);
    assert_eq!(audited(), 20);
}
