//! Start/stop lifecycle and graceful shutdown.

use std::time::Duration;

use courier_rust::transport::{routing, Settlement, Source};
use courier_rust::BusError;

use crate::support::{eventually, Deposit, TestBus, Work, WAIT};

fn work_queue() -> Source {
    Source::Queue(routing::command_queue("ledger.work"))
}

#[tokio::test]
async fn stop_waits_for_in_flight_dispatches() {
    let t = TestBus::started(|b| b).await;
    t.bus.send(&Work { id: 1 }).await.unwrap();
    t.bus.send(&Work { id: 2 }).await.unwrap();
    assert!(eventually(WAIT, || t.gate.running() == 2).await);

    let bus = t.bus.clone();
    let stopping = tokio::spawn(async move { bus.stop().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stopping.is_finished());
    assert!(!t.bus.is_running());

    t.gate.release(2);
    let stats = stopping.await.unwrap().unwrap();
    let work = stats
        .iter()
        .find(|s| s.source == work_queue().path())
        .unwrap();
    assert_eq!(work.completed, 2);
    assert_eq!(work.cancelled, 0);
}

#[tokio::test]
async fn nothing_is_received_after_stop() {
    let t = TestBus::started(|b| b).await;
    t.bus.stop().await.unwrap();

    t.bus.send(&Work { id: 1 }).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(t.transport.pending(&work_queue()), 1);
    assert_eq!(t.gate.running(), 0);
}

#[tokio::test]
async fn expired_grace_period_cancels_and_releases_messages() {
    let t = TestBus::started(|b| b.with_shutdown_grace(Duration::from_millis(50))).await;
    t.bus.send(&Work { id: 1 }).await.unwrap();
    assert!(eventually(WAIT, || t.gate.running() == 1).await);

    let stats = t.bus.stop().await.unwrap();

    let work = stats
        .iter()
        .find(|s| s.source == work_queue().path())
        .unwrap();
    assert_eq!(work.cancelled, 1);
    assert_eq!(work.completed, 0);
    assert_eq!(work.dead_lettered, 0);

    let settlements = t.transport.settlements();
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].1, Settlement::Abandoned);
    // Back on the queue for the next consumer.
    assert_eq!(t.transport.pending(&work_queue()), 1);
    assert!(t.transport.dead_letters().is_empty());
}

#[tokio::test]
async fn lifecycle_misuse_is_reported() {
    let t = TestBus::build(|b| b);

    assert!(matches!(t.bus.stop().await, Err(BusError::NotRunning)));
    t.bus.start().await.unwrap();
    assert!(matches!(t.bus.start().await, Err(BusError::AlreadyStarted)));
    t.bus.stop().await.unwrap();
    assert!(matches!(t.bus.stop().await, Err(BusError::NotRunning)));
}

#[tokio::test]
async fn a_stopped_bus_can_be_started_again() {
    let t = TestBus::started(|b| b).await;
    t.bus.stop().await.unwrap();
    t.bus.start().await.unwrap();

    t.bus
        .send(&Deposit {
            account: "gina".into(),
            amount: 2,
        })
        .await
        .unwrap();
    assert!(eventually(WAIT, || t.ledger.balance("gina") == Some(2)).await);

    t.bus.stop().await.unwrap();
}

#[tokio::test]
async fn stop_reports_one_loop_per_source() {
    let t = TestBus::started(|b| b).await;
    assert_eq!(t.bus.loop_stats().await.len(), 5);

    let stats = t.bus.stop().await.unwrap();

    let mut reported: Vec<String> = stats.into_iter().map(|s| s.source).collect();
    reported.sort();
    let mut expected: Vec<String> = t.bus.sources().iter().map(Source::path).collect();
    expected.sort();
    assert_eq!(reported, expected);
    assert!(t.bus.loop_stats().await.is_empty());
}
