//! Bounded concurrency per dispatch loop.

use std::time::Duration;

use courier_rust::transport::{routing, Source};

use crate::support::{eventually, Deposit, TestBus, Work, WAIT};

fn work_queue() -> Source {
    Source::Queue(routing::command_queue("ledger.work"))
}

#[tokio::test]
async fn at_most_max_concurrent_dispatches_run_at_once() {
    let t = TestBus::started(|b| b.with_max_concurrent_handlers(2)).await;

    for id in 0..3 {
        t.bus.send(&Work { id }).await.unwrap();
    }

    assert!(eventually(WAIT, || t.gate.running() == 2).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(t.gate.running(), 2);
    // The third message is not even received while both permits are taken.
    assert_eq!(t.transport.pending(&work_queue()), 1);

    t.gate.release(3);
    assert!(eventually(WAIT, || t.gate.finished() == 3).await);

    let stats = t.bus.stop().await.unwrap();
    let work = stats
        .iter()
        .find(|s| s.source == work_queue().path())
        .unwrap();
    assert_eq!(work.completed, 3);
    assert_eq!(work.peak_in_flight, 2);
    assert_eq!(t.gate.peak(), 2);
}

#[tokio::test]
async fn a_saturated_source_does_not_block_other_sources() {
    let t = TestBus::started(|b| b.with_max_concurrent_handlers(1)).await;

    t.bus.send(&Work { id: 1 }).await.unwrap();
    assert!(eventually(WAIT, || t.gate.running() == 1).await);

    t.bus
        .send(&Deposit {
            account: "frank".into(),
            amount: 4,
        })
        .await
        .unwrap();
    assert!(eventually(WAIT, || t.ledger.balance("frank") == Some(4)).await);

    t.gate.release(1);
    t.bus.stop().await.unwrap();
    assert_eq!(t.gate.finished(), 1);
}
