//! Bus contract tests
//!
//! Runs the EventBus contract against the in-memory backend. The same
//! guarantees hold for the Redis and Kafka backends; their live suites are
//! `#[ignore]`d in the backend modules and need a running server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use event_bus::{EventBus, EventType, FnHandler, HandlerError, MemoryBus};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;

async fn initialized_bus() -> Arc<MemoryBus> {
    let bus = Arc::new(MemoryBus::new());
    bus.initialize().await.unwrap();
    bus
}

async fn collect(stream: &mut event_bus::EventStream) -> Vec<event_bus::EventEnvelope> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event.unwrap());
    }
    events
}

#[tokio::test]
async fn replay_is_deterministic_and_ordered() {
    let bus = initialized_bus().await;

    let before = Utc::now();
    let mut ids = Vec::new();
    for i in 0..5 {
        let id = bus
            .publish(
                EventType::OpportunityCreated,
                json!({"n": i}),
                "test",
                None,
                None,
            )
            .await
            .unwrap();
        ids.push(id);
        // Distinct timestamps so ordering is meaningful
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let after = Utc::now();

    let mut stream = bus
        .replay(EventType::OpportunityCreated, before, Some(after), None)
        .await
        .unwrap();
    let replayed = collect(&mut stream).await;

    assert_eq!(
        replayed.iter().map(|e| e.id).collect::<Vec<_>>(),
        ids,
        "replay must yield exactly the published events in publish order"
    );
    assert!(replayed
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));

    // Restartable: a second run with the same bounds yields the same set
    let mut stream = bus
        .replay(EventType::OpportunityCreated, before, Some(after), None)
        .await
        .unwrap();
    let replayed_again = collect(&mut stream).await;
    assert_eq!(
        replayed.iter().map(|e| e.id).collect::<Vec<_>>(),
        replayed_again.iter().map(|e| e.id).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn replay_respects_bounds_and_limit() {
    let bus = initialized_bus().await;

    for i in 0..4 {
        bus.publish(EventType::SignalDetected, json!({"n": i}), "test", None, None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // A from-bound in the future excludes everything
    let future = Utc::now() + chrono::Duration::hours(1);
    let mut stream = bus
        .replay(EventType::SignalDetected, future, None, None)
        .await
        .unwrap();
    assert!(collect(&mut stream).await.is_empty());

    // Limit truncates from the front of the ordered sequence
    let past = Utc::now() - chrono::Duration::hours(1);
    let mut stream = bus
        .replay(EventType::SignalDetected, past, None, Some(2))
        .await
        .unwrap();
    let limited = collect(&mut stream).await;
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].payload["n"], 0);
    assert_eq!(limited[1].payload["n"], 1);
}

#[tokio::test]
async fn each_subscriber_receives_every_event_once() {
    let bus = initialized_bus().await;

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();

    for (name, tx) in [("first", tx1), ("second", tx2)] {
        let handler = Arc::new(FnHandler::new(name, move |event| {
            let tx = tx.clone();
            let id = event.id;
            async move {
                let _ = tx.send(id);
                Ok(())
            }
        }));
        bus.subscribe(&[EventType::UserRegistered], handler)
            .await
            .unwrap();
    }

    let id = bus
        .publish(
            EventType::UserRegistered,
            json!({"user_id": "u-1"}),
            "test",
            None,
            None,
        )
        .await
        .unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timeout")
            .expect("closed");
        assert_eq!(received, id);
    }

    // Exactly once under normal operation: no second delivery
    for rx in [&mut rx1, &mut rx2] {
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }
}

#[tokio::test]
async fn handler_failure_does_not_block_subsequent_events() {
    let bus = initialized_bus().await;

    let attempts = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let attempts_clone = attempts.clone();

    let handler = Arc::new(FnHandler::new("flaky", move |event| {
        let tx = tx.clone();
        let attempts = attempts_clone.clone();
        let n = event.payload["n"].as_i64().unwrap_or(-1);
        async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Err(HandlerError::new("first event fails"));
            }
            let _ = tx.send(n);
            Ok(())
        }
    }));
    bus.subscribe(&[EventType::ValidationSubmitted], handler)
        .await
        .unwrap();

    for n in 0..3 {
        bus.publish(
            EventType::ValidationSubmitted,
            json!({"n": n}),
            "test",
            None,
            None,
        )
        .await
        .unwrap();
    }

    let mut delivered = Vec::new();
    for _ in 0..2 {
        delivered.push(
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timeout")
                .expect("closed"),
        );
    }

    assert_eq!(delivered, vec![1, 2]);
    assert_eq!(attempts.load(Ordering::SeqCst), 3, "all events attempted");
}

#[tokio::test]
async fn shutdown_stops_dispatch() {
    let bus = initialized_bus().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = Arc::new(FnHandler::new("capture", move |event| {
        let tx = tx.clone();
        let id = event.id;
        async move {
            let _ = tx.send(id);
            Ok(())
        }
    }));
    bus.subscribe(&[EventType::SystemHealthCheck], handler)
        .await
        .unwrap();

    bus.publish(EventType::SystemHealthCheck, json!({}), "test", None, None)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timeout")
        .expect("closed");

    bus.shutdown().await.unwrap();

    // Publishing after shutdown is rejected; nothing more is delivered
    assert!(bus
        .publish(EventType::SystemHealthCheck, json!({}), "test", None, None)
        .await
        .is_err());
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .map(|r| r.is_none())
            .unwrap_or(true)
    );
}
