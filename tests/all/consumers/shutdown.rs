use super::{scripted_consumer, TestConsumer};
use crate::helpers::BrokerCall;
use carrot_listener::consumers::delivery_channel;
use std::future::ready;
use std::time::Duration;

#[tokio::test]
async fn queued_deliveries_are_drained_on_shutdown() {
    // Arrange
    let TestConsumer { worker, broker, .. } = scripted_consumer(|h| h);
    let ledger = worker.ledger();
    let (sender, receiver) = delivery_channel(10);
    for delivery_tag in 1..=3 {
        broker
            .deliver(&sender, delivery_tag, "app.info", "hello")
            .await;
    }
    // The broker client hangs up once the consumer has been cancelled.
    drop(sender);

    // Act
    let outcome = worker.run_until_shutdown(receiver, ready(())).await;

    // Assert
    assert!(outcome.is_ok());
    let mut calls = broker.calls();
    calls.sort_by_key(BrokerCall::delivery_tag);
    assert_eq!(
        calls,
        vec![BrokerCall::ack(1), BrokerCall::ack(2), BrokerCall::ack(3)]
    );
    assert_eq!(ledger.in_flight(), 0);
}

#[tokio::test]
async fn in_flight_deliveries_complete_before_the_worker_returns() {
    // Arrange
    let TestConsumer {
        worker,
        broker,
        context,
    } = scripted_consumer(|h| h);
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 1, "app.info", "sleep:200").await;

    let shutdown = {
        let broker = broker.clone();
        async move {
            // Give the worker the time to pick the delivery up, then hang up.
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(sender);
            assert!(broker.calls().is_empty());
        }
    };

    // Act
    let outcome = worker.run_until_shutdown(receiver, shutdown).await;

    // Assert
    assert!(outcome.is_ok());
    assert_eq!(broker.calls(), vec![BrokerCall::ack(1)]);
    assert_eq!(
        *context.processed.lock().unwrap(),
        vec!["sleep:200".to_owned()]
    );
}
