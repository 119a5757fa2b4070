use super::{scripted_consumer, TestConsumer};
use crate::helpers::{fake_log_line, BrokerCall};
use carrot_listener::consumers::{delivery_channel, AckMode, BindingKey};
use fake::Fake;
use std::future::pending;

#[tokio::test]
async fn a_successfully_processed_message_is_acknowledged_once() {
    // Arrange
    let TestConsumer {
        worker,
        broker,
        context,
    } = scripted_consumer(|h| h);
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 1, "app.info", "hello").await;

    // Act
    worker
        .exit_after(1)
        .run_until_shutdown(receiver, pending())
        .await
        .unwrap();

    // Assert
    assert_eq!(broker.calls(), vec![BrokerCall::ack(1)]);
    assert_eq!(*context.processed.lock().unwrap(), vec!["hello".to_owned()]);
}

#[tokio::test]
async fn a_failed_message_is_negatively_acknowledged_without_requeue() {
    // Arrange
    let TestConsumer { worker, broker, .. } = scripted_consumer(|h| h);
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 2, "app.info", "bad").await;

    // Act
    worker
        .exit_after(1)
        .run_until_shutdown(receiver, pending())
        .await
        .unwrap();

    // Assert
    assert_eq!(broker.calls(), vec![BrokerCall::discard(2)]);
}

#[tokio::test]
async fn a_payload_that_is_not_utf8_is_negatively_acknowledged() {
    // Arrange
    let TestConsumer {
        worker,
        broker,
        context,
    } = scripted_consumer(|h| h);
    let (sender, receiver) = delivery_channel(10);
    broker
        .deliver(&sender, 1, "app.info", vec![0xff, 0xfe, 0xfd])
        .await;

    // Act
    worker
        .exit_after(1)
        .run_until_shutdown(receiver, pending())
        .await
        .unwrap();

    // Assert
    assert_eq!(broker.calls(), vec![BrokerCall::discard(1)]);
    // The handler never saw the message.
    assert!(context.processed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_deliveries_are_settled_independently_of_their_order() {
    // Arrange
    let TestConsumer { worker, broker, .. } = scripted_consumer(|h| h);
    let (sender, receiver) = delivery_channel(10);
    // 3 only completes (and fails) after 4 has been acknowledged.
    broker.deliver(&sender, 3, "app.info", "after-ack:4").await;
    broker.deliver(&sender, 4, "app.info", "hello").await;

    // Act
    worker
        .exit_after(2)
        .run_until_shutdown(receiver, pending())
        .await
        .unwrap();

    // Assert
    assert_eq!(
        broker.calls(),
        vec![BrokerCall::ack(4), BrokerCall::discard(3)]
    );
}

#[tokio::test]
async fn a_panicking_handler_leads_to_a_negative_acknowledgement() {
    // Arrange
    let TestConsumer { worker, broker, .. } = scripted_consumer(|h| h);
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 1, "app.info", "panic").await;
    broker.deliver(&sender, 2, "app.info", "hello").await;

    // Act
    let outcome = worker
        .exit_after(2)
        .run_until_shutdown(receiver, pending())
        .await;

    // Assert
    assert!(outcome.is_ok());
    let calls = broker.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.contains(&BrokerCall::discard(1)));
    assert!(calls.contains(&BrokerCall::ack(2)));
}

#[tokio::test]
async fn failed_messages_are_requeued_if_asked_to() {
    // Arrange
    let TestConsumer { worker, broker, .. } = scripted_consumer(|h| h.requeue_on_failure(true));
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 1, "app.info", "bad").await;

    // Act
    worker
        .exit_after(1)
        .run_until_shutdown(receiver, pending())
        .await
        .unwrap();

    // Assert
    assert_eq!(
        broker.calls(),
        vec![BrokerCall::Nack {
            delivery_tag: 1,
            multiple: false,
            requeue: true
        }]
    );
}

#[tokio::test]
async fn nothing_is_sent_to_the_broker_in_automatic_ack_mode() {
    // Arrange
    let TestConsumer {
        worker,
        broker,
        context,
    } = scripted_consumer(|h| h.ack_mode(AckMode::Automatic));
    let ledger = worker.ledger();
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 1, "app.info", "hello").await;
    broker.deliver(&sender, 2, "app.info", "bad").await;

    // Act
    worker
        .exit_after(2)
        .run_until_shutdown(receiver, pending())
        .await
        .unwrap();

    // Assert
    assert!(broker.calls().is_empty());
    assert_eq!(*context.processed.lock().unwrap(), vec!["hello".to_owned()]);
    assert_eq!(ledger.in_flight(), 0);
}

#[tokio::test]
async fn messages_outside_the_binding_keys_are_still_processed() {
    // Arrange
    let TestConsumer { worker, broker, .. } =
        scripted_consumer(|h| h.with_binding_key(BindingKey::new("*.info").unwrap()));
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 1, "app.error", "hello").await;

    // Act
    worker
        .exit_after(1)
        .run_until_shutdown(receiver, pending())
        .await
        .unwrap();

    // Assert
    assert_eq!(broker.calls(), vec![BrokerCall::ack(1)]);
}

#[tokio::test]
async fn every_delivery_receives_exactly_one_decision() {
    // Arrange
    let TestConsumer { worker, broker, .. } = scripted_consumer(|h| h);
    let ledger = worker.ledger();
    let n_messages: u64 = (10..30).fake();
    let (sender, receiver) = delivery_channel(32);
    let mut expected = Vec::new();
    for delivery_tag in 1..=n_messages {
        let failing: bool = (0..3).fake::<u8>() == 0;
        let payload = if failing { "bad".to_owned() } else { fake_log_line() };
        broker
            .deliver(&sender, delivery_tag, "app.info", payload)
            .await;
        expected.push(if failing {
            BrokerCall::discard(delivery_tag)
        } else {
            BrokerCall::ack(delivery_tag)
        });
    }

    // Act
    worker
        .exit_after(n_messages as usize)
        .run_until_shutdown(receiver, pending())
        .await
        .unwrap();

    // Assert
    let mut calls = broker.calls();
    calls.sort_by_key(BrokerCall::delivery_tag);
    assert_eq!(calls, expected);
    assert_eq!(broker.unsettled(), 0);
    assert_eq!(ledger.in_flight(), 0);
}

#[tokio::test]
async fn deliveries_wait_for_a_free_slot_when_in_flight_processing_is_bounded() {
    // Arrange
    let TestConsumer {
        worker,
        broker,
        context,
    } = scripted_consumer(|h| h.ack_mode(AckMode::Automatic));
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 1, "app.info", "sleep:50").await;
    broker.deliver(&sender, 2, "app.info", "hello").await;

    // Act
    worker
        .max_in_flight(1)
        .exit_after(2)
        .run_until_shutdown(receiver, pending())
        .await
        .unwrap();

    // Assert
    // Unbounded, the second delivery would complete first.
    assert_eq!(
        *context.processed.lock().unwrap(),
        vec!["sleep:50".to_owned(), "hello".to_owned()]
    );
    assert!(broker.calls().is_empty());
}
