use super::{scripted_consumer, TestConsumer};
use crate::helpers::{BrokerCall, InMemoryBroker};
use carrot_listener::amqp::options::BasicAckOptions;
use carrot_listener::consumers::{
    delivery_channel, Acknowledger, BrokerError, ConsumerError, LedgerError,
};
use std::future::pending;

#[tokio::test]
async fn the_broker_double_refuses_to_settle_a_delivery_twice() {
    let broker = InMemoryBroker::default();
    let (sender, _receiver) = delivery_channel(1);
    broker.deliver(&sender, 1, "app.info", "hello").await;

    broker.ack(1, BasicAckOptions::default()).await.unwrap();
    let second = broker.ack(1, BasicAckOptions::default()).await;

    assert!(matches!(second, Err(BrokerError::UnknownDeliveryTag(1))));
    assert_eq!(broker.calls(), vec![BrokerCall::ack(1)]);
}

#[tokio::test]
async fn a_failed_acknowledgement_stops_the_worker() {
    // Arrange
    let TestConsumer { worker, broker, .. } = scripted_consumer(|h| h);
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 1, "app.info", "hello").await;
    broker.close();

    // Act
    let outcome = worker.run_until_shutdown(receiver, pending()).await;

    // Assert
    assert!(matches!(
        outcome,
        Err(ConsumerError::Settlement {
            delivery_tag: 1,
            source: BrokerError::ChannelClosed
        })
    ));
    assert!(broker.calls().is_empty());
    drop(sender);
}

#[tokio::test]
async fn a_reused_delivery_tag_stops_the_worker() {
    // Arrange
    let TestConsumer { worker, broker, .. } = scripted_consumer(|h| h);
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 5, "app.info", "hello").await;
    broker.deliver(&sender, 5, "app.info", "hello again").await;

    // Act
    let outcome = worker.run_until_shutdown(receiver, pending()).await;

    // Assert
    assert!(matches!(
        outcome,
        Err(ConsumerError::Ledger(LedgerError::DuplicateDeliveryTag {
            delivery_tag: 5,
            last_seen: 5
        }))
    ));
    // The first delivery was processed before the worker returned.
    assert_eq!(broker.calls(), vec![BrokerCall::ack(5)]);
    drop(sender);
}

#[tokio::test]
async fn a_broken_delivery_stream_stops_the_worker() {
    // Arrange
    let TestConsumer { worker, .. } = scripted_consumer(|h| h);
    let (sender, receiver) = delivery_channel(10);
    sender.send(Err(BrokerError::ChannelClosed)).await.unwrap();

    // Act
    let outcome = worker.run_until_shutdown(receiver, pending()).await;

    // Assert
    assert!(matches!(
        outcome,
        Err(ConsumerError::Broker(BrokerError::ChannelClosed))
    ));
}

#[tokio::test]
async fn a_delivery_stream_closing_without_shutdown_is_an_error() {
    // Arrange
    let TestConsumer { worker, broker, .. } = scripted_consumer(|h| h);
    let (sender, receiver) = delivery_channel(10);
    broker.deliver(&sender, 1, "app.info", "hello").await;
    drop(sender);

    // Act
    let outcome = worker.run_until_shutdown(receiver, pending()).await;

    // Assert
    assert!(matches!(
        outcome,
        Err(ConsumerError::DeliveryStreamClosed { ref queue_name }) if queue_name == "logs"
    ));
    assert_eq!(broker.calls(), vec![BrokerCall::ack(1)]);
}
