use amq_protocol_types::{DeliveryTag, ShortString};
use lapin::BasicProperties;
use std::sync::Arc;

/// A decoded message enriched with some auxiliary data, ready for processing.
///
/// `Incoming` is the input type of message handlers (check out
/// [`Handler`](crate::consumers::Handler)'s docs for more details).
pub struct Incoming<'d, C> {
    /// `context` is a set of resources that are required to process the message and are outside
    /// the lifecycle of the message itself - e.g. an HTTP client for a third-party API, a db connection
    /// pool, etc.
    ///
    /// The context is behind an `Arc` pointer: messages are processed concurrently, each on its
    /// own task, and they all share the same context.
    pub context: Arc<C>,
    /// `message` is what we received from RabbitMq: it includes headers, payload, delivery tag, etc.
    pub message: &'d Delivery,
    /// The message payload, decoded as UTF-8.
    pub payload: &'d str,
    /// The name of the queue the message was consumed from.
    pub queue_name: &'d str,
}

/// A received AMQP message.
///
/// Unlike [`lapin::message::Delivery`] it does not carry an acker: settling the message with
/// the broker is the job of the consumer, never of the message handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The broker-assigned identifier of this delivery, unique per channel.
    pub delivery_tag: DeliveryTag,
    /// The exchange the message was published to.
    /// Empty if the default exchange was used.
    pub exchange: ShortString,
    /// The routing key the message was published with.
    pub routing_key: ShortString,
    /// Whether this message was delivered before and not acknowledged.
    pub redelivered: bool,
    /// The properties and headers of the message.
    pub properties: BasicProperties,
    /// The payload of the message in binary format.
    pub data: Vec<u8>,
}

impl Delivery {
    /// A delivery with default properties, mostly useful to feed a
    /// [`DeliveryWorker`](crate::consumers::DeliveryWorker) without a broker.
    pub fn new(delivery_tag: DeliveryTag, routing_key: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            exchange: ShortString::from(""),
            routing_key: routing_key.into(),
            redelivered: false,
            properties: BasicProperties::default(),
            data: data.into(),
        }
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            exchange: value.exchange,
            routing_key: value.routing_key,
            redelivered: value.redelivered,
            properties: value.properties,
            data: value.data,
        }
    }
}
