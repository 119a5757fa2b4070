use amq_protocol_types::DeliveryTag;
use carrot_listener::amqp::options::{BasicAckOptions, BasicNackOptions};
use carrot_listener::consumers::{Acknowledger, BrokerError, Delivery, DeliverySender};
use fake::{faker::lorem::en::Sentence, Fake};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerCall {
    Ack {
        delivery_tag: DeliveryTag,
        multiple: bool,
    },
    Nack {
        delivery_tag: DeliveryTag,
        multiple: bool,
        requeue: bool,
    },
}

impl BrokerCall {
    pub fn ack(delivery_tag: DeliveryTag) -> Self {
        Self::Ack {
            delivery_tag,
            multiple: false,
        }
    }

    pub fn discard(delivery_tag: DeliveryTag) -> Self {
        Self::Nack {
            delivery_tag,
            multiple: false,
            requeue: false,
        }
    }

    pub fn delivery_tag(&self) -> DeliveryTag {
        match self {
            Self::Ack { delivery_tag, .. } | Self::Nack { delivery_tag, .. } => *delivery_tag,
        }
    }
}

/// Behaves like a RabbitMq channel as far as settlement goes: it only accepts tags it delivered
/// and that were not settled yet, and refuses everything once closed.
#[derive(Default)]
pub struct InMemoryBroker {
    unsettled: Mutex<HashSet<DeliveryTag>>,
    calls: Mutex<Vec<BrokerCall>>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    /// Push a message to the consumer.
    pub async fn deliver(
        &self,
        sender: &DeliverySender,
        delivery_tag: DeliveryTag,
        routing_key: &str,
        payload: impl Into<Vec<u8>>,
    ) {
        self.unsettled.lock().unwrap().insert(delivery_tag);
        sender
            .send(Ok(Delivery::new(delivery_tag, routing_key, payload)))
            .await
            .expect("The worker stopped listening for deliveries.");
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Every successful settlement, in order.
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn unsettled(&self) -> usize {
        self.unsettled.lock().unwrap().len()
    }

    fn settle(&self, call: BrokerCall) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed);
        }
        let delivery_tag = call.delivery_tag();
        if !self.unsettled.lock().unwrap().remove(&delivery_tag) {
            return Err(BrokerError::UnknownDeliveryTag(delivery_tag));
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Acknowledger for InMemoryBroker {
    async fn ack(
        &self,
        delivery_tag: DeliveryTag,
        options: BasicAckOptions,
    ) -> Result<(), BrokerError> {
        self.settle(BrokerCall::Ack {
            delivery_tag,
            multiple: options.multiple,
        })
    }

    async fn nack(
        &self,
        delivery_tag: DeliveryTag,
        options: BasicNackOptions,
    ) -> Result<(), BrokerError> {
        self.settle(BrokerCall::Nack {
            delivery_tag,
            multiple: options.multiple,
            requeue: options.requeue,
        })
    }
}

pub fn fake_log_line() -> String {
    Sentence(3..8).fake()
}
