use amq_protocol_types::DeliveryTag;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use lapin::{Channel, ChannelState};

/// Failures when talking to the broker.
///
/// None of these can be recovered by the consumer itself: the channel has to be re-opened and the
/// consumer re-subscribed by the hosting process.
#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("The AMQP channel failed.")]
    Channel(#[from] lapin::Error),
    #[error("The AMQP channel is closed.")]
    ChannelClosed,
    #[error("The broker does not know delivery tag {0}.")]
    UnknownDeliveryTag(DeliveryTag),
}

#[async_trait::async_trait]
/// Settles deliveries with the broker.
///
/// The consumer is the only caller: each delivery tag is passed to exactly one of
/// [`Acknowledger::ack`] or [`Acknowledger::nack`], exactly once.
/// Implementations are expected to fail on tags they have never delivered or that were already
/// settled, as a broker does.
///
/// [`lapin::Channel`] implements `Acknowledger`; tests can provide their own broker double.
pub trait Acknowledger: Send + Sync + 'static {
    /// Positive acknowledgement: the broker removes the message from the queue.
    async fn ack(
        &self,
        delivery_tag: DeliveryTag,
        options: BasicAckOptions,
    ) -> Result<(), BrokerError>;

    /// Negative acknowledgement: the broker requeues the message if `options.requeue` is set,
    /// otherwise it discards it (or dead-letters it, if the queue is configured to do so).
    async fn nack(
        &self,
        delivery_tag: DeliveryTag,
        options: BasicNackOptions,
    ) -> Result<(), BrokerError>;
}

fn ensure_connected(channel: &Channel) -> Result<(), BrokerError> {
    match channel.status().state() {
        ChannelState::Connected => Ok(()),
        _ => Err(BrokerError::ChannelClosed),
    }
}

#[async_trait::async_trait]
impl Acknowledger for Channel {
    async fn ack(
        &self,
        delivery_tag: DeliveryTag,
        options: BasicAckOptions,
    ) -> Result<(), BrokerError> {
        ensure_connected(self)?;
        self.basic_ack(delivery_tag, options).await?;
        Ok(())
    }

    async fn nack(
        &self,
        delivery_tag: DeliveryTag,
        options: BasicNackOptions,
    ) -> Result<(), BrokerError> {
        ensure_connected(self)?;
        self.basic_nack(delivery_tag, options).await?;
        Ok(())
    }
}
