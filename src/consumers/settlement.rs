use crate::consumers::acknowledger::{Acknowledger, BrokerError};
use amq_protocol_types::DeliveryTag;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use serde::Deserialize;

/// Who settles deliveries with the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// The consumer acks successfully processed messages and nacks failed ones.
    #[default]
    Manual,
    /// The broker considers a message settled as soon as it has been sent (`no_ack`).
    /// Processing failures are logged and the message is lost. The delivery ledger records
    /// every delivery as acknowledged, since that is what the broker did.
    Automatic,
}

impl AckMode {
    /// The `no_ack` flag of the consume registration.
    pub fn no_ack(&self) -> bool {
        matches!(self, Self::Automatic)
    }
}

/// The action we asked the broker to take when finalising the processing of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerAction {
    /// Positive acknowledgement - the message is removed from the queue.
    Ack,
    /// Negative acknowledgement - processing failed.
    /// The message goes back to the queue if `requeue` is set, otherwise it is discarded
    /// or routed to the dead letter exchange, if one is configured.
    Nack { requeue: bool },
}

impl BrokerAction {
    /// The action taken when processing fails and requeueing is disabled.
    pub const DISCARD: BrokerAction = BrokerAction::Nack { requeue: false };

    /// Settle `delivery_tag` with the broker. Only this one delivery is settled (`multiple=false`).
    pub(crate) async fn execute(
        self,
        acknowledger: &dyn Acknowledger,
        delivery_tag: DeliveryTag,
    ) -> Result<(), BrokerError> {
        match self {
            Self::Ack => {
                acknowledger
                    .ack(delivery_tag, BasicAckOptions { multiple: false })
                    .await
            }
            Self::Nack { requeue } => {
                acknowledger
                    .nack(
                        delivery_tag,
                        BasicNackOptions {
                            multiple: false,
                            requeue,
                        },
                    )
                    .await
            }
        }
    }
}
