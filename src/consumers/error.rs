use crate::consumers::{BrokerError, LedgerError};
use amq_protocol_types::DeliveryTag;

/// Why the processing of a single message failed.
///
/// Processing errors never leave the consumer: the message is nacked and the consumer moves on.
#[derive(thiserror::Error, Debug)]
pub enum ProcessingError<E> {
    #[error("The message payload is not valid UTF-8.")]
    InvalidPayload(#[source] std::str::Utf8Error),
    #[error("The message handler failed: {0}")]
    Handler(E),
    #[error("The message handler panicked.")]
    Panicked,
}

/// Fatal consumer failures.
///
/// The consumer stops when it hits one of these: the hosting process is expected to reconnect
/// and re-subscribe.
#[derive(thiserror::Error, Debug)]
pub enum ConsumerError {
    /// The broker rejected (or we failed to send) the ack/nack for a delivery.
    #[error("Failed to settle delivery {delivery_tag} with the broker.")]
    Settlement {
        delivery_tag: DeliveryTag,
        #[source]
        source: BrokerError,
    },
    /// The stream of deliveries returned an error.
    #[error("Failed to receive deliveries from the broker.")]
    Broker(#[from] BrokerError),
    /// Deliveries stopped coming without a shutdown request, e.g. the broker cancelled the
    /// consumer because its queue was deleted.
    #[error("The delivery stream for queue `{queue_name}` closed unexpectedly.")]
    DeliveryStreamClosed { queue_name: String },
    #[error("The delivery lifecycle was violated.")]
    Ledger(#[from] LedgerError),
    #[error("A message processing task failed to complete.")]
    Task(#[from] tokio::task::JoinError),
}
