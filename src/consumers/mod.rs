//! Facilities to consume messages from RabbitMq queues bound to a topic exchange.
//! Check out [`ConsumerGroup`] as a starting point, or [`DeliveryWorker`] to process deliveries
//! coming from somewhere else than a lapin channel.
pub use acknowledger::{Acknowledger, BrokerError};
pub(crate) use builders::DEFAULT_PREFETCH_COUNT;
pub use builders::{
    ConsumerGroup, ConsumerGroupBuilder, ConsumerGroupConfigurationBuilder, MessageHandler,
    MessageHandlerBuilder,
};
pub use error::{ConsumerError, ProcessingError};
pub use handler::Handler;
pub use incoming_message::{Delivery, Incoming};
pub use ledger::{DeliveryLedger, DeliveryState, LedgerError};
pub use pre_start_hook::ConsumerPreStartHook;
pub use settlement::{AckMode, BrokerAction};
pub use topic::{BindingKey, TopicError};
pub use worker::{delivery_channel, DeliveryReceiver, DeliverySender, DeliveryWorker};

mod acknowledger;
mod builders;
mod consumer;
mod error;
mod handler;
pub mod hooks;
mod incoming_message;
mod ledger;
mod pre_start_hook;
mod settlement;
mod topic;
mod worker;
