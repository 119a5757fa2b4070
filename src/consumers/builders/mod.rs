pub use consumer_group::{ConsumerGroup, ConsumerGroupBuilder};
pub use consumer_group_configuration::ConsumerGroupConfigurationBuilder;
pub(crate) use consumer_group_configuration::DEFAULT_PREFETCH_COUNT;
pub use message_handler::{MessageHandler, MessageHandlerBuilder};

mod consumer_group;
mod consumer_group_configuration;
mod message_handler;
