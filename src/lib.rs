//! `carrot-listener` consumes messages from durable RabbitMQ queues bound to topic exchanges,
//! built on top of [`lapin`].
//!
//! Each message is decoded as UTF-8 and handed to a [`Handler`](crate::consumers::Handler):
//! it is acknowledged if the handler succeeds and negatively acknowledged, without requeueing,
//! if decoding or the handler fail. A failure to acknowledge stops the consumer.
//!
//! [`ConsumerGroup`](crate::consumers::ConsumerGroup) is the best starting point to wire
//! handlers against a broker, [`configuration::Settings`] to describe subscriptions in a
//! configuration file.
//!
//! ## Examples
//!
//! Check the `demos` directory to see the library in action.

pub mod amqp;
pub mod configuration;
pub mod consumers;
