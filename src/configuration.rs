//! Application settings: how to reach the broker, consumer defaults and the subscriptions to
//! serve.
//!
//! Settings are read from a file (TOML, YAML or JSON, picked by extension) and environment
//! variables prefixed with `CARROT_LISTENER`, using `__` to separate nested keys.
//! E.g. `CARROT_LISTENER__RABBITMQ__HOST=rabbit` sets `Settings.rabbitmq.host`.
use crate::amqp::configuration::RabbitMqSettings;
use crate::consumers::hooks::pre_start::{
    Bind, DeclareDurableExchange, DeclareQueue, ExchangeKind, WithDeadLetterQueue,
};
use crate::consumers::{
    AckMode, BindingKey, ConsumerGroupConfigurationBuilder, ConsumerPreStartHook,
    MessageHandler, MessageHandlerBuilder, DEFAULT_PREFETCH_COUNT,
};
use amq_protocol_types::{AMQPValue, FieldTable};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub rabbitmq: RabbitMqSettings,
    #[serde(default)]
    pub consumer: ConsumerSettings,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSettings>,
}

/// Group-level defaults for every subscription.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsumerSettings {
    /// The maximum number of unacknowledged deliveries per consumer.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub prefetch_count: u16,
    pub ack_mode: AckMode,
    pub requeue_on_failure: bool,
    pub queue_name_prefix: Option<String>,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            ack_mode: AckMode::default(),
            requeue_on_failure: false,
            queue_name_prefix: None,
        }
    }
}

impl ConsumerSettings {
    /// Apply these defaults to a consumer group.
    pub fn apply<Context, Error>(
        &self,
        builder: ConsumerGroupConfigurationBuilder<Context, Error>,
    ) -> ConsumerGroupConfigurationBuilder<Context, Error>
    where
        Context: Send + Sync + 'static,
        Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
    {
        let builder = builder
            .with_prefetch_count(self.prefetch_count)
            .ack_mode(self.ack_mode)
            .requeue_on_failure(self.requeue_on_failure);
        match &self.queue_name_prefix {
            Some(prefix) => builder.queue_name_prefix(prefix),
            None => builder,
        }
    }
}

/// A durable queue bound to a topic exchange.
#[derive(Debug, Deserialize, Clone)]
pub struct SubscriptionSettings {
    /// The topic exchange to bind to. It is declared, durable, if missing.
    pub exchange: String,
    pub binding_key: BindingKey,
    pub queue: QueueSettings,
}

impl SubscriptionSettings {
    /// Declares the exchange and the queue, then binds them.
    pub fn pre_start_hook(&self) -> Arc<dyn ConsumerPreStartHook> {
        let exchange = DeclareDurableExchange {
            name: self.exchange.clone(),
            kind: ExchangeKind::Topic,
        };
        let queue = DeclareQueue::from(&self.queue);
        let binding = self.binding_key.clone();
        if self.queue.dead_letter {
            Arc::new(Bind {
                exchange,
                queue: WithDeadLetterQueue(queue),
                binding,
            })
        } else {
            Arc::new(Bind {
                exchange,
                queue,
                binding,
            })
        }
    }

    /// Start building the [`MessageHandler`] serving this subscription: the queue name, the
    /// topology and the binding key are already set.
    pub fn message_handler<Context, Error>(&self) -> MessageHandlerBuilder<Context, Error>
    where
        Context: Send + Sync + 'static,
        Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
    {
        MessageHandler::builder(self.queue.name.clone())
            .with_pre_start_hooks([self.pre_start_hook()])
            .with_binding_key(self.binding_key.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueSettings {
    pub name: String,
    /// Survive a broker restart.
    #[serde(default = "default_durable")]
    pub durable: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub auto_delete: bool,
    /// Route nacked messages to `<name>.deadletter` instead of dropping them.
    #[serde(default)]
    pub dead_letter: bool,
    /// Extra `x-` arguments, e.g. `x-max-length`.
    #[serde(default)]
    pub arguments: BTreeMap<String, QueueArgument>,
}

fn default_durable() -> bool {
    true
}

impl QueueSettings {
    /// A durable, non-exclusive queue without arguments.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            dead_letter: false,
            arguments: BTreeMap::new(),
        }
    }

    /// The queue arguments in their wire format.
    pub fn field_table(&self) -> FieldTable {
        let mut table = FieldTable::default();
        for (key, value) in &self.arguments {
            table.insert(key.as_str().into(), value.clone().into());
        }
        table
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum QueueArgument {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl From<QueueArgument> for AMQPValue {
    fn from(value: QueueArgument) -> Self {
        match value {
            QueueArgument::Bool(b) => AMQPValue::Boolean(b),
            QueueArgument::Integer(i) => AMQPValue::LongLongInt(i),
            QueueArgument::Text(s) => AMQPValue::LongString(s.into()),
        }
    }
}

/// Load [`Settings`] from `path`, if it exists, overridden by `CARROT_LISTENER__*` environment
/// variables.
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    Config::builder()
        .add_source(File::from(path.as_ref()).required(false))
        .add_source(
            Environment::with_prefix("CARROT_LISTENER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
