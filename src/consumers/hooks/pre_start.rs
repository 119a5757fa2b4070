//! A collection of pre-start hooks to declare the topology a consumer relies on.
//!
//! ## Examples of queue/exchange setups
//!
//! ```
//! use carrot_listener::consumers::hooks::pre_start::{
//!     Bind,
//!     DeclareDurableExchange,
//!     DeclareDurableQueue,
//!     ExistingExchange,
//!     WithDeadLetterQueue,
//!     ExchangeKind,
//! };
//! use carrot_listener::consumers::BindingKey;
//!
//! // we want to bind a queue to a topic exchange
//! let pre_start_hook = Bind {
//!     // we will create a new durable exchange
//!     exchange: DeclareDurableExchange {
//!         // called `log.exchange`
//!         name: "log.exchange".to_owned(),
//!         kind: ExchangeKind::Topic,
//!     },
//!     // we will also create a durable queue, and a dead letter exchange/queue to keep
//!     // the messages that failed processing
//!     queue: WithDeadLetterQueue(DeclareDurableQueue),
//!     // we want all the info logs, whatever service emitted them
//!     binding: BindingKey::new("*.info").unwrap(),
//! };
//! # drop(pre_start_hook);
//!
//! // we want to bind a durable queue to an existing exchange with a couple of binding keys
//! let pre_start_hook = Bind {
//!     exchange: ExistingExchange {
//!         name: "log.exchange".to_owned(),
//!     },
//!     queue: DeclareDurableQueue,
//!     binding: vec![
//!         BindingKey::new("payments.#").unwrap(),
//!         BindingKey::new("*.error").unwrap(),
//!     ],
//! };
//! # drop(pre_start_hook);
//! ```

use crate::configuration::QueueSettings;
use crate::consumers::{BindingKey, ConsumerPreStartHook};
use amq_protocol_types::{AMQPValue, FieldTable};
use async_trait::async_trait;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::Channel;
pub use lapin::ExchangeKind;

#[async_trait::async_trait]
/// Defines how to setup an exchange
pub trait ExchangeSetup: Send + Sync + 'static {
    /// The name of the exchange that will be set up.
    fn exchange_name(&self) -> &str;

    /// Ensures the exchange is set up.
    async fn setup_exchange(&self, channel: &Channel) -> Result<(), anyhow::Error>;
}

/// Declares a new durable exchange
pub struct DeclareDurableExchange {
    pub name: String,
    pub kind: ExchangeKind,
}

/// Uses a pre-existing exchange
pub struct ExistingExchange {
    pub name: String,
}

#[async_trait]
impl ExchangeSetup for DeclareDurableExchange {
    fn exchange_name(&self) -> &str {
        &self.name
    }

    async fn setup_exchange(&self, channel: &Channel) -> Result<(), anyhow::Error> {
        channel
            .exchange_declare(
                &self.name,
                self.kind.clone(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ExchangeSetup for ExistingExchange {
    fn exchange_name(&self) -> &str {
        &self.name
    }

    async fn setup_exchange(&self, _channel: &Channel) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Wraps another pre-start hook with a [dead letter exchange](https://www.rabbitmq.com/dlx.html).
///
/// Specifically, it creates the queue `<queue_name>.deadletter` bound to the fanout exchange
/// `<queue_name>.deadletter` and marks the latter as the dead letter exchange of the queue:
/// messages nacked without requeue end up there instead of being discarded.
///
/// Queue arguments are immutable: switching an existing queue to
/// `WithDeadLetterQueue<PreStartHook>` requires rolling a new queue.
pub struct WithDeadLetterQueue<H: ConsumerPreStartHook>(pub H);

#[async_trait::async_trait]
impl<E: ConsumerPreStartHook> ConsumerPreStartHook for WithDeadLetterQueue<E> {
    async fn run(
        &self,
        channel: &Channel,
        queue_name: &str,
        mut queue_args: FieldTable,
    ) -> Result<(), anyhow::Error> {
        let dead_letter = dead_letter_name(queue_name);

        let dlx = Bind {
            exchange: DeclareDurableExchange {
                name: dead_letter.clone(),
                kind: ExchangeKind::Fanout,
            },
            queue: DeclareDurableQueue,
            // fanout exchanges ignore the routing key
            binding: Vec::<BindingKey>::new(),
        };
        dlx.run(channel, &dead_letter, FieldTable::default())
            .await?;
        channel
            .queue_bind(
                &dead_letter,
                &dead_letter,
                "",
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await?;

        queue_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dead_letter.into()),
        );
        self.0.run(channel, queue_name, queue_args).await
    }
}

/// The name of the dead letter exchange and queue paired with `queue_name`.
pub fn dead_letter_name(queue_name: &str) -> String {
    format!("{queue_name}.deadletter")
}

/// Bind the exchange defined by [`ExchangeSetup`] to the queue that will be defined in the nested `Queue` [`ConsumerPreStartHook`]
/// using the [`Binding`] method specified.
pub struct Bind<Exchange: ExchangeSetup, Queue: ConsumerPreStartHook, Binds: Binding> {
    pub exchange: Exchange,
    pub queue: Queue,
    pub binding: Binds,
}

#[async_trait::async_trait]
impl<E: ExchangeSetup, Q: ConsumerPreStartHook, B: Binding> ConsumerPreStartHook for Bind<E, Q, B> {
    async fn run(
        &self,
        channel: &Channel,
        queue_name: &str,
        queue_args: FieldTable,
    ) -> Result<(), anyhow::Error> {
        self.exchange.setup_exchange(channel).await?;
        self.queue.run(channel, queue_name, queue_args).await?;
        self.binding
            .bind(channel, self.exchange.exchange_name(), queue_name)
            .await?;

        Ok(())
    }
}

/// Declare a durable, non-exclusive queue that is never auto-deleted.
#[derive(Clone)]
pub struct DeclareDurableQueue;

#[async_trait::async_trait]
impl ConsumerPreStartHook for DeclareDurableQueue {
    async fn run(
        &self,
        channel: &Channel,
        queue_name: &str,
        queue_args: FieldTable,
    ) -> Result<(), anyhow::Error> {
        DeclareQueue::from(&QueueSettings::durable(queue_name))
            .run(channel, queue_name, queue_args)
            .await
    }
}

/// Declare a queue with explicit flags and arguments.
#[derive(Clone)]
pub struct DeclareQueue {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    /// Merged with the arguments passed in by the wrapping hooks; on conflict, these win.
    pub arguments: FieldTable,
}

impl From<&QueueSettings> for DeclareQueue {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            durable: settings.durable,
            exclusive: settings.exclusive,
            auto_delete: settings.auto_delete,
            arguments: settings.field_table(),
        }
    }
}

#[async_trait::async_trait]
impl ConsumerPreStartHook for DeclareQueue {
    #[tracing::instrument(skip(self, channel, queue_args), name = "declare_queue")]
    async fn run(
        &self,
        channel: &Channel,
        queue_name: &str,
        mut queue_args: FieldTable,
    ) -> Result<(), anyhow::Error> {
        for (key, value) in self.arguments.inner() {
            queue_args.insert(key.clone(), value.clone());
        }
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    passive: false,
                    durable: self.durable,
                    exclusive: self.exclusive,
                    auto_delete: self.auto_delete,
                    nowait: false,
                },
                queue_args,
            )
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
/// Defines how to bind an exchange to a queue
///
/// Implementations:
/// * [`BindingKey`] - binds the queue to a topic exchange with a binding key.
/// * [`Vec<_>`] - binds the queue using many bindings, eg `Vec<BindingKey>` binds with many keys.
pub trait Binding: Send + Sync + 'static {
    async fn bind(
        &self,
        channel: &Channel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl Binding for BindingKey {
    async fn bind(
        &self,
        channel: &Channel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        channel
            .queue_bind(
                queue_name,
                exchange_name,
                self.as_str(),
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await?;
        tracing::info!(queue_name, exchange_name, binding_key = self.as_str(), "Queue bound.");

        Ok(())
    }
}

#[async_trait::async_trait]
impl<B: Binding> Binding for Vec<B> {
    async fn bind(
        &self,
        channel: &Channel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        for b in self {
            b.bind(channel, exchange_name, queue_name).await?;
        }

        Ok(())
    }
}
