use futures_util::{stream::FuturesUnordered, StreamExt};
use lapin::Connection;
use shutdown_handler::ShutdownHandler;

use crate::{
    amqp::ConnectionFactory,
    consumers::{
        builders::{
            consumer_group_configuration::ConsumerGroupConfiguration,
            message_handler::MessageHandler,
        },
        consumer::Consumer,
        ConsumerGroupConfigurationBuilder,
    },
};
use std::fmt;
use std::sync::Arc;

/// A collection of RabbitMq consumers sharing the same context and connection.
///
/// `ConsumerGroup` is the main entrypoint if you want to pull and process messages from queues.
/// All the consumers in a group share a single connection and a single channel to the host.
///
/// # How do I build a `ConsumerGroup`?
///
/// `ConsumerGroup` provides a fluent API to add configuration step-by-step, known as
/// "builder pattern" in Rust.
/// The starting point is [`ConsumerGroup::builder`].
///
/// Once you are done with group-level configuration, you can start adding message handlers using
/// [`ConsumerGroupConfigurationBuilder::message_handler`].
///
/// # Layered configuration
///
/// `ConsumerGroup` supports a layered approach to configuring message handlers.
///
/// Certain types of configuration values can only be added at the group level (e.g. connection
/// factory, context, queue name prefix) while others can be set both at the group and message
/// handler level (e.g. pre-start hooks, prefetch count, ack mode).
pub struct ConsumerGroup<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    // Closing the connection would close the channel the consumers rely on.
    _connection: Connection,
    consumers: Vec<Consumer<Context, Error>>,
}

impl<Context, Error> ConsumerGroup<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    /// Start building a [`ConsumerGroup`].
    ///
    /// You will need a connection factory and a context.
    ///
    /// # Context
    ///
    /// In message handlers you will often need to use resources with a significant initialisation
    /// cost - e.g. a HTTP client, a database connection, etc.
    /// Instead of creating a new instance of these expensive resources every single time you handle
    /// a message, you can put those resources in the _context_.
    ///
    /// The context is created once, before the consumer group is built, and each message handler
    /// gets a shared reference (&) to the context together with the incoming message.
    ///
    /// ## Implementation Notes
    ///
    /// The context is wrapped in an `Arc` by `ConsumerGroup` - if your context is already behind
    /// an `Arc` pointer, it won't be "double-wrapped".
    pub fn builder(
        connection_factory: ConnectionFactory,
        context: impl Into<Arc<Context>>,
    ) -> ConsumerGroupConfigurationBuilder<Context, Error> {
        ConsumerGroupConfigurationBuilder::new(connection_factory, context.into())
    }

    /// The number of consumers in the group.
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// You can call `run_until_sigterm` to start consuming messages from the queues you bound.
    /// As the name implies, `run_until_sigterm` returns control to the caller only if:
    /// - one the message handlers crashes (e.g. disconnection);
    /// - the application is stopped via SIGTERM.
    pub async fn run_until_sigterm(self) -> Result<(), anyhow::Error> {
        self.run_until_shutdown(ShutdownHandler::sigterm()?).await
    }

    /// You can call `run_until_shutdown` to start consuming messages from the queues you bound.
    /// As the name implies, `run_until_shutdown` returns control to the caller only if:
    /// - one the message handlers crashes (e.g. disconnection, failed acknowledgement);
    /// - the application is stopped via the shutdown handler.
    ///
    /// When one consumer stops, the others are asked to shut down gracefully.
    /// The first error, if any, is returned.
    #[tracing::instrument(skip_all, name = "consumer_group_run")]
    pub async fn run_until_shutdown(
        self,
        shutdown: Arc<ShutdownHandler>,
    ) -> Result<(), anyhow::Error> {
        let Self {
            _connection,
            consumers,
        } = self;

        let mut consumers = FuturesUnordered::from_iter(
            consumers
                .into_iter()
                .map(|c| {
                    let shutdown = shutdown.clone();
                    async move { c.run_until_shutdown(shutdown.wait_for_signal()).await }
                })
                .map(tokio::spawn),
        );

        let mut result = Ok(());
        // wait for all consumers to shutdown
        while let Some(res) = consumers.next().await {
            let res = res
                .map_err(anyhow::Error::from)
                .and_then(|r| r.map_err(anyhow::Error::from));
            if let Err(e) = res {
                tracing::error!("Consumer failed: {:?}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
            shutdown.shutdown();
        }
        result
    }
}

/// A builder to register message handlers once the group-level configuration of a [`ConsumerGroup`](super::ConsumerGroup)
/// has been finalised.
///
/// Use [`ConsumerGroup::builder`](super::ConsumerGroup::builder) as entrypoint.
pub struct ConsumerGroupBuilder<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    pub(super) group_configuration: ConsumerGroupConfiguration<Context, Error>,
    pub(super) message_handlers: Vec<MessageHandler<Context, Error>>,
}

impl<Context, Error> ConsumerGroupBuilder<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    /// Add another [`MessageHandler`] to the [`ConsumerGroup`].
    ///
    /// Check out [`MessageHandler::builder`] to build out a handler.
    #[must_use]
    pub fn message_handler(mut self, message_handler: MessageHandler<Context, Error>) -> Self {
        self.message_handlers.push(message_handler);
        self
    }

    /// Merge the message handler-level and the group-level configuration to build the underlying
    /// [`Consumer`](super::super::consumer::Consumer) instance.
    async fn build_consumer(
        group_configuration: &ConsumerGroupConfiguration<Context, Error>,
        channel: &lapin::Channel,
        mut message_handler: MessageHandler<Context, Error>,
    ) -> Result<Consumer<Context, Error>, anyhow::Error> {
        message_handler.queue_name = prefixed_queue_name(
            group_configuration.queue_name_prefix.as_deref(),
            &message_handler.queue_name,
        );

        // Use the message handler pre-start hooks, if provided.
        // Rely on the group-level ones otherwise.
        if message_handler.pre_start_hooks.is_empty() {
            message_handler.pre_start_hooks = group_configuration.pre_start_hooks.clone();
        }

        message_handler.ack_mode = message_handler
            .ack_mode
            .or(Some(group_configuration.ack_mode));
        message_handler.requeue_on_failure = message_handler
            .requeue_on_failure
            .or(Some(group_configuration.requeue_on_failure));

        let prefetch_count = message_handler
            .prefetch_count_override
            .unwrap_or(group_configuration.prefetch_count);

        Consumer::new(
            channel.clone(),
            message_handler,
            prefetch_count,
            group_configuration.context.clone(),
            group_configuration.exit_after,
        )
        .await
    }

    /// Once you have added all your [`MessageHandler`]s to the [`ConsumerGroup`], you can
    /// finalise the group by calling `build`.
    ///
    /// When you `.await` `build`, a connection is established with the message broker, all
    /// pre-start hooks are executed and the consumers are registered, one handler at a time.
    ///
    /// `build` does NOT trigger processing of messages!
    /// Check out [`ConsumerGroup::run_until_sigterm`].
    pub async fn build(self) -> Result<ConsumerGroup<Context, Error>, anyhow::Error> {
        let Self {
            group_configuration,
            message_handlers,
        } = self;

        let connection = group_configuration
            .connection_factory
            .new_connection()
            .await?;
        let channel = connection.create_channel().await?;

        let mut consumers = Vec::with_capacity(message_handlers.len());
        for message_handler in message_handlers {
            consumers.push(
                Self::build_consumer(&group_configuration, &channel, message_handler).await?,
            );
        }

        Ok(ConsumerGroup {
            _connection: connection,
            consumers,
        })
    }
}

/// `<prefix>_<queue_name>`, or `queue_name` as is without a prefix.
fn prefixed_queue_name(prefix: Option<&str>, queue_name: &str) -> String {
    match prefix {
        Some(prefix) => format!("{0}_{1}", prefix, queue_name),
        None => queue_name.to_owned(),
    }
}
