use crate::amqp::ConnectionFactory;
use crate::consumers::builders::consumer_group::ConsumerGroupBuilder;
use crate::consumers::builders::message_handler::MessageHandler;
use crate::consumers::{AckMode, ConsumerPreStartHook};
use std::fmt;
use std::sync::Arc;

pub(crate) const DEFAULT_PREFETCH_COUNT: u16 = 50;

/// Group-level configuration values for a [`ConsumerGroup`](super::ConsumerGroup).
///
/// Use [`ConsumerGroupConfigurationBuilder`] to build an instance of `ConsumerGroupConfiguration`.
pub(super) struct ConsumerGroupConfiguration<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    pub(super) connection_factory: ConnectionFactory,
    pub(super) queue_name_prefix: Option<String>,
    pub(super) prefetch_count: u16,
    pub(super) context: Arc<Context>,
    pub(super) pre_start_hooks: Vec<Arc<dyn ConsumerPreStartHook>>,
    pub(super) exit_after: Option<usize>,
    pub(super) ack_mode: AckMode,
    pub(super) requeue_on_failure: bool,
    _error: std::marker::PhantomData<fn() -> Error>,
}

/// A builder for group-level configuration of a [`ConsumerGroup`](super::ConsumerGroup).
///
/// Use [`ConsumerGroup::builder`](super::ConsumerGroup::builder) as entrypoint.
pub struct ConsumerGroupConfigurationBuilder<Context, Error>(
    ConsumerGroupConfiguration<Context, Error>,
)
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static;

impl<Context, Error> ConsumerGroupConfigurationBuilder<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    pub(super) fn new(connection_factory: ConnectionFactory, context: Arc<Context>) -> Self {
        Self(ConsumerGroupConfiguration {
            connection_factory,
            queue_name_prefix: None,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            context,
            pre_start_hooks: Vec::new(),
            // By default, the consumer group will continue to consume message indefinitely.
            exit_after: None,
            ack_mode: AckMode::default(),
            // Failed messages are discarded (or dead-lettered), never redelivered in a loop.
            requeue_on_failure: false,
            _error: std::marker::PhantomData,
        })
    }

    /// Add a prefix to the name of queues used by message handlers in the group.
    ///
    /// E.g. `test` as prefix will give you `test_X` queue names.
    #[must_use]
    pub fn queue_name_prefix<T: Into<String>>(mut self, prefix: T) -> Self {
        self.0.queue_name_prefix = Some(prefix.into());
        self
    }

    /// Configure the prefetch count of consumers in the group.
    /// If not configured, the prefetch count is set to a default value of 50.
    #[must_use]
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.0.prefetch_count = prefetch_count;
        self
    }

    /// How deliveries are acknowledged by the consumers in the group.
    /// Defaults to [`AckMode::Manual`].
    #[must_use]
    pub fn ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.0.ack_mode = ack_mode;
        self
    }

    /// Whether messages that failed processing are put back in their queue.
    /// Defaults to `false`.
    #[must_use]
    pub fn requeue_on_failure(mut self, requeue: bool) -> Self {
        self.0.requeue_on_failure = requeue;
        self
    }

    /// By default, a [`ConsumerGroup`] keeps running indefinitely, consuming messages as soon as
    /// they are available in the queues bound by its [`MessageHandler`]s.
    ///
    /// With `exit_after` you can configure the [`MessageHandler`]s in a [`ConsumerGroup`] to
    /// stop consuming messages as soon as they have processed `max_n_messages`.
    ///
    /// This is mostly useful for testing purposes: it allows you to know, when the group has
    /// exited, that a certain number of messages have been processed and you can start performing
    /// your assertions around the side-effects produced by said processing.
    ///
    /// [`ConsumerGroup`]: super::ConsumerGroup
    #[must_use]
    pub fn exit_after(mut self, max_n_messages: usize) -> Self {
        self.0.exit_after = Some(max_n_messages);
        self
    }

    /// Pre-start hooks are executed _before_ consumers start pulling messages from queues.
    /// Pre-start hooks are used to execute setup logic for resources against the message broker -
    /// e.g. create exchanges, bind queues, etc.
    ///
    /// Check out [`ConsumerPreStartHook`](crate::consumers::ConsumerPreStartHook)'s documentation
    /// for more details.
    ///
    /// By default, no pre-start logic is executed unless one or more pre-start hooks are explicitly specified.
    #[must_use]
    pub fn with_pre_start_hook<H: ConsumerPreStartHook>(mut self, hook: H) -> Self {
        self.0.pre_start_hooks.push(Arc::new(hook));
        self
    }

    /// Append multiple pre-start hooks, see
    /// [`ConsumerGroupConfigurationBuilder::with_pre_start_hook`].
    #[must_use]
    pub fn with_pre_start_hooks<I>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ConsumerPreStartHook>>,
    {
        self.0.pre_start_hooks.extend(hooks);
        self
    }

    /// Once you have specified all the group-level configuration you need,
    /// you can start adding [`MessageHandler`]s!
    ///
    /// Check out [`MessageHandler::builder`] to build out a handler.
    ///
    /// # Implementation Notes
    ///
    /// After you start adding message handlers you are prevented from introducing new group-level
    /// configuration.
    /// This is enforced by returning a different builder type, [`ConsumerGroupBuilder`], which
    /// only exposes methods to add other handlers and build the whole group.
    pub fn message_handler(
        self,
        message_handler: MessageHandler<Context, Error>,
    ) -> ConsumerGroupBuilder<Context, Error> {
        let group_configuration = self.0;
        ConsumerGroupBuilder {
            group_configuration,
            message_handlers: vec![message_handler],
        }
    }
}
