use crate::consumers::{AckMode, BindingKey, ConsumerPreStartHook, Handler};
use std::fmt;
use std::sync::Arc;

/// A handler processing messages from a RabbitMq queue.
///
/// Use [`MessageHandler::builder`] to start composing a `MessageHandler` using a fluent builder
/// API.
///
/// # `MessageHandler` vs `ConsumerGroup`
///
/// A `MessageHandler` is usually part of a [`ConsumerGroup`] - it relies on its context and
/// connection and inherits its group-level configuration, which it can override
/// (e.g. [`MessageHandlerBuilder::ack_mode`] or [`MessageHandlerBuilder::with_prefetch_count`]).
///
/// It can also be driven without a broker connection by a [`DeliveryWorker`].
///
/// [`ConsumerGroup`]: super::ConsumerGroup
/// [`DeliveryWorker`]: crate::consumers::DeliveryWorker
pub struct MessageHandler<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    pub(crate) queue_name: String,
    pub(crate) prefetch_count_override: Option<u16>,
    pub(crate) pre_start_hooks: Vec<Arc<dyn ConsumerPreStartHook>>,
    pub(crate) binding_keys: Vec<BindingKey>,
    pub(crate) priority: Option<i32>,
    pub(crate) ack_mode: Option<AckMode>,
    pub(crate) requeue_on_failure: Option<bool>,
    pub(crate) handler: Arc<dyn Handler<Context = Context, Error = Error>>,
}

impl<Context, Error> MessageHandler<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    /// Start building a [`MessageHandler`].
    ///
    /// You need to provide the name of the queue you want to consume messages from.
    pub fn builder<T: Into<String>>(queue_name: T) -> MessageHandlerBuilder<Context, Error> {
        MessageHandlerBuilder::new(queue_name.into())
    }

    /// The name of the queue this handler consumes from.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

/// A builder to compose a [`MessageHandler`] with a fluent API.
///
/// Use [`MessageHandler::builder`] as entrypoint.
pub struct MessageHandlerBuilder<Context, Error> {
    queue_name: String,
    prefetch_count_override: Option<u16>,
    pre_start_hooks: Vec<Arc<dyn ConsumerPreStartHook>>,
    binding_keys: Vec<BindingKey>,
    priority: Option<i32>,
    ack_mode: Option<AckMode>,
    requeue_on_failure: Option<bool>,
    _handler: std::marker::PhantomData<fn() -> (Context, Error)>,
}

impl<Context, Error> MessageHandlerBuilder<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    pub(super) fn new(queue_name: String) -> Self {
        Self {
            queue_name,
            prefetch_count_override: None,
            pre_start_hooks: vec![],
            binding_keys: vec![],
            priority: None,
            ack_mode: None,
            requeue_on_failure: None,
            _handler: std::marker::PhantomData,
        }
    }

    /// Configure the prefetch count of the handler.
    /// If not configured, the handler inherits the prefetch count
    /// configured at the consumer group level.
    #[must_use]
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count_override = Some(prefetch_count);
        self
    }

    /// Pre-start hooks are executed _before_ the consumer starts pulling messages from the queue.
    /// They declare the resources the consumer relies on - queues, exchanges, bindings.
    ///
    /// If no pre-start hook is specified at the [`MessageHandler`] level, the hooks
    /// specified at the [`ConsumerGroup`] level are executed.
    ///
    /// [`ConsumerGroup`]: super::ConsumerGroup
    #[must_use]
    pub fn with_pre_start_hook<H: ConsumerPreStartHook>(mut self, hook: H) -> Self {
        self.pre_start_hooks.push(Arc::new(hook));
        self
    }

    /// Append multiple pre-start hooks, see [`MessageHandlerBuilder::with_pre_start_hook`].
    #[must_use]
    pub fn with_pre_start_hooks<I>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ConsumerPreStartHook>>,
    {
        self.pre_start_hooks.extend(hooks);
        self
    }

    /// Record a binding key the queue is expected to be bound with.
    ///
    /// It does not declare anything against the broker (use a pre-start hook for that): deliveries
    /// whose routing key matches none of the recorded keys are still processed, but a warning
    /// is logged. Nothing is checked if no binding key is recorded.
    #[must_use]
    pub fn with_binding_key(mut self, binding_key: BindingKey) -> Self {
        self.binding_keys.push(binding_key);
        self
    }

    /// Sets the `x-priority` consume argument.
    /// See <https://www.rabbitmq.com/consumer-priority.html#how-to-use>.
    ///
    /// Default not specified, equivalent to `0`.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Override the group-level [`AckMode`].
    #[must_use]
    pub fn ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = Some(ack_mode);
        self
    }

    /// Whether messages that failed processing should be put back in the queue.
    ///
    /// Defaults to the group-level setting, which defaults to `false`: failed messages are
    /// discarded (or dead-lettered) to avoid infinite redelivery loops.
    #[must_use]
    pub fn requeue_on_failure(mut self, requeue: bool) -> Self {
        self.requeue_on_failure = Some(requeue);
        self
    }

    /// The handler used to process incoming messages.
    ///
    /// Passing in the handler finalises the `MessageHandler` construction.
    ///
    /// Check out [`Handler`]'s documentation for more details.
    pub fn handler<H>(self, handler: H) -> MessageHandler<Context, Error>
    where
        H: Handler<Context = Context, Error = Error>,
    {
        self.arc_handler(Arc::new(handler))
    }

    /// A version of [`MessageHandlerBuilder::handler`] for already Arc-ed handlers.
    pub fn arc_handler(
        self,
        handler: Arc<dyn Handler<Context = Context, Error = Error>>,
    ) -> MessageHandler<Context, Error> {
        let Self {
            queue_name,
            prefetch_count_override,
            pre_start_hooks,
            binding_keys,
            priority,
            ack_mode,
            requeue_on_failure,
            _handler,
        } = self;
        MessageHandler {
            queue_name,
            prefetch_count_override,
            pre_start_hooks,
            binding_keys,
            priority,
            ack_mode,
            requeue_on_failure,
            handler,
        }
    }
}
