use crate::consumers::{
    delivery_channel, BrokerError, ConsumerError, Delivery, DeliveryReceiver, DeliverySender,
    DeliveryWorker, MessageHandler,
};
use amq_protocol_types::{AMQPValue, FieldTable};
use async_trait::async_trait;
use futures_util::{Future, StreamExt};
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions},
    Channel, ChannelState,
};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// The actual implementation of a RabbitMq consumer.
///
/// [`ConsumerGroup`] instantiates a `Consumer` for each [`MessageHandler`].
///
/// Users of the crate are never exposed to `Consumer` directly - it only bridges a lapin consumer
/// to a [`DeliveryWorker`], which owns the processing logic.
///
/// [`ConsumerGroup`]: super::ConsumerGroup
pub(super) struct Consumer<C, E>
where
    C: Send + Sync + 'static,
    E: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    /// The channel the consumer was registered on, shared with the other consumers in the group.
    channel: Channel,
    consumer: lapin::Consumer,
    consumer_tag: String,
    prefetch_count: u16,
    worker: DeliveryWorker<C, E>,
}

impl<C, E> Consumer<C, E>
where
    C: Send + Sync + 'static,
    E: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    /// Configure a new RabbitMq consumer on an existing channel.
    ///
    /// `new` sets the prefetch count, executes the pre-start hooks of `message_handler` and
    /// registers a consumer on the queue.
    /// Deliveries are buffered by the client until [`Consumer::run_until_shutdown`] is called.
    #[tracing::instrument(
        skip(channel, message_handler, context),
        fields(queue_name = %message_handler.queue_name),
        name = "consumer_new"
    )]
    pub(super) async fn new(
        channel: Channel,
        message_handler: MessageHandler<C, E>,
        prefetch_count: u16,
        // If the context is already behind an Arc pointer, we won't double-wrap it.
        // Useful to share the same context across multiple consumers.
        context: impl Into<Arc<C>>,
        exit_after: Option<usize>,
    ) -> Result<Self, anyhow::Error> {
        channel
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await?;

        for hook in &message_handler.pre_start_hooks {
            hook.run(&channel, &message_handler.queue_name, FieldTable::default())
                .await?;
        }

        let consumer_tag = Uuid::new_v4().to_string();
        let consumer = channel
            .basic_consume(
                &message_handler.queue_name,
                &consumer_tag,
                BasicConsumeOptions {
                    no_ack: message_handler.ack_mode.unwrap_or_default().no_ack(),
                    ..BasicConsumeOptions::default()
                },
                {
                    let mut args = FieldTable::default();
                    if let Some(priority) = message_handler.priority {
                        args.insert("x-priority".into(), AMQPValue::LongInt(priority));
                    }
                    args
                },
            )
            .await?;
        tracing::info!(consumer_tag = %consumer_tag, prefetch_count, "Consumer registered.");

        let mut worker =
            DeliveryWorker::new(message_handler, context, Arc::new(channel.clone()));
        if let Some(exit_after) = exit_after {
            worker = worker.exit_after(exit_after);
        }
        // A prefetch count of 0 means "no limit" for RabbitMq.
        if prefetch_count > 0 {
            worker = worker.max_in_flight(prefetch_count.into());
        }

        Ok(Consumer {
            channel,
            consumer,
            consumer_tag,
            prefetch_count,
            worker,
        })
    }

    /// Start processing the deliveries pushed by RabbitMq.
    ///
    /// When `shutdown` resolves the consumer is cancelled: RabbitMq stops pushing deliveries,
    /// those already received are processed and settled before returning.
    /// The consumer is also cancelled when the worker stops on its own (`exit_after`, errors).
    ///
    /// `run_until_shutdown` exits with an error if the channel is closed, the connection with
    /// RabbitMq is lost or a delivery cannot be acknowledged.
    pub(super) async fn run_until_shutdown(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ConsumerError> {
        let Self {
            channel,
            consumer,
            consumer_tag,
            prefetch_count,
            worker,
        } = self;

        let (sender, receiver) = delivery_channel(prefetch_count.into());
        let forwarder = tokio::spawn(forward_deliveries(consumer, sender));

        let cancellation = Cancellation::new(Arc::new(channel), consumer_tag);
        let result = run_then_cancel(worker, receiver, shutdown, cancellation).await;
        forwarder.abort();
        result
    }
}

/// Drive `worker` and cancel the broker-side consumer exactly once: as soon as `shutdown`
/// resolves, or when the worker returns if it stopped on its own.
async fn run_then_cancel<C, E>(
    worker: DeliveryWorker<C, E>,
    receiver: DeliveryReceiver,
    shutdown: impl Future<Output = ()>,
    cancellation: Arc<Cancellation>,
) -> Result<(), ConsumerError>
where
    C: Send + Sync + 'static,
    E: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    let cancel_on_shutdown = {
        let cancellation = Arc::clone(&cancellation);
        async move {
            shutdown.await;
            // The delivery stream ends once the broker confirms the cancellation.
            cancellation.cancel().await;
        }
    };
    let result = worker.run_until_shutdown(receiver, cancel_on_shutdown).await;
    cancellation.cancel().await;
    result
}

/// Stop the broker from pushing deliveries to a consumer.
#[async_trait]
trait CancelConsumer: Send + Sync + 'static {
    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError>;
}

#[async_trait]
impl CancelConsumer for Channel {
    async fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        // Consumers die with their channel.
        if !matches!(self.status().state(), ChannelState::Connected) {
            return Ok(());
        }
        self.basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await?;
        Ok(())
    }
}

/// A consumer registration that is cancelled at most once.
struct Cancellation {
    canceller: Arc<dyn CancelConsumer>,
    consumer_tag: String,
    cancelled: AtomicBool,
}

impl Cancellation {
    fn new(canceller: Arc<dyn CancelConsumer>, consumer_tag: String) -> Arc<Self> {
        Arc::new(Self {
            canceller,
            consumer_tag,
            cancelled: AtomicBool::new(false),
        })
    }

    async fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.canceller.cancel(&self.consumer_tag).await {
            tracing::warn!(error = %e, consumer_tag = %self.consumer_tag, "Failed to cancel the consumer.");
        }
    }
}

/// Push the deliveries of `consumer` onto the in-process queue until either side hangs up.
/// A stream error is forwarded, then the stream is abandoned.
async fn forward_deliveries(mut consumer: lapin::Consumer, sender: DeliverySender) {
    while let Some(event) = consumer.next().await {
        let event = event.map(Delivery::from).map_err(BrokerError::from);
        let failed = event.is_err();
        if sender.send(event).await.is_err() || failed {
            break;
        }
    }
}
