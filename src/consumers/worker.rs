use crate::consumers::{
    AckMode, Acknowledger, BindingKey, BrokerAction, BrokerError, ConsumerError, Delivery,
    DeliveryLedger, Handler, Incoming, MessageHandler, ProcessingError,
};
use futures_util::{stream::FuturesUnordered, FutureExt, StreamExt};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The sending half of the in-process queue of deliveries.
pub type DeliverySender = mpsc::Sender<Result<Delivery, BrokerError>>;
/// The receiving half of the in-process queue of deliveries, consumed by a [`DeliveryWorker`].
pub type DeliveryReceiver = mpsc::Receiver<Result<Delivery, BrokerError>>;

/// Create the in-process queue the broker client pushes deliveries onto.
///
/// `capacity` is usually the prefetch count: the broker never has more unsettled deliveries
/// in flight on a consumer than that.
pub fn delivery_channel(capacity: usize) -> (DeliverySender, DeliveryReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Drives a [`MessageHandler`]: it pulls deliveries from a [`DeliveryReceiver`], runs the handler
/// on each of them and settles them with the broker through an [`Acknowledger`].
///
/// Every delivery is processed on its own task, so a slow handler does not hold back the
/// following deliveries. Each delivery is settled exactly once, when its own processing
/// completes:
///
/// - handler succeeded: `ack(multiple=false)`;
/// - payload is not valid UTF-8, the handler failed or panicked: `nack(multiple=false)`,
///   with `requeue` set according to [`MessageHandlerBuilder::requeue_on_failure`].
///
/// In [`AckMode::Automatic`] nothing is sent to the broker: the delivery was settled when it was
/// sent, so the [`DeliveryLedger`] records it as acknowledged whatever the outcome of the
/// handler. Failures are only visible in the logs.
///
/// The broker caps unsettled deliveries to the prefetch count in manual mode only, see
/// [`DeliveryWorker::max_in_flight`] to bound concurrency in automatic mode.
///
/// [`MessageHandlerBuilder::requeue_on_failure`]: crate::consumers::MessageHandlerBuilder::requeue_on_failure
pub struct DeliveryWorker<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    dispatch: Dispatch<Context, Error>,
    /// The maximum number of deliveries the worker processes before exiting.
    /// The worker runs indefinitely if set to `None`.
    exit_after: Option<usize>,
    /// The worker stops pulling deliveries while this many are being processed.
    max_in_flight: Option<usize>,
}

impl<Context, Error> DeliveryWorker<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    /// Pre-start hooks and the prefetch count of `message_handler` are ignored: they only matter
    /// when subscribing to the broker, see [`ConsumerGroup`](crate::consumers::ConsumerGroup).
    pub fn new(
        message_handler: MessageHandler<Context, Error>,
        context: impl Into<Arc<Context>>,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Self {
        let failure_action = BrokerAction::Nack {
            requeue: message_handler.requeue_on_failure.unwrap_or(false),
        };
        Self {
            dispatch: Dispatch {
                queue_name: message_handler.queue_name.into(),
                context: context.into(),
                handler: message_handler.handler,
                acknowledger,
                ledger: Arc::new(DeliveryLedger::new()),
                ack_mode: message_handler.ack_mode.unwrap_or_default(),
                failure_action,
                binding_keys: message_handler.binding_keys.into(),
            },
            exit_after: None,
            max_in_flight: None,
        }
    }

    /// Stop consuming after `max_n_messages` deliveries have been received, once all of them
    /// have been settled.
    #[must_use]
    pub fn exit_after(mut self, max_n_messages: usize) -> Self {
        self.exit_after = Some(max_n_messages);
        self
    }

    /// Process at most `max_in_flight` deliveries at a time. `0` is treated as `1`.
    #[must_use]
    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight.max(1));
        self
    }

    /// The book-keeping of the deliveries this worker has not settled yet.
    pub fn ledger(&self) -> Arc<DeliveryLedger> {
        Arc::clone(&self.dispatch.ledger)
    }

    /// Process deliveries until one of the following happens:
    ///
    /// - `shutdown` resolves: the deliveries still queued in `deliveries` are processed until the
    ///   sender hangs up, then the worker returns `Ok(())`;
    /// - `exit_after` deliveries have been received and settled;
    /// - a fatal error: the delivery stream failed or closed on its own, a delivery could not be
    ///   settled with the broker, the broker reused a delivery tag.
    ///
    /// The worker always waits for in-flight deliveries to complete before returning.
    #[tracing::instrument(skip_all, name = "delivery_worker_run", fields(queue_name = %self.dispatch.queue_name))]
    pub async fn run_until_shutdown(
        self,
        mut deliveries: DeliveryReceiver,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ConsumerError> {
        let mut in_flight: FuturesUnordered<JoinHandle<Result<(), ConsumerError>>> =
            FuturesUnordered::new();
        let mut received = 0;
        let mut shutting_down = false;

        let shutdown = shutdown.fuse();
        tokio::pin!(shutdown);

        let result = 'event_loop: loop {
            if self.exit_after == Some(received) {
                break 'event_loop Ok(());
            }

            tokio::select! {
                // Shutdown first, then settled deliveries (to notice fatal settlement failures
                // early), then new deliveries.
                biased;

                _ = &mut shutdown, if !shutting_down => {
                    tracing::info!("Delivery worker received shutdown event, draining pending deliveries.");
                    shutting_down = true;
                }

                Some(settled) = in_flight.next(), if !in_flight.is_empty() => {
                    if let Err(e) = flatten(settled) {
                        break 'event_loop Err(e);
                    }
                }

                event = deliveries.recv(), if self.has_capacity(in_flight.len()) => {
                    match event {
                        None if shutting_down => break 'event_loop Ok(()),
                        None => {
                            tracing::error!("The delivery stream closed without a shutdown request.");
                            break 'event_loop Err(ConsumerError::DeliveryStreamClosed {
                                queue_name: self.dispatch.queue_name.to_string(),
                            });
                        }
                        Some(Err(e)) => {
                            tracing::error!("Consumer error: {}", e);
                            break 'event_loop Err(e.into());
                        }
                        Some(Ok(delivery)) => {
                            if let Err(e) = self.dispatch.ledger.register(delivery.delivery_tag) {
                                tracing::error!("Refusing delivery: {}", e);
                                break 'event_loop Err(e.into());
                            }
                            in_flight.push(tokio::spawn(self.dispatch.clone().process(delivery)));
                            received += 1;
                        }
                    }
                }
            }
        };

        // Make sure all tasks in flight complete before returning.
        let mut result = result;
        while let Some(settled) = in_flight.next().await {
            if let Err(e) = flatten(settled) {
                if result.is_ok() {
                    result = Err(e);
                } else {
                    tracing::error!("Another delivery failed while the worker was stopping: {}", e);
                }
            }
        }

        result
    }

    fn has_capacity(&self, in_flight: usize) -> bool {
        self.max_in_flight.map_or(true, |max| in_flight < max)
    }
}

fn flatten(
    settled: Result<Result<(), ConsumerError>, tokio::task::JoinError>,
) -> Result<(), ConsumerError> {
    settled.map_err(ConsumerError::from).and_then(|r| r)
}

/// Everything needed to process a single delivery, cheap to clone into a task.
struct Dispatch<Context, Error> {
    queue_name: Arc<str>,
    context: Arc<Context>,
    handler: Arc<dyn Handler<Context = Context, Error = Error>>,
    acknowledger: Arc<dyn Acknowledger>,
    ledger: Arc<DeliveryLedger>,
    ack_mode: AckMode,
    failure_action: BrokerAction,
    binding_keys: Arc<[BindingKey]>,
}

impl<Context, Error> Clone for Dispatch<Context, Error> {
    fn clone(&self) -> Self {
        Self {
            queue_name: Arc::clone(&self.queue_name),
            context: Arc::clone(&self.context),
            handler: Arc::clone(&self.handler),
            acknowledger: Arc::clone(&self.acknowledger),
            ledger: Arc::clone(&self.ledger),
            ack_mode: self.ack_mode,
            failure_action: self.failure_action,
            binding_keys: Arc::clone(&self.binding_keys),
        }
    }
}

impl<Context, Error> Dispatch<Context, Error>
where
    Context: Send + Sync + 'static,
    Error: fmt::Debug + fmt::Display + Send + Sync + 'static,
{
    /// Process an incoming message - decode, handler, ack/nack against the AMQP broker.
    #[tracing::instrument(
        name = "process_message",
        skip_all,
        fields(
            queue_name = %self.queue_name,
            delivery_tag = delivery.delivery_tag,
            routing_key = delivery.routing_key.as_str(),
            redelivered = delivery.redelivered,
        ),
        level = tracing::Level::DEBUG
    )]
    async fn process(self, delivery: Delivery) -> Result<(), ConsumerError> {
        let delivery_tag = delivery.delivery_tag;
        self.ledger.begin_processing(delivery_tag)?;

        if !self.binding_keys.is_empty()
            && !self
                .binding_keys
                .iter()
                .any(|key| key.matches(delivery.routing_key.as_str()))
        {
            tracing::warn!("The routing key does not match any binding key of this consumer.");
        }

        // A panicking handler must not leave the delivery unsettled.
        let outcome = AssertUnwindSafe(self.run_handler(&delivery))
            .catch_unwind()
            .await
            .unwrap_or(Err(ProcessingError::Panicked));

        match &outcome {
            Ok(()) => tracing::debug!("Message processed."),
            Err(e) => tracing::warn!(error = %e, "Message processing failed."),
        }

        let action = match (self.ack_mode, outcome) {
            (AckMode::Automatic, _) => {
                // The broker settled the delivery when it sent it.
                self.ledger.settle(delivery_tag, BrokerAction::Ack)?;
                return Ok(());
            }
            (AckMode::Manual, Ok(())) => BrokerAction::Ack,
            (AckMode::Manual, Err(_)) => self.failure_action,
        };

        if let Err(source) = action
            .execute(self.acknowledger.as_ref(), delivery_tag)
            .await
        {
            tracing::error!(error = %source, ?action, "Failed to settle the message with the broker.");
            return Err(ConsumerError::Settlement {
                delivery_tag,
                source,
            });
        }
        self.ledger.settle(delivery_tag, action)?;
        Ok(())
    }

    async fn run_handler(&self, delivery: &Delivery) -> Result<(), ProcessingError<Error>> {
        let payload = std::str::from_utf8(&delivery.data).map_err(ProcessingError::InvalidPayload)?;
        let incoming = Incoming {
            context: Arc::clone(&self.context),
            message: delivery,
            payload,
            queue_name: &self.queue_name,
        };
        self.handler
            .handle(&incoming)
            .await
            .map_err(ProcessingError::Handler)
    }
}
