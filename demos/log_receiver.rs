use carrot_listener::amqp::ConnectionFactory;
use carrot_listener::configuration::load_settings;
use carrot_listener::consumers::{ConsumerGroup, Handler, Incoming};
use tracing_subscriber::EnvFilter;

/// Prints every log line it receives, tagged with the name of its subscription.
struct LogPrinter {
    label: &'static str,
}

#[derive(Debug, thiserror::Error)]
#[error("Refusing an empty log line.")]
struct EmptyLogLine;

#[async_trait::async_trait]
impl Handler for LogPrinter {
    type Context = ();
    type Error = EmptyLogLine;

    async fn handle(&self, incoming: &Incoming<'_, ()>) -> Result<(), EmptyLogLine> {
        // Returning an error nacks the message: with `dead_letter = true` it lands in
        // `log.info.deadletter`, otherwise it is dropped.
        if incoming.payload.trim().is_empty() {
            return Err(EmptyLogLine);
        }
        tracing::info!(
            label = self.label,
            routing_key = incoming.message.routing_key.as_str(),
            "{}",
            incoming.payload
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Settings come from `demos/log_receiver.toml`, every value can be overridden with
    // `CARROT_LISTENER__*` environment variables, e.g. `CARROT_LISTENER__RABBITMQ__HOST`.
    let settings = load_settings("demos/log_receiver.toml")?;
    let connection_factory = ConnectionFactory::new_from_config(&settings.rabbitmq)?;

    // All subscriptions share the same connection, channel and (empty) context.
    // The group-level defaults (prefetch count, ack mode, requeue) come from the `consumer`
    // section of the settings.
    let group = settings
        .consumer
        .apply(ConsumerGroup::builder(connection_factory, ()));

    // One message handler per subscription: each declares its exchange, queue and binding
    // before consuming.
    let mut subscriptions = settings.subscriptions.iter();
    let first = subscriptions
        .next()
        .ok_or_else(|| anyhow::anyhow!("At least one subscription must be configured."))?;
    let mut group = group.message_handler(first.message_handler().handler(LogPrinter {
        label: label(&first.queue.name),
    }));
    for subscription in subscriptions {
        group = group.message_handler(subscription.message_handler().handler(LogPrinter {
            label: label(&subscription.queue.name),
        }));
    }

    // `build` connects to the broker and runs the pre-start hooks.
    // Messages are processed until SIGTERM (or until one of the consumers fails).
    group.build().await?.run_until_sigterm().await
}

fn label(queue_name: &str) -> &'static str {
    match queue_name.rsplit('.').next() {
        Some("info") => "info",
        _ => "all",
    }
}
