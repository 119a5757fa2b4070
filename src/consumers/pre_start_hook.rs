use amq_protocol_types::FieldTable;
use lapin::Channel;

#[async_trait::async_trait]
/// A hook to execute logic before a [`MessageHandler`] starts consuming messages.
///
/// # Use case
///
/// [`MessageHandler`]s process messages retrieved from a queue. Who is in charge of creating the queue
/// resource? What about the exchange the queue needs to be bound to?
///
/// Depending on your setup, this might be done via Terraform or manually.
/// Often, though, it is preferable to have consumers in charge of creating the objects they
/// rely on.
///
/// A pre-start hook gets access to the channel the consumer will use, allowing you to declare
/// resources against the message broker before the consumer actually starts pulling messages.
///
/// Ready-to-go hooks live in [`hooks::pre_start`].
///
/// [`MessageHandler`]: crate::consumers::MessageHandler
/// [`hooks::pre_start`]: crate::consumers::hooks::pre_start
pub trait ConsumerPreStartHook: Send + Sync + 'static {
    /// `queue_args` are the arguments the queue must be declared with, as accumulated by the
    /// hooks wrapping this one (e.g. `x-dead-letter-exchange`).
    async fn run(
        &self,
        channel: &Channel,
        queue_name: &str,
        queue_args: FieldTable,
    ) -> Result<(), anyhow::Error>;
}

/// assert it's object safe
type _CHECK = Box<dyn ConsumerPreStartHook>;
