use crate::consumers::Incoming;
use std::fmt;
use std::sync::Arc;

/// Implementers of the `Handler` trait hold the business logic run on each message retrieved
/// from a queue.
///
/// # Scope
///
/// `handle` does not get access to the underlying RabbitMq channel.
/// The consumer acks the message if `handle` returns `Ok(())` and nacks it if `handle` returns
/// an error (or panics). This decouples the low-level interactions with the message broker from
/// the actual business logic associated with the processing of a message.
///
/// The payload is decoded as UTF-8 before `handle` is invoked: messages that are not valid UTF-8
/// are nacked without ever reaching the handler.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Shared resources needed to process messages, see [`Incoming::context`].
    type Context: Send + Sync + 'static;
    type Error: fmt::Debug + fmt::Display + Send + Sync + 'static;

    async fn handle(&self, incoming: &Incoming<'_, Self::Context>) -> Result<(), Self::Error>;
}

#[async_trait::async_trait]
impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    type Context = H::Context;
    type Error = H::Error;

    async fn handle(&self, incoming: &Incoming<'_, Self::Context>) -> Result<(), Self::Error> {
        H::handle(self, incoming).await
    }
}
