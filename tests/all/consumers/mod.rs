mod failures;
mod settlement;
mod shutdown;

use crate::helpers::InMemoryBroker;
use carrot_listener::consumers::{
    DeliveryWorker, Handler, Incoming, MessageHandler, MessageHandlerBuilder,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct Context {
    pub broker: Arc<InMemoryBroker>,
    /// Payloads processed successfully, in completion order.
    pub processed: Mutex<Vec<String>>,
}

/// Behaves according to the payload it receives:
/// - `bad`: fails;
/// - `panic`: panics;
/// - `sleep:<ms>`: succeeds after `ms` milliseconds;
/// - `after-ack:<tag>`: fails once the broker has acknowledged `tag`;
/// - anything else: succeeds.
pub struct ScriptedHandler;

#[async_trait::async_trait]
impl Handler for ScriptedHandler {
    type Context = Context;
    type Error = String;

    async fn handle(&self, incoming: &Incoming<'_, Context>) -> Result<(), String> {
        let payload = incoming.payload;
        if payload == "bad" {
            return Err("bad payload".into());
        }
        if payload == "panic" {
            panic!("The handler blew up.");
        }
        if let Some(ms) = payload.strip_prefix("sleep:") {
            let ms: u64 = ms.parse().map_err(|_| "invalid duration".to_owned())?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(tag) = payload.strip_prefix("after-ack:") {
            let tag: u64 = tag.parse().map_err(|_| "invalid tag".to_owned())?;
            let broker = &incoming.context.broker;
            let acked = async {
                while !broker
                    .calls()
                    .contains(&crate::helpers::BrokerCall::ack(tag))
                {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            };
            tokio::time::timeout(Duration::from_secs(5), acked)
                .await
                .map_err(|_| format!("delivery {tag} was never acknowledged"))?;
            return Err(format!("failing after delivery {tag} was acknowledged"));
        }
        incoming
            .context
            .processed
            .lock()
            .unwrap()
            .push(payload.to_owned());
        Ok(())
    }
}

pub struct TestConsumer {
    pub worker: DeliveryWorker<Context, String>,
    pub broker: Arc<InMemoryBroker>,
    pub context: Arc<Context>,
}

/// A worker running [`ScriptedHandler`] against an [`InMemoryBroker`].
pub fn scripted_consumer(
    configure: impl FnOnce(MessageHandlerBuilder<Context, String>) -> MessageHandlerBuilder<Context, String>,
) -> TestConsumer {
    let broker = Arc::new(InMemoryBroker::default());
    let context = Arc::new(Context {
        broker: broker.clone(),
        processed: Mutex::new(vec![]),
    });
    let message_handler = configure(MessageHandler::builder("logs")).handler(ScriptedHandler);
    let worker = DeliveryWorker::new(message_handler, context.clone(), broker.clone());
    TestConsumer {
        worker,
        broker,
        context,
    }
}
