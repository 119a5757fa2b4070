//! Book-keeping of in-flight deliveries.
//!
//! Every delivery goes through `Delivered -> Processing -> Acknowledged | NegativelyAcknowledged`.
//! There is no way back to `Delivered`: if the broker redelivers a message it does so with a new
//! delivery tag.
use crate::consumers::settlement::BrokerAction;
use amq_protocol_types::DeliveryTag;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Delivered,
    Processing,
    Acknowledged,
    NegativelyAcknowledged,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acknowledged | Self::NegativelyAcknowledged)
    }
}

impl From<BrokerAction> for DeliveryState {
    fn from(action: BrokerAction) -> Self {
        match action {
            BrokerAction::Ack => Self::Acknowledged,
            BrokerAction::Nack { .. } => Self::NegativelyAcknowledged,
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Processing => write!(f, "processing"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::NegativelyAcknowledged => write!(f, "negatively acknowledged"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The broker handed out a tag that is not greater than one it already delivered.
    #[error("Delivery tag {delivery_tag} was received after tag {last_seen}: tags must increase.")]
    DuplicateDeliveryTag {
        delivery_tag: DeliveryTag,
        last_seen: DeliveryTag,
    },
    #[error("Delivery tag {0} is not in flight.")]
    UnknownDeliveryTag(DeliveryTag),
    #[error("Delivery {delivery_tag} cannot move from `{from}` to `{to}`.")]
    InvalidTransition {
        delivery_tag: DeliveryTag,
        from: DeliveryState,
        to: DeliveryState,
    },
}

#[derive(Default)]
struct Inner {
    last_registered: Option<DeliveryTag>,
    in_flight: HashMap<DeliveryTag, DeliveryState>,
}

/// Tracks the state of every delivery received by a single consumer.
///
/// Settled deliveries are forgotten: delivery tags increase monotonically on a channel, so
/// remembering the highest registered tag is enough to detect a tag being reused.
#[derive(Default)]
pub struct DeliveryLedger {
    inner: Mutex<Inner>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new delivery in the `Delivered` state.
    pub fn register(&self, delivery_tag: DeliveryTag) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if let Some(last_seen) = inner.last_registered {
            if delivery_tag <= last_seen {
                return Err(LedgerError::DuplicateDeliveryTag {
                    delivery_tag,
                    last_seen,
                });
            }
        }
        inner.last_registered = Some(delivery_tag);
        inner
            .in_flight
            .insert(delivery_tag, DeliveryState::Delivered);
        Ok(())
    }

    /// `Delivered -> Processing`.
    pub fn begin_processing(&self, delivery_tag: DeliveryTag) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let state = inner
            .in_flight
            .get_mut(&delivery_tag)
            .ok_or(LedgerError::UnknownDeliveryTag(delivery_tag))?;
        match *state {
            DeliveryState::Delivered => {
                *state = DeliveryState::Processing;
                Ok(())
            }
            from => Err(LedgerError::InvalidTransition {
                delivery_tag,
                from,
                to: DeliveryState::Processing,
            }),
        }
    }

    /// `Processing -> Acknowledged | NegativelyAcknowledged`.
    ///
    /// The delivery is no longer tracked afterwards.
    pub fn settle(
        &self,
        delivery_tag: DeliveryTag,
        action: BrokerAction,
    ) -> Result<DeliveryState, LedgerError> {
        let mut inner = self.lock();
        let to = DeliveryState::from(action);
        match inner.in_flight.get(&delivery_tag).copied() {
            None => Err(LedgerError::UnknownDeliveryTag(delivery_tag)),
            Some(DeliveryState::Processing) => {
                inner.in_flight.remove(&delivery_tag);
                Ok(to)
            }
            Some(from) => Err(LedgerError::InvalidTransition {
                delivery_tag,
                from,
                to,
            }),
        }
    }

    /// The state of a delivery that has not been settled yet.
    pub fn state(&self, delivery_tag: DeliveryTag) -> Option<DeliveryState> {
        self.lock().in_flight.get(&delivery_tag).copied()
    }

    /// How many deliveries are waiting for a decision.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // The critical sections never panic, a poisoned lock still holds consistent data.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
