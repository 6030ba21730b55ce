//! Batch delivery contract.
//!
//! A Transport knows how to hand one [`Batch`] to a remote system and
//! report what happened. It never returns an error to its caller: every
//! failure is folded into [`DeliveryOutcome::Failed`].
//!
//! Implementations: HTTP ingest (with retry), message bus (single attempt).

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::event::Batch;

/// Terminal result of sending one batch.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// The batch was accepted.
    Delivered { attempts: u32 },
    /// The batch was dropped after `attempts` tries.
    Failed { attempts: u32, error: DeliveryError },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// How many send attempts were made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn error(&self) -> Option<&DeliveryError> {
        match self {
            Self::Delivered { .. } => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}

/// A pluggable delivery mechanism for batches.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs (e.g. "http", "eventbridge").
    fn name(&self) -> &str;

    /// Deliver one batch. Must not panic and must not be retried by the caller.
    async fn send(&self, batch: &Batch) -> DeliveryOutcome;
}
