//! Consumers of observer output.
//!
//! Price updates go to [`SnapshotSink`]s, skipped ticks go to [`HealthSink`]s. Both are
//! called synchronously from the observer task, in registration order.

mod channel;
mod console;
mod redpanda;

use chrono::{DateTime, Utc};

use crate::error::ObserverError;
use crate::models::PriceUpdate;

pub use channel::ChannelSink;
pub use console::ConsoleSink;
pub use redpanda::RedpandaPublisher;

/// Receives every valid price update.
pub trait SnapshotSink: Send + Sync {
    fn on_snapshot(&self, update: &PriceUpdate);
}

impl<F> SnapshotSink for F
where
    F: Fn(&PriceUpdate) + Send + Sync,
{
    fn on_snapshot(&self, update: &PriceUpdate) {
        self(update)
    }
}

/// A tick that produced no update.
#[derive(Debug, Clone)]
pub struct TickFailure {
    pub observer: String,
    pub pool_id: String,
    pub at: DateTime<Utc>,
    pub error: ObserverError,
}

/// Receives every skipped or failed tick, separate from the data path.
pub trait HealthSink: Send + Sync {
    fn on_failure(&self, failure: &TickFailure);
}

impl<F> HealthSink for F
where
    F: Fn(&TickFailure) + Send + Sync,
{
    fn on_failure(&self, failure: &TickFailure) {
        self(failure)
    }
}
