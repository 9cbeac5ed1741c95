//! Data sources an observer can be fed from.
//!
//! Polling sources implement [`SnapshotSource`] (one snapshot per call), streaming sources
//! implement [`SnapshotSubscription`] (a stream of snapshots per connection). Both load the
//! pool's lifetime constants once in `connect`.

mod indexer;
mod poll;
mod rpc;
mod subscribe;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::{ObserverSettings, SourceKind};
use crate::error::ObserverError;
use crate::models::{PoolDescriptor, PoolSnapshot, Protocol};

pub use indexer::IndexerSource;
pub use poll::{BlockConsistency, QuoteRequest, RpcPollSource};
pub use rpc::{AlloyRpc, PoolImmutables, PoolRpc, Reserves, Slot0, TokenMetadata};
pub use subscribe::RpcSubscribeSource;

/// Stream of snapshots from one live connection. Ends when the connection drops.
pub type SnapshotStream = BoxStream<'static, Result<PoolSnapshot, ObserverError>>;

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Establish the connection and load pool constants. Failure here is fatal.
    async fn connect(&self) -> Result<PoolDescriptor, ObserverError>;

    /// Produce one snapshot. Either every read of the tick succeeded or this is an error.
    async fn fetch(&self, pool: &PoolDescriptor) -> Result<PoolSnapshot, ObserverError>;
}

#[async_trait]
pub trait SnapshotSubscription: Send + Sync {
    /// Establish the connection and load pool constants. Failure here is fatal.
    async fn connect(&self) -> Result<PoolDescriptor, ObserverError>;

    /// Open a stream. Called once at start and again on every reconnect.
    async fn subscribe(&self, pool: &PoolDescriptor) -> Result<SnapshotStream, ObserverError>;
}

/// The configured source of one observer.
#[derive(Clone)]
pub enum Feed {
    Poll(Arc<dyn SnapshotSource>),
    Subscribe(Arc<dyn SnapshotSubscription>),
}

impl Feed {
    pub async fn connect(&self) -> Result<PoolDescriptor, ObserverError> {
        match self {
            Feed::Poll(source) => source.connect().await,
            Feed::Subscribe(source) => source.connect().await,
        }
    }

    /// Build the source described by `settings`. Nothing is contacted until `connect`.
    pub fn from_settings(settings: &ObserverSettings) -> Result<Self, ObserverError> {
        let endpoint = settings.resolved_endpoint()?;
        let display = [settings.token0.clone(), settings.token1.clone()];

        if settings.source != SourceKind::IndexerQuery && settings.protocol == Protocol::Indexed {
            return Err(ObserverError::Config(format!(
                "observer {}: protocol `indexed` needs source `indexer-query`",
                settings.name
            )));
        }

        if settings.read_timeout().is_zero() {
            return Err(ObserverError::Config(format!(
                "observer {}: read timeout must be positive",
                settings.name
            )));
        }

        let feed = match settings.source {
            SourceKind::RpcPoll => {
                let rpc = AlloyRpc::http(&endpoint)?;
                let quote = settings
                    .quote
                    .as_ref()
                    .map(QuoteRequest::from_settings)
                    .transpose()?;
                let source = RpcPollSource::new(
                    Arc::new(rpc),
                    parse_address(&settings.pool)?,
                    settings.protocol,
                    settings.read_timeout(),
                )
                .with_block_consistency(settings.block_consistency)
                .with_display(display)
                .with_quote(quote);
                Feed::Poll(Arc::new(source))
            },
            SourceKind::RpcSubscribe => Feed::Subscribe(Arc::new(
                RpcSubscribeSource::new(
                    endpoint,
                    parse_address(&settings.pool)?,
                    settings.protocol,
                    settings.read_timeout(),
                )
                .with_display(display),
            )),
            SourceKind::IndexerQuery => Feed::Poll(Arc::new(
                IndexerSource::new(&endpoint, &settings.pool, settings.read_timeout())?
                    .with_display(display),
            )),
        };

        Ok(feed)
    }
}

pub(crate) fn parse_address(value: &str) -> Result<alloy::primitives::Address, ObserverError> {
    value
        .parse()
        .map_err(|e| ObserverError::Config(format!("invalid address {value}: {e}")))
}
