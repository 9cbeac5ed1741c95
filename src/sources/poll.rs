//! JSON-RPC polling source.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;

use super::rpc::{load_descriptor, read_state, timed, PoolRpc};
use super::{parse_address, SnapshotSource};
use crate::config::QuoteSettings;
use crate::error::ObserverError;
use crate::models::{BlockRef, PoolDescriptor, PoolSnapshot, Protocol, Quote, TokenDisplay};
use crate::utils::u256_to_bigint;

/// How the reads of one tick relate to the chain head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockConsistency {
    /// Read the head block number first and pin every read to it.
    #[default]
    Pinned,
    /// Read at latest and report the block seen before and after the reads.
    Tolerate,
    /// Like `Tolerate`, but a tick whose reads span two blocks is rejected.
    Reject,
}

/// A `quoteExactInputSingle` call made alongside every V3 tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteRequest {
    pub quoter: Address,
    /// Amount of token0 in base units.
    pub amount_in: U256,
}

impl QuoteRequest {
    pub fn from_settings(settings: &QuoteSettings) -> Result<Self, ObserverError> {
        let amount_in = U256::from_str_radix(&settings.amount_in, 10).map_err(|e| {
            ObserverError::Config(format!("invalid quote amount {}: {e}", settings.amount_in))
        })?;
        if amount_in.is_zero() {
            return Err(ObserverError::Config("quote amount must be positive".to_string()));
        }
        Ok(Self {
            quoter: parse_address(&settings.quoter)?,
            amount_in,
        })
    }
}

/// Reads pool state over JSON-RPC once per call.
pub struct RpcPollSource {
    rpc: Arc<dyn PoolRpc>,
    pool: Address,
    protocol: Protocol,
    consistency: BlockConsistency,
    read_timeout: Duration,
    quote: Option<QuoteRequest>,
    display: [TokenDisplay; 2],
}

impl RpcPollSource {
    pub fn new(
        rpc: Arc<dyn PoolRpc>,
        pool: Address,
        protocol: Protocol,
        read_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            pool,
            protocol,
            consistency: BlockConsistency::default(),
            read_timeout,
            quote: None,
            display: Default::default(),
        }
    }

    pub fn with_block_consistency(mut self, consistency: BlockConsistency) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_display(mut self, display: [TokenDisplay; 2]) -> Self {
        self.display = display;
        self
    }

    pub fn with_quote(mut self, quote: Option<QuoteRequest>) -> Self {
        self.quote = quote;
        self
    }

    async fn head(&self) -> Result<u64, ObserverError> {
        timed(self.read_timeout, "eth_blockNumber", self.rpc.block_number()).await
    }

    async fn read_quote(
        &self,
        pool: &PoolDescriptor,
        block: Option<u64>,
    ) -> Result<Option<Quote>, ObserverError> {
        let Some(request) = self.quote.filter(|_| self.protocol == Protocol::V3) else {
            return Ok(None);
        };

        let amount_out = timed(
            self.read_timeout,
            "quoteExactInputSingle",
            self.rpc.quote_exact_input_single(
                request.quoter,
                parse_address(&pool.token0.id)?,
                parse_address(&pool.token1.id)?,
                pool.fee.hundredths_of_bip(),
                request.amount_in,
                block,
            ),
        )
        .await?;

        Ok(Some(Quote {
            amount_in: u256_to_bigint(request.amount_in),
            amount_out: u256_to_bigint(amount_out),
        }))
    }
}

#[async_trait]
impl SnapshotSource for RpcPollSource {
    async fn connect(&self) -> Result<PoolDescriptor, ObserverError> {
        let descriptor = load_descriptor(
            self.rpc.as_ref(),
            self.pool,
            self.protocol,
            self.read_timeout,
            &self.display,
        )
        .await?;

        if self.quote.is_some() && self.protocol != Protocol::V3 {
            warn!(
                "Quotes are only taken for V3 pools, ignoring quoter for {}",
                descriptor.pool_id
            );
        }

        info!(
            "Polling {} {} (fee {}) with {:?} block reads",
            descriptor.pair_label(),
            descriptor.pool_id,
            descriptor.fee,
            self.consistency
        );

        Ok(descriptor)
    }

    async fn fetch(&self, pool: &PoolDescriptor) -> Result<PoolSnapshot, ObserverError> {
        let t = self.read_timeout;
        let rpc = self.rpc.as_ref();

        let (state, quote, block) = match self.consistency {
            BlockConsistency::Pinned => {
                let head = self.head().await?;
                let (state, quote) = tokio::try_join!(
                    read_state(rpc, self.pool, self.protocol, Some(head), t),
                    self.read_quote(pool, Some(head)),
                )?;
                (state, quote, BlockRef::at(head))
            },
            BlockConsistency::Tolerate | BlockConsistency::Reject => {
                let first = self.head().await?;
                let (state, quote) = tokio::try_join!(
                    read_state(rpc, self.pool, self.protocol, None, t),
                    self.read_quote(pool, None),
                )?;
                let last = self.head().await?;

                let block = BlockRef {
                    number: Some(last),
                    first_number: Some(first),
                    ..Default::default()
                };
                if self.consistency == BlockConsistency::Reject && block.straddles() {
                    return Err(ObserverError::Validation(format!(
                        "reads spanned blocks {first}..={last}"
                    )));
                }
                (state, quote, block)
            },
        };

        Ok(PoolSnapshot::new(pool, state, block).with_quote(quote))
    }
}
