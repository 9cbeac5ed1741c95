use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use num_traits::Signed;
use serde::Serialize;

use super::{FeeTier, PoolDescriptor};
use crate::error::ObserverError;

/// Raw pool state at one observation instant.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolState {
    /// V2 reserves in base units.
    ConstantProduct { reserve0: BigInt, reserve1: BigInt },
    /// V3 in-range liquidity and Q64.96 square-root price.
    Concentrated {
        liquidity: BigInt,
        sqrt_price_x96: BigInt,
        tick: i32,
    },
    /// Subgraph aggregate. `price0_in_1` is the decimal-adjusted price of token0 in token1
    /// (the subgraph's `token1Price`).
    Indexed {
        price0_in_1: BigDecimal,
        volume_usd: Option<BigDecimal>,
        fees_usd: Option<BigDecimal>,
    },
}

/// Where in the chain a snapshot was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockRef {
    /// Block the snapshot belongs to (the last block seen for multi-read ticks).
    pub number: Option<u64>,
    /// Block seen before the reads started, when reads were not pinned to one block.
    pub first_number: Option<u64>,
    /// Position of the originating log inside its block, for subscription events.
    pub log_index: Option<u64>,
    /// Block timestamp in unix seconds, when the source reports it.
    pub timestamp: Option<i64>,
}

impl BlockRef {
    pub fn at(number: u64) -> Self {
        Self {
            number: Some(number),
            ..Default::default()
        }
    }

    /// True when the reads of a tick may have observed two different blocks.
    pub fn straddles(&self) -> bool {
        matches!((self.first_number, self.number), (Some(first), Some(last)) if first != last)
    }

    /// Total order for emission. A snapshot without a log index is the state at the end of
    /// its block, so it sorts after every log of that block.
    pub fn ordering_key(&self) -> Option<(u64, u64)> {
        self.number
            .map(|number| (number, self.log_index.unwrap_or(u64::MAX)))
    }
}

/// Result of an on-chain quoter call made in the same tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub amount_in: BigInt,
    pub amount_out: BigInt,
}

/// Immutable pool observation. A new value is produced on every tick or event.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub pool_id: String,
    pub token0: String,
    pub token1: String,
    pub fee: FeeTier,
    pub state: PoolState,
    pub block: BlockRef,
    pub observed_at: DateTime<Utc>,
    pub quote: Option<Quote>,
}

impl PoolSnapshot {
    pub fn new(pool: &PoolDescriptor, state: PoolState, block: BlockRef) -> Self {
        Self {
            pool_id: pool.pool_id.clone(),
            token0: pool.token0.id.clone(),
            token1: pool.token1.id.clone(),
            fee: pool.fee,
            state,
            block,
            observed_at: Utc::now(),
            quote: None,
        }
    }

    #[must_use]
    pub fn with_quote(mut self, quote: Option<Quote>) -> Self {
        self.quote = quote;
        self
    }

    /// Reject anything that cannot be priced: non-positive reserves, liquidity or price.
    pub fn validate(&self) -> Result<(), ObserverError> {
        match &self.state {
            PoolState::ConstantProduct { reserve0, reserve1 } => {
                if !reserve0.is_positive() || !reserve1.is_positive() {
                    return Err(ObserverError::Validation(format!(
                        "non-positive reserves ({reserve0}, {reserve1})"
                    )));
                }
            },
            PoolState::Concentrated {
                liquidity,
                sqrt_price_x96,
                ..
            } => {
                if !liquidity.is_positive() {
                    return Err(ObserverError::Validation(format!(
                        "non-positive liquidity {liquidity}"
                    )));
                }
                if !sqrt_price_x96.is_positive() {
                    return Err(ObserverError::Validation(format!(
                        "non-positive sqrtPriceX96 {sqrt_price_x96}"
                    )));
                }
            },
            PoolState::Indexed { price0_in_1, .. } => {
                if !price0_in_1.is_positive() {
                    return Err(ObserverError::Validation(format!(
                        "non-positive indexed price {price0_in_1}"
                    )));
                }
            },
        }

        if let (Some(first), Some(last)) = (self.block.first_number, self.block.number) {
            if first > last {
                return Err(ObserverError::Validation(format!(
                    "block went backwards during reads ({first} -> {last})"
                )));
            }
        }

        Ok(())
    }

    pub fn tick(&self) -> Option<i32> {
        match self.state {
            PoolState::Concentrated { tick, .. } => Some(tick),
            _ => None,
        }
    }
}

/// Quote as delivered to sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteUpdate {
    pub amount_in: String,
    pub amount_out: String,
    pub execution_price: String,
    /// `(mid - execution) / mid` as a fraction, against the mid price of the same snapshot.
    pub price_impact: Option<String>,
}

/// Structured record handed to every snapshot sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceUpdate {
    pub pool_id: String,
    pub block_number: Option<u64>,
    /// Position of the originating log, for subscription events.
    pub log_index: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub token0_symbol: String,
    pub token1_symbol: String,
    /// Price of token0 expressed in token1.
    pub price0_in_1: String,
    /// Price of token1 expressed in token0.
    pub price1_in_0: String,
    pub fee: FeeTier,
    pub tick: Option<i32>,
    pub quote: Option<QuoteUpdate>,
    /// Subgraph aggregates, for indexed pools.
    pub volume_usd: Option<String>,
    pub fees_usd: Option<String>,
}
