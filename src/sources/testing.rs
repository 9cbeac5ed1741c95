//! In-memory [`PoolRpc`] for unit tests.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use alloy::primitives::{address, Address, U256};
use async_trait::async_trait;

use super::rpc::{PoolImmutables, PoolRpc, Reserves, Slot0, TokenMetadata};
use crate::error::ObserverError;

pub(crate) const POOL: Address = address!("bb2b8038a1640196fbe3e38816f3e67cba72d940");
pub(crate) const TOKEN0: Address = address!("2260fac5e5542a773aa44fbcfedf7c193bc2c599");
pub(crate) const TOKEN1: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
pub(crate) const QUOTER: Address = address!("b27308f9f90d607463bb33ea1bebb41c27ce5ab6");

/// Serves fixed pool state. Every `block_number` call advances the head by `block_step`.
pub(crate) struct FakeRpc {
    pub head: AtomicU64,
    pub block_step: u64,
    pub reserves: Mutex<Reserves>,
    pub liquidity: u128,
    pub slot0: Slot0,
    pub amount_out: U256,
    /// Name and error message of the read that fails, if any.
    pub failing: Mutex<Option<(&'static str, &'static str)>>,
    /// Name of the read that never answers, if any.
    pub hanging: Mutex<Option<&'static str>>,
    /// Block argument of every state read.
    pub read_blocks: Mutex<Vec<Option<u64>>>,
    pub calls: AtomicUsize,
}

impl FakeRpc {
    pub fn new(head: u64) -> Self {
        Self {
            head: AtomicU64::new(head),
            block_step: 0,
            reserves: Mutex::new(Reserves {
                reserve0: U256::from(10u64),
                reserve1: U256::from(150u64),
            }),
            liquidity: 1_000_000,
            slot0: Slot0 {
                sqrt_price_x96: U256::from(1u64) << 97usize,
                tick: 13_863,
            },
            amount_out: U256::from(4_000u64),
            failing: Mutex::new(None),
            hanging: Mutex::new(None),
            read_blocks: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_block_step(mut self, step: u64) -> Self {
        self.block_step = step;
        self
    }

    pub fn fail(&self, call: &'static str) {
        *self.failing.lock().unwrap() = Some((call, "execution reverted"));
    }

    pub fn rate_limit(&self, call: &'static str) {
        *self.failing.lock().unwrap() = Some((call, "HTTP error 429: Too Many Requests"));
    }

    pub fn hang(&self, call: &'static str) {
        *self.hanging.lock().unwrap() = Some(call);
    }

    pub fn set_reserves(&self, reserve0: u64, reserve1: u64) {
        *self.reserves.lock().unwrap() = Reserves {
            reserve0: U256::from(reserve0),
            reserve1: U256::from(reserve1),
        };
    }

    async fn check(&self, call: &'static str) -> Result<(), ObserverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let hangs = *self.hanging.lock().unwrap() == Some(call);
        if hangs {
            std::future::pending::<()>().await;
        }
        let failure = *self.failing.lock().unwrap();
        match failure {
            Some((failing, message)) if failing == call => Err(ObserverError::read(call, message)),
            _ => Ok(()),
        }
    }

    fn record(&self, block: Option<u64>) {
        self.read_blocks.lock().unwrap().push(block);
    }
}

#[async_trait]
impl PoolRpc for FakeRpc {
    async fn block_number(&self) -> Result<u64, ObserverError> {
        self.check("eth_blockNumber").await?;
        Ok(self.head.fetch_add(self.block_step, Ordering::SeqCst))
    }

    async fn pair_tokens(&self, _pool: Address) -> Result<(Address, Address), ObserverError> {
        self.check("token0").await?;
        Ok((TOKEN0, TOKEN1))
    }

    async fn pool_immutables(&self, _pool: Address) -> Result<PoolImmutables, ObserverError> {
        self.check("fee").await?;
        Ok(PoolImmutables {
            factory: Address::ZERO,
            token0: TOKEN0,
            token1: TOKEN1,
            fee: 500,
            tick_spacing: 10,
        })
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, ObserverError> {
        self.check("symbol").await?;
        let (symbol, decimals) = if token == TOKEN0 {
            ("WBTC", 8)
        } else {
            ("WETH", 18)
        };
        Ok(TokenMetadata {
            symbol: Some(symbol.to_string()),
            decimals: Some(decimals),
        })
    }

    async fn reserves(&self, _pool: Address, block: Option<u64>) -> Result<Reserves, ObserverError> {
        self.check("getReserves").await?;
        self.record(block);
        Ok(*self.reserves.lock().unwrap())
    }

    async fn liquidity(&self, _pool: Address, block: Option<u64>) -> Result<u128, ObserverError> {
        self.check("liquidity").await?;
        self.record(block);
        Ok(self.liquidity)
    }

    async fn slot0(&self, _pool: Address, block: Option<u64>) -> Result<Slot0, ObserverError> {
        self.check("slot0").await?;
        self.record(block);
        Ok(self.slot0)
    }

    async fn quote_exact_input_single(
        &self,
        _quoter: Address,
        _token_in: Address,
        _token_out: Address,
        _fee: u32,
        _amount_in: U256,
        block: Option<u64>,
    ) -> Result<U256, ObserverError> {
        self.check("quoteExactInputSingle").await?;
        self.record(block);
        Ok(self.amount_out)
    }
}
