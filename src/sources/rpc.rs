//! The narrow JSON-RPC surface the on-chain sources need, and its alloy implementation.

use std::future::Future;
use std::time::Duration;

use alloy::eips::BlockId;
use alloy::primitives::aliases::{U160, U24};
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use async_trait::async_trait;
use num_bigint::BigInt;
use url::Url;

use crate::abis::{IQuoter, IUniswapV2Pair, IUniswapV3Pool, IERC20};
use crate::error::ObserverError;
use crate::models::{FeeTier, PoolDescriptor, PoolState, Protocol, TokenDisplay, TokenInfo};
use crate::utils::{hex_encode, u256_to_bigint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reserves {
    pub reserve0: U256,
    pub reserve1: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot0 {
    pub sqrt_price_x96: U256,
    pub tick: i32,
}

/// V3 pool getters that never change after deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolImmutables {
    pub factory: Address,
    pub token0: Address,
    pub token1: Address,
    /// Hundredths of a basis point.
    pub fee: u32,
    pub tick_spacing: i32,
}

/// ERC-20 display metadata. Either field may be missing on non-standard tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

/// Read-only contract calls against one chain.
///
/// `block: None` reads the latest state; `Some(n)` pins the call to block `n`.
#[async_trait]
pub trait PoolRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64, ObserverError>;

    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address), ObserverError>;

    async fn pool_immutables(&self, pool: Address) -> Result<PoolImmutables, ObserverError>;

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, ObserverError>;

    async fn reserves(&self, pool: Address, block: Option<u64>) -> Result<Reserves, ObserverError>;

    async fn liquidity(&self, pool: Address, block: Option<u64>) -> Result<u128, ObserverError>;

    async fn slot0(&self, pool: Address, block: Option<u64>) -> Result<Slot0, ObserverError>;

    async fn quote_exact_input_single(
        &self,
        quoter: Address,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: U256,
        block: Option<u64>,
    ) -> Result<U256, ObserverError>;
}

/// [`PoolRpc`] backed by an alloy provider (HTTP or WebSocket).
#[derive(Clone)]
pub struct AlloyRpc {
    provider: DynProvider,
}

impl AlloyRpc {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }

    /// HTTP provider. Building it does not touch the network.
    pub fn http(rpc_url: &str) -> Result<Self, ObserverError> {
        let url = Url::parse(rpc_url)
            .map_err(|e| ObserverError::Config(format!("invalid RPC URL {rpc_url}: {e}")))?;

        let client = ProviderBuilder::new().connect_http(url);

        Ok(Self::new(DynProvider::new(client)))
    }

    /// WebSocket provider. Performs the handshake.
    pub async fn ws(ws_url: &str) -> Result<Self, ObserverError> {
        let client = ProviderBuilder::new()
            .connect_ws(WsConnect::new(ws_url))
            .await
            .map_err(|e| ObserverError::connection(format!("websocket {ws_url}"), e))?;

        Ok(Self::new(DynProvider::new(client)))
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }
}

fn block_id(block: Option<u64>) -> BlockId {
    block.map(BlockId::number).unwrap_or_else(BlockId::latest)
}

#[async_trait]
impl PoolRpc for AlloyRpc {
    async fn block_number(&self) -> Result<u64, ObserverError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ObserverError::read("eth_blockNumber", e))
    }

    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address), ObserverError> {
        let pair = IUniswapV2Pair::new(pool, &self.provider);
        let token0 = pair.token0();
        let token1 = pair.token1();

        tokio::try_join!(
            async { token0.call().await.map_err(|e| ObserverError::read("token0", e)) },
            async { token1.call().await.map_err(|e| ObserverError::read("token1", e)) },
        )
    }

    async fn pool_immutables(&self, pool: Address) -> Result<PoolImmutables, ObserverError> {
        let contract = IUniswapV3Pool::new(pool, &self.provider);
        let factory = contract.factory();
        let token0 = contract.token0();
        let token1 = contract.token1();
        let fee = contract.fee();
        let tick_spacing = contract.tickSpacing();

        let (factory, token0, token1, fee, tick_spacing) = tokio::try_join!(
            async { factory.call().await.map_err(|e| ObserverError::read("factory", e)) },
            async { token0.call().await.map_err(|e| ObserverError::read("token0", e)) },
            async { token1.call().await.map_err(|e| ObserverError::read("token1", e)) },
            async { fee.call().await.map_err(|e| ObserverError::read("fee", e)) },
            async {
                tick_spacing
                    .call()
                    .await
                    .map_err(|e| ObserverError::read("tickSpacing", e))
            },
        )?;

        Ok(PoolImmutables {
            factory,
            token0,
            token1,
            fee: fee.to::<u32>(),
            tick_spacing: tick_spacing.as_i32(),
        })
    }

    async fn token_metadata(&self, token: Address) -> Result<TokenMetadata, ObserverError> {
        let contract = IERC20::new(token, &self.provider);
        let symbol = contract.symbol();
        let decimals = contract.decimals();

        // Both are optional: some tokens return bytes32 symbols or omit decimals.
        let (symbol, decimals) = tokio::join!(symbol.call(), decimals.call());

        Ok(TokenMetadata {
            symbol: symbol.ok().filter(|s| !s.is_empty()),
            decimals: decimals.ok(),
        })
    }

    async fn reserves(&self, pool: Address, block: Option<u64>) -> Result<Reserves, ObserverError> {
        let pair = IUniswapV2Pair::new(pool, &self.provider);
        let reserves = pair
            .getReserves()
            .block(block_id(block))
            .call()
            .await
            .map_err(|e| ObserverError::read("getReserves", e))?;

        Ok(Reserves {
            reserve0: U256::from(reserves.reserve0),
            reserve1: U256::from(reserves.reserve1),
        })
    }

    async fn liquidity(&self, pool: Address, block: Option<u64>) -> Result<u128, ObserverError> {
        IUniswapV3Pool::new(pool, &self.provider)
            .liquidity()
            .block(block_id(block))
            .call()
            .await
            .map_err(|e| ObserverError::read("liquidity", e))
    }

    async fn slot0(&self, pool: Address, block: Option<u64>) -> Result<Slot0, ObserverError> {
        let slot = IUniswapV3Pool::new(pool, &self.provider)
            .slot0()
            .block(block_id(block))
            .call()
            .await
            .map_err(|e| ObserverError::read("slot0", e))?;

        Ok(Slot0 {
            sqrt_price_x96: U256::from(slot.sqrtPriceX96),
            tick: slot.tick.as_i32(),
        })
    }

    async fn quote_exact_input_single(
        &self,
        quoter: Address,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: U256,
        block: Option<u64>,
    ) -> Result<U256, ObserverError> {
        IQuoter::new(quoter, &self.provider)
            .quoteExactInputSingle(
                token_in,
                token_out,
                U24::saturating_from(fee),
                amount_in,
                U160::ZERO,
            )
            .block(block_id(block))
            .call()
            .await
            .map_err(|e| ObserverError::read("quoteExactInputSingle", e))
    }
}

// ============================================
// Shared read helpers
// ============================================

/// Bound a single read so a hung endpoint fails the tick instead of stalling it.
pub(crate) async fn timed<T, F>(timeout: Duration, call: &str, read: F) -> Result<T, ObserverError>
where
    F: Future<Output = Result<T, ObserverError>>,
{
    tokio::time::timeout(timeout, read)
        .await
        .map_err(|_| ObserverError::Timeout {
            call: call.to_string(),
            after: timeout,
        })?
}

/// Load the pool's constants and token metadata, reading independent values concurrently.
pub(crate) async fn load_descriptor(
    rpc: &dyn PoolRpc,
    pool: Address,
    protocol: Protocol,
    timeout: Duration,
    display: &[TokenDisplay; 2],
) -> Result<PoolDescriptor, ObserverError> {
    let (token0, token1, fee, tick_spacing) = match protocol {
        Protocol::V2 => {
            let (token0, token1) = timed(timeout, "token0/token1", rpc.pair_tokens(pool)).await?;
            (token0, token1, FeeTier::V2, None)
        },
        Protocol::V3 => {
            let immutables = timed(timeout, "immutables", rpc.pool_immutables(pool)).await?;
            log::debug!(
                "Pool {} deployed by factory {}",
                hex_encode(pool.as_slice()),
                hex_encode(immutables.factory.as_slice())
            );
            (
                immutables.token0,
                immutables.token1,
                FeeTier::from_hundredths_of_bip(immutables.fee),
                Some(immutables.tick_spacing),
            )
        },
        Protocol::Indexed => {
            return Err(ObserverError::Config(
                "indexed pools are read through an indexer source".to_string(),
            ))
        },
    };

    let (metadata0, metadata1) = tokio::try_join!(
        timed(timeout, "token0 metadata", rpc.token_metadata(token0)),
        timed(timeout, "token1 metadata", rpc.token_metadata(token1)),
    )?;

    Ok(PoolDescriptor {
        pool_id: hex_encode(pool.as_slice()),
        protocol,
        token0: token_info(token0, metadata0).with_display(&display[0]),
        token1: token_info(token1, metadata1).with_display(&display[1]),
        fee,
        tick_spacing,
    })
}

fn token_info(address: Address, metadata: TokenMetadata) -> TokenInfo {
    let id = hex_encode(address.as_slice());
    // Fall back to a shortened address so log lines stay readable.
    let symbol = metadata.symbol.unwrap_or_else(|| id[..8].to_string());
    TokenInfo::new(id, symbol, metadata.decimals)
}

/// Read the price-bearing state of a pool. Sub-reads run concurrently; any failure fails
/// the whole read.
pub(crate) async fn read_state(
    rpc: &dyn PoolRpc,
    pool: Address,
    protocol: Protocol,
    block: Option<u64>,
    timeout: Duration,
) -> Result<PoolState, ObserverError> {
    match protocol {
        Protocol::V2 => {
            let reserves = timed(timeout, "getReserves", rpc.reserves(pool, block)).await?;
            Ok(PoolState::ConstantProduct {
                reserve0: u256_to_bigint(reserves.reserve0),
                reserve1: u256_to_bigint(reserves.reserve1),
            })
        },
        Protocol::V3 => {
            let (liquidity, slot) = tokio::try_join!(
                timed(timeout, "liquidity", rpc.liquidity(pool, block)),
                timed(timeout, "slot0", rpc.slot0(pool, block)),
            )?;
            Ok(PoolState::Concentrated {
                liquidity: BigInt::from(liquidity),
                sqrt_price_x96: u256_to_bigint(slot.sqrt_price_x96),
                tick: slot.tick,
            })
        },
        Protocol::Indexed => Err(ObserverError::Config(
            "indexed pools are read through an indexer source".to_string(),
        )),
    }
}
