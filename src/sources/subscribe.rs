//! WebSocket log-subscription source.
//!
//! Every (re)subscription opens the log stream first, then reads a seed snapshot at the head
//! block, so an event landing between the two is never lost. Events older than or equal to
//! the seed are dropped downstream by the observer's ordering guard.

use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use log::{debug, info};
use num_bigint::BigInt;
use tokio::sync::Mutex;

use super::rpc::{load_descriptor, read_state, timed, AlloyRpc};
use super::{SnapshotStream, SnapshotSubscription};
use crate::abis::{IUniswapV2Pair, IUniswapV3Pool};
use crate::error::ObserverError;
use crate::models::{BlockRef, PoolDescriptor, PoolSnapshot, PoolState, Protocol, TokenDisplay};
use crate::utils::u256_to_bigint;

/// Streams `Sync` (V2) or `Swap` (V3) events of one pool.
pub struct RpcSubscribeSource {
    ws_url: String,
    pool: Address,
    protocol: Protocol,
    read_timeout: Duration,
    display: [TokenDisplay; 2],
    /// Connection opened by `connect`, handed to the first `subscribe`.
    pending: Mutex<Option<AlloyRpc>>,
}

impl RpcSubscribeSource {
    pub fn new(ws_url: String, pool: Address, protocol: Protocol, read_timeout: Duration) -> Self {
        Self {
            ws_url,
            pool,
            protocol,
            read_timeout,
            display: Default::default(),
            pending: Mutex::new(None),
        }
    }

    pub fn with_display(mut self, display: [TokenDisplay; 2]) -> Self {
        self.display = display;
        self
    }

    fn filter(&self) -> Result<Filter, ObserverError> {
        Ok(Filter::new()
            .address(self.pool)
            .event_signature(event_topic(self.protocol)?))
    }
}

fn event_topic(protocol: Protocol) -> Result<B256, ObserverError> {
    match protocol {
        Protocol::V2 => Ok(IUniswapV2Pair::Sync::SIGNATURE_HASH),
        Protocol::V3 => Ok(IUniswapV3Pool::Swap::SIGNATURE_HASH),
        Protocol::Indexed => Err(ObserverError::Config(
            "indexed pools cannot be subscribed to over RPC".to_string(),
        )),
    }
}

#[async_trait]
impl SnapshotSubscription for RpcSubscribeSource {
    async fn connect(&self) -> Result<PoolDescriptor, ObserverError> {
        event_topic(self.protocol)?;

        let rpc = AlloyRpc::ws(&self.ws_url).await?;
        let descriptor = load_descriptor(
            &rpc,
            self.pool,
            self.protocol,
            self.read_timeout,
            &self.display,
        )
        .await?;

        info!(
            "Subscribed source ready for {} {} (fee {})",
            descriptor.pair_label(),
            descriptor.pool_id,
            descriptor.fee
        );

        *self.pending.lock().await = Some(rpc);
        Ok(descriptor)
    }

    async fn subscribe(&self, pool: &PoolDescriptor) -> Result<SnapshotStream, ObserverError> {
        let rpc = match self.pending.lock().await.take() {
            Some(rpc) => rpc,
            None => AlloyRpc::ws(&self.ws_url).await?,
        };

        let subscription = rpc
            .provider()
            .subscribe_logs(&self.filter()?)
            .await
            .map_err(|e| ObserverError::connection("eth_subscribe logs", e))?;

        let head = timed(self.read_timeout, "eth_blockNumber", async {
            rpc.provider()
                .get_block_number()
                .await
                .map_err(|e| ObserverError::read("eth_blockNumber", e))
        })
        .await?;
        let state = read_state(&rpc, self.pool, self.protocol, Some(head), self.read_timeout).await?;
        let seed = PoolSnapshot::new(pool, state, BlockRef::at(head));

        debug!("Seeded {} at block {}", pool.pool_id, head);

        let descriptor = pool.clone();
        let protocol = self.protocol;
        let events = subscription.into_stream().map(move |log| {
            // The provider owns the socket; it must live as long as the stream.
            let _connection = &rpc;
            snapshot_from_log(&descriptor, protocol, &log)
        });

        Ok(stream::once(future::ready(Ok(seed))).chain(events).boxed())
    }
}

pub(crate) fn state_from_sync(event: &IUniswapV2Pair::Sync) -> PoolState {
    PoolState::ConstantProduct {
        reserve0: u256_to_bigint(U256::from(event.reserve0)),
        reserve1: u256_to_bigint(U256::from(event.reserve1)),
    }
}

pub(crate) fn state_from_swap(event: &IUniswapV3Pool::Swap) -> PoolState {
    PoolState::Concentrated {
        liquidity: BigInt::from(event.liquidity),
        sqrt_price_x96: u256_to_bigint(U256::from(event.sqrtPriceX96)),
        tick: event.tick.as_i32(),
    }
}

/// Turn one pool log into a snapshot positioned at its block and log index.
pub(crate) fn snapshot_from_log(
    pool: &PoolDescriptor,
    protocol: Protocol,
    log: &Log,
) -> Result<PoolSnapshot, ObserverError> {
    if log.removed {
        return Err(ObserverError::Validation(format!(
            "log {:?} of block {:?} was removed by a reorg",
            log.log_index, log.block_number
        )));
    }
    let Some(number) = log.block_number else {
        return Err(ObserverError::Validation("log has no block number".to_string()));
    };

    let state = match protocol {
        Protocol::V2 => IUniswapV2Pair::Sync::decode_log(&log.inner)
            .map(|decoded| state_from_sync(&decoded.data))
            .map_err(|e| ObserverError::Validation(format!("undecodable Sync log: {e}")))?,
        Protocol::V3 => IUniswapV3Pool::Swap::decode_log(&log.inner)
            .map(|decoded| state_from_swap(&decoded.data))
            .map_err(|e| ObserverError::Validation(format!("undecodable Swap log: {e}")))?,
        Protocol::Indexed => {
            return Err(ObserverError::Config(
                "indexed pools cannot be subscribed to over RPC".to_string(),
            ))
        },
    };

    let block = BlockRef {
        number: Some(number),
        first_number: None,
        log_index: log.log_index,
        timestamp: log.block_timestamp.map(|t| t as i64),
    };

    Ok(PoolSnapshot::new(pool, state, block))
}
