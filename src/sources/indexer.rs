//! Subgraph (GraphQL) polling source.
//!
//! The subgraph publishes decimal-adjusted prices: `token1Price` is the price of token0
//! expressed in token1, `token0Price` the reverse. Only `token1Price` is taken; the reverse
//! direction is derived from it so both directions come from one number.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use log::{debug, info};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::SnapshotSource;
use crate::error::ObserverError;
use crate::models::{
    BlockRef, FeeTier, PoolDescriptor, PoolSnapshot, PoolState, Protocol, TokenDisplay, TokenInfo,
};

const QUERY_NAME: &str = "pool query";

const POOL_QUERY: &str = r#"
query Pool($id: ID!) {
  pool(id: $id) {
    id
    feeTier
    token0 { id symbol name decimals }
    token1 { id symbol name decimals }
    token0Price
    token1Price
    volumeUSD
    feesUSD
  }
  _meta {
    block { number timestamp }
  }
}
"#;

// ============================================
// Response shapes
// ============================================

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<PoolQueryData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PoolQueryData {
    pool: Option<PoolEntity>,
    #[serde(rename = "_meta")]
    meta: Option<MetaEntity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolEntity {
    id: String,
    fee_tier: String,
    token0: TokenEntity,
    token1: TokenEntity,
    token1_price: String,
    #[serde(rename = "volumeUSD")]
    volume_usd: Option<String>,
    #[serde(rename = "feesUSD")]
    fees_usd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenEntity {
    id: String,
    symbol: String,
    decimals: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetaEntity {
    block: MetaBlock,
}

#[derive(Debug, Deserialize)]
struct MetaBlock {
    number: u64,
    timestamp: Option<i64>,
}

// ============================================
// Source
// ============================================

/// Queries one pool from a Uniswap-style subgraph on every tick.
pub struct IndexerSource {
    client: Client,
    endpoint: Url,
    pool_id: String,
    read_timeout: Duration,
    display: [TokenDisplay; 2],
}

impl IndexerSource {
    pub fn new(endpoint: &str, pool_id: &str, read_timeout: Duration) -> Result<Self, ObserverError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ObserverError::Config(format!("invalid subgraph URL {endpoint}: {e}")))?;

        let client = Client::builder()
            .timeout(read_timeout)
            .build()
            .map_err(|e| ObserverError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            // Subgraph entity ids are lowercase hex.
            pool_id: pool_id.to_lowercase(),
            read_timeout,
            display: Default::default(),
        })
    }

    pub fn with_display(mut self, display: [TokenDisplay; 2]) -> Self {
        self.display = display;
        self
    }

    async fn query(&self) -> Result<PoolQueryData, ObserverError> {
        let body = json!({
            "query": POOL_QUERY,
            "variables": { "id": self.pool_id },
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ObserverError::RateLimited(format!(
                "{QUERY_NAME}: HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(ObserverError::read(QUERY_NAME, format!("HTTP {status}")));
        }

        let response: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;

        into_data(response)
    }

    fn transport_error(&self, err: reqwest::Error) -> ObserverError {
        if err.is_timeout() {
            return ObserverError::Timeout {
                call: QUERY_NAME.to_string(),
                after: self.read_timeout,
            };
        }
        if err.is_decode() {
            return ObserverError::Validation(format!("malformed subgraph response: {err}"));
        }
        ObserverError::read(QUERY_NAME, err)
    }
}

#[async_trait]
impl SnapshotSource for IndexerSource {
    async fn connect(&self) -> Result<PoolDescriptor, ObserverError> {
        let data = self.query().await?;
        let entity = data.pool.ok_or_else(|| {
            ObserverError::Config(format!("pool {} not found in subgraph", self.pool_id))
        })?;

        let descriptor = descriptor_from(&entity, &self.display)?;

        info!(
            "Querying {} {} (fee {}) from {}",
            descriptor.pair_label(),
            descriptor.pool_id,
            descriptor.fee,
            self.endpoint.host_str().unwrap_or("subgraph")
        );

        Ok(descriptor)
    }

    async fn fetch(&self, pool: &PoolDescriptor) -> Result<PoolSnapshot, ObserverError> {
        let data = self.query().await?;
        let snapshot = snapshot_from(pool, data)?;
        debug!(
            "Subgraph returned {} at block {:?}",
            pool.pool_id, snapshot.block.number
        );
        Ok(snapshot)
    }
}

// ============================================
// Parsing
// ============================================

fn into_data(response: GraphQlResponse) -> Result<PoolQueryData, ObserverError> {
    if !response.errors.is_empty() {
        let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
        return Err(ObserverError::read(QUERY_NAME, messages.join("; ")));
    }
    response
        .data
        .ok_or_else(|| ObserverError::Validation("subgraph response has no data".to_string()))
}

fn descriptor_from(
    entity: &PoolEntity,
    display: &[TokenDisplay; 2],
) -> Result<PoolDescriptor, ObserverError> {
    let fee = entity
        .fee_tier
        .parse::<u32>()
        .map_err(|e| ObserverError::Validation(format!("feeTier {}: {e}", entity.fee_tier)))?;

    Ok(PoolDescriptor {
        pool_id: entity.id.clone(),
        protocol: Protocol::Indexed,
        token0: token_from(&entity.token0)?.with_display(&display[0]),
        token1: token_from(&entity.token1)?.with_display(&display[1]),
        fee: FeeTier::from_hundredths_of_bip(fee),
        tick_spacing: None,
    })
}

fn token_from(entity: &TokenEntity) -> Result<TokenInfo, ObserverError> {
    let decimals = entity
        .decimals
        .as_deref()
        .map(|d| {
            d.parse::<u8>()
                .map_err(|e| ObserverError::Validation(format!("decimals {d}: {e}")))
        })
        .transpose()?;
    Ok(TokenInfo::new(&entity.id, &entity.symbol, decimals))
}

fn decimal(field: &str, value: &str) -> Result<BigDecimal, ObserverError> {
    BigDecimal::from_str(value)
        .map_err(|e| ObserverError::Validation(format!("{field} {value}: {e}")))
}

fn snapshot_from(pool: &PoolDescriptor, data: PoolQueryData) -> Result<PoolSnapshot, ObserverError> {
    let entity = data.pool.ok_or_else(|| {
        ObserverError::Validation(format!("pool {} missing from subgraph response", pool.pool_id))
    })?;

    let state = PoolState::Indexed {
        price0_in_1: decimal("token1Price", &entity.token1_price)?,
        volume_usd: entity
            .volume_usd
            .as_deref()
            .map(|v| decimal("volumeUSD", v))
            .transpose()?,
        fees_usd: entity
            .fees_usd
            .as_deref()
            .map(|v| decimal("feesUSD", v))
            .transpose()?,
    };

    let block = data
        .meta
        .map(|meta| BlockRef {
            number: Some(meta.block.number),
            timestamp: meta.block.timestamp,
            ..Default::default()
        })
        .unwrap_or_default();

    Ok(PoolSnapshot::new(pool, state, block))
}
