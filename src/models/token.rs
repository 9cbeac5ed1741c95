use serde::{Deserialize, Serialize};

use super::FeeTier;

/// Pool contract family. Decides which reads make up a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Constant-product pair (`getReserves`, `Sync`).
    V2,
    /// Concentrated liquidity pool (`liquidity` + `slot0`, `Swap`).
    V3,
    /// Pre-aggregated by a subgraph.
    Indexed,
}

/// One side of a pool.
///
/// `symbol` and `decimals` are display metadata. On-chain values are base-unit integers
/// and are priced without them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Address or subgraph entity id.
    pub id: String,
    pub symbol: String,
    pub decimals: Option<u8>,
}

impl TokenInfo {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, decimals: Option<u8>) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            decimals,
        }
    }

    /// Replace fetched metadata with configured display values, where present.
    pub fn with_display(mut self, display: &TokenDisplay) -> Self {
        if let Some(symbol) = &display.symbol {
            self.symbol = symbol.clone();
        }
        if display.decimals.is_some() {
            self.decimals = display.decimals;
        }
        self
    }
}

/// Configured display values that replace fetched token metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenDisplay {
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
}

/// Pool-lifetime constants, loaded once when an observer connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolDescriptor {
    pub pool_id: String,
    pub protocol: Protocol,
    pub token0: TokenInfo,
    pub token1: TokenInfo,
    pub fee: FeeTier,
    pub tick_spacing: Option<i32>,
}

impl PoolDescriptor {
    /// `SYM0/SYM1`, used in log lines.
    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.token0.symbol, self.token1.symbol)
    }

    /// Both token decimals, when both are known.
    pub fn decimals(&self) -> Option<(u8, u8)> {
        Some((self.token0.decimals?, self.token1.decimals?))
    }
}
