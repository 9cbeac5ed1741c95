//! Price derivation from a single pool snapshot.
//!
//! Both directions of a pair always come out of the same snapshot, so they cannot drift
//! apart. All arithmetic is decimal; reserves routinely exceed 2^53.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{One, Zero};
use once_cell::sync::Lazy;

use super::conversion::pow10;
use crate::error::ObserverError;
use crate::models::{PoolState, Quote};

// ============================================
// Constants
// ============================================

pub const DEFAULT_SIGNIFICANT_DIGITS: u64 = 50;

/// Division runs at bigdecimal's default precision of 100 digits; rounding beyond that
/// would print noise.
pub const MAX_SIGNIFICANT_DIGITS: u64 = 100;

/// 2^192, the scale of a squared Q64.96 value.
static Q192: Lazy<BigDecimal> = Lazy::new(|| BigDecimal::from(BigInt::from(1u8) << 192usize));

// ============================================
// sqrtPriceX96 to Price Conversion
// ============================================

/// Price of token0 in token1 (base units) from a Q64.96 square-root price:
/// `(sqrtPriceX96 / 2^96)^2`, computed as `sqrtPriceX96^2 / 2^192`.
pub fn sqrt_price_x96_to_price(sqrt_price_x96: &BigInt) -> BigDecimal {
    let squared = sqrt_price_x96 * sqrt_price_x96;
    BigDecimal::from(squared) / &*Q192
}

// ============================================
// Calculator
// ============================================

/// Both directions of a pool price.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePair {
    /// Price of token0 expressed in token1.
    pub price0_in_1: BigDecimal,
    /// Price of token1 expressed in token0.
    pub price1_in_0: BigDecimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceCalculator {
    significant_digits: u64,
}

impl Default for PriceCalculator {
    fn default() -> Self {
        Self {
            significant_digits: DEFAULT_SIGNIFICANT_DIGITS,
        }
    }
}

impl PriceCalculator {
    pub fn new(significant_digits: u64) -> Result<Self, ObserverError> {
        if significant_digits == 0 || significant_digits > MAX_SIGNIFICANT_DIGITS {
            return Err(ObserverError::Config(format!(
                "significant digits must be within 1..={MAX_SIGNIFICANT_DIGITS}, got {significant_digits}"
            )));
        }
        Ok(Self { significant_digits })
    }

    pub fn significant_digits(&self) -> u64 {
        self.significant_digits
    }

    /// Prices in base units, rounded to the configured significant digits.
    pub fn prices(&self, state: &PoolState) -> Result<PricePair, ObserverError> {
        let (price0_in_1, price1_in_0) = exact_pair(state)?;
        Ok(PricePair {
            price0_in_1: self.round(&price0_in_1),
            price1_in_0: self.round(&price1_in_0),
        })
    }

    /// Prices in whole-token units.
    ///
    /// On-chain states are shifted by the token decimals when both are known. Indexed
    /// prices are already whole-token prices and pass through.
    pub fn display_prices(
        &self,
        state: &PoolState,
        decimals: Option<(u8, u8)>,
    ) -> Result<PricePair, ObserverError> {
        let (mut price0_in_1, mut price1_in_0) = exact_pair(state)?;

        if let (Some(shift), false) = (decimal_shift(decimals), is_indexed(state)) {
            price0_in_1 = price0_in_1 * pow10(shift);
            price1_in_0 = price1_in_0 * pow10(-shift);
        }

        Ok(PricePair {
            price0_in_1: self.round(&price0_in_1),
            price1_in_0: self.round(&price1_in_0),
        })
    }

    /// `amount_out / amount_in` of a token0 -> token1 quote, adjusted like `price0_in_1`.
    pub fn execution_price(&self, quote: &Quote, decimals: Option<(u8, u8)>) -> Option<BigDecimal> {
        if quote.amount_in.is_zero() {
            return None;
        }
        let mut price =
            BigDecimal::from(quote.amount_out.clone()) / BigDecimal::from(quote.amount_in.clone());
        if let Some(shift) = decimal_shift(decimals) {
            price = price * pow10(shift);
        }
        Some(self.round(&price))
    }

    /// Shortfall of a quote against the mid price of the same state, `(mid - execution) / mid`.
    /// Decimal shifts cancel, so both sides stay in base units.
    pub fn price_impact(&self, state: &PoolState, quote: &Quote) -> Option<BigDecimal> {
        if quote.amount_in.is_zero() {
            return None;
        }
        let (mid, _) = exact_pair(state).ok()?;
        let execution =
            BigDecimal::from(quote.amount_out.clone()) / BigDecimal::from(quote.amount_in.clone());
        Some(self.round(&((&mid - execution) / &mid)))
    }

    fn round(&self, value: &BigDecimal) -> BigDecimal {
        value.with_prec(self.significant_digits)
    }
}

/// Plain decimal rendering without trailing zeros or exponent notation.
pub fn render_decimal(value: &BigDecimal) -> String {
    value.normalized().to_plain_string()
}

fn exact_pair(state: &PoolState) -> Result<(BigDecimal, BigDecimal), ObserverError> {
    match state {
        PoolState::ConstantProduct { reserve0, reserve1 } => {
            if reserve0.is_zero() || reserve1.is_zero() {
                return Err(ObserverError::Validation("zero reserve".to_string()));
            }
            let reserve0 = BigDecimal::from(reserve0.clone());
            let reserve1 = BigDecimal::from(reserve1.clone());
            Ok((&reserve1 / &reserve0, &reserve0 / &reserve1))
        },
        PoolState::Concentrated { sqrt_price_x96, .. } => {
            if sqrt_price_x96.is_zero() {
                return Err(ObserverError::Validation("zero sqrtPriceX96".to_string()));
            }
            let price = sqrt_price_x96_to_price(sqrt_price_x96);
            let squared = BigDecimal::from(sqrt_price_x96 * sqrt_price_x96);
            Ok((price, &*Q192 / squared))
        },
        PoolState::Indexed { price0_in_1, .. } => {
            if price0_in_1.is_zero() {
                return Err(ObserverError::Validation("zero indexed price".to_string()));
            }
            Ok((price0_in_1.clone(), BigDecimal::one() / price0_in_1))
        },
    }
}

fn decimal_shift(decimals: Option<(u8, u8)>) -> Option<i64> {
    decimals.map(|(decimals0, decimals1)| decimals0 as i64 - decimals1 as i64)
}

fn is_indexed(state: &PoolState) -> bool {
    matches!(state, PoolState::Indexed { .. })
}
