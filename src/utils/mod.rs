//! Numeric helpers shared by the sources and the observer.
//!
//! - [`conversion`] - U256/BigInt/BigDecimal conversions and hex encoding
//! - [`price`] - Price derivation (reserves, sqrtPriceX96, indexed prices)

mod conversion;
mod price;

// ============================================
// Re-exports
// ============================================

pub use conversion::{hex_encode, pow10, u256_to_bigint};

pub use price::{
    render_decimal, sqrt_price_x96_to_price, PriceCalculator, PricePair,
    DEFAULT_SIGNIFICANT_DIGITS, MAX_SIGNIFICANT_DIGITS,
};
