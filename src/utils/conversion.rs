//! Conversions between on-chain integer types and arbitrary-precision numbers.

use alloy::primitives::{hex, U256};
use bigdecimal::BigDecimal;
use num_bigint::{BigInt, Sign};

/// Encode bytes as a lowercase hex string with 0x prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Convert alloy U256 to an unbounded integer without going through strings.
pub fn u256_to_bigint(value: U256) -> BigInt {
    let bytes: [u8; 32] = value.to_le_bytes();
    BigInt::from_bytes_le(Sign::Plus, &bytes)
}

/// `10^exp` as an exact decimal, for any sign of `exp`.
pub fn pow10(exp: i64) -> BigDecimal {
    BigDecimal::new(BigInt::from(1u8), -exp)
}
