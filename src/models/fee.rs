use std::fmt;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// Pool fee in hundredths of a basis point, as Uniswap encodes it (3000 = 0.30%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeTier(u32);

impl FeeTier {
    /// Every Uniswap V2 pair charges 0.30%.
    pub const V2: FeeTier = FeeTier(3000);

    pub const fn from_hundredths_of_bip(value: u32) -> Self {
        Self(value)
    }

    pub const fn hundredths_of_bip(&self) -> u32 {
        self.0
    }

    /// Fee as a percentage, exact (500 -> 0.05).
    pub fn as_percent(&self) -> BigDecimal {
        BigDecimal::new(self.0.into(), 4)
    }
}

impl fmt::Display for FeeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percent().with_scale(2).to_plain_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_fee_tier_percent() {
        assert_eq!(
            FeeTier::from_hundredths_of_bip(500).as_percent(),
            BigDecimal::from_str("0.05").unwrap()
        );
        assert_eq!(FeeTier::V2.to_string(), "0.30%");
        assert_eq!(FeeTier::from_hundredths_of_bip(10_000).to_string(), "1.00%");
    }
}
