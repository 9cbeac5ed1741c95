pub mod erc20;
pub mod quoter;
pub mod v2;
pub mod v3;

pub use erc20::IERC20;
pub use quoter::IQuoter;
pub use v2::IUniswapV2Pair;
pub use v3::IUniswapV3Pool;
