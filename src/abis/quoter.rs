use alloy::sol;

sol! {
    /// Uniswap V3 QuoterV1. Not a view function on-chain, but safe to `eth_call`.
    #[sol(rpc)]
    interface IQuoter {
        function quoteExactInputSingle(address tokenIn, address tokenOut, uint24 fee, uint256 amountIn, uint160 sqrtPriceLimitX96) external returns (uint256 amountOut);
    }
}
