use alloy::sol;

sol! {
    /// Display metadata only; prices never depend on it.
    #[sol(rpc)]
    interface IERC20 {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }
}
