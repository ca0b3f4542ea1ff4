//! Contract interfaces and calldata encoding.
//!
//! Inline `sol!` declarations for the pool, the flash liquidator, and the
//! two read-side interfaces. The encode helpers produce the exact payloads
//! the pipeline simulates and later broadcasts.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    /// Aave-v3 pool surface.
    #[sol(rpc)]
    interface IPool {
        function liquidationCall(
            address collateralAsset,
            address debtAsset,
            address user,
            uint256 debtToCover,
            bool receiveAToken
        ) external;

        function getUserAccountData(address user)
            external
            view
            returns (
                uint256 totalCollateralBase,
                uint256 totalDebtBase,
                uint256 availableBorrowsBase,
                uint256 currentLiquidationThreshold,
                uint256 ltv,
                uint256 healthFactor
            );
    }

    /// Minimal ERC-20 read surface (aTokens and variable-debt tokens).
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
    }

    /// Protocol price oracle, 8-decimal USD prices.
    #[sol(rpc)]
    interface IPriceOracle {
        function getAssetPrice(address asset) external view returns (uint256);
    }

    /// Flash-loan liquidation host: borrows the debt asset, liquidates,
    /// swaps seized collateral via the embedded payload, repays, keeps the
    /// surplus.
    #[sol(rpc)]
    interface IFlashLiquidator {
        function execute(
            address borrower,
            address debtAsset,
            address collateralAsset,
            uint256 debtAmount,
            bytes calldata swapPayload
        ) external;
    }
}

/// Encode `Pool.liquidationCall` for the direct execution path.
pub fn encode_liquidation_call(
    collateral_asset: Address,
    debt_asset: Address,
    user: Address,
    debt_to_cover: U256,
    receive_a_token: bool,
) -> Bytes {
    IPool::liquidationCallCall {
        collateralAsset: collateral_asset,
        debtAsset: debt_asset,
        user,
        debtToCover: debt_to_cover,
        receiveAToken: receive_a_token,
    }
    .abi_encode()
    .into()
}

/// Encode `FlashLiquidator.execute` for the flash-loan path.
pub fn encode_flash_execute(
    borrower: Address,
    debt_asset: Address,
    collateral_asset: Address,
    debt_amount: U256,
    swap_payload: Bytes,
) -> Bytes {
    IFlashLiquidator::executeCall {
        borrower,
        debtAsset: debt_asset,
        collateralAsset: collateral_asset,
        debtAmount: debt_amount,
        swapPayload: swap_payload,
    }
    .abi_encode()
    .into()
}
