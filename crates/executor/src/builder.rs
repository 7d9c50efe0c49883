//! Typed contract calls for the registry and price-feed contracts

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use num_traits::ToPrimitive;
use rust_decimal::Decimal;

use oracle_core::{
    AggregatedPrice, ChainConfig, ExecutionError, ExecutionResult, TargetContract, TokenConfig,
};

sol! {
    interface IAggregatorRegistry {
        function addTokenPriceFeed(address token, uint256[] calldata prices) external;
        function getTokenPriceFeed(address token) external view returns (uint256[] memory prices);
    }

    interface IPriceFeed {
        function updatePrice(uint256 price) external;
    }
}

/// A contract function call ready for the chain collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub target: TargetContract,
    pub to: Address,
    pub selector: [u8; 4],
    /// Selector followed by ABI-encoded arguments
    pub data: Bytes,
    pub gas_limit: u64,
}

impl ContractCall {
    fn new<C: SolCall>(target: TargetContract, to: Address, call: &C, gas_limit: u64) -> Self {
        Self {
            target,
            to,
            selector: C::SELECTOR,
            data: Bytes::from(call.abi_encode()),
            gas_limit,
        }
    }

    /// Reject calls that could not have come from this builder
    pub fn validate(&self) -> ExecutionResult<()> {
        if self.to == Address::ZERO {
            return Err(ExecutionError::SubmitFailed(format!(
                "{} call has no contract address",
                self.target
            )));
        }
        if !self.data.starts_with(&self.selector) {
            return Err(ExecutionError::SubmitFailed(format!(
                "{} calldata does not start with selector 0x{}",
                self.target,
                alloy_primitives::hex::encode(self.selector)
            )));
        }
        Ok(())
    }
}

/// Scale a decimal price into on-chain fixed-point units, truncating
///
/// A positive price too small to survive truncation is rejected rather than
/// published as zero.
pub fn price_to_units(price: Decimal, decimals: u32) -> ExecutionResult<U256> {
    if price.is_sign_negative() {
        return Err(ExecutionError::InvalidPrice(format!("{price} is negative")));
    }

    let scale = Decimal::from(10u64.pow(decimals));
    let units = price
        .checked_mul(scale)
        .and_then(|scaled| scaled.trunc().to_u128())
        .ok_or_else(|| {
            ExecutionError::InvalidPrice(format!("{price} overflows at {decimals} decimals"))
        })?;

    if units == 0 && !price.is_zero() {
        return Err(ExecutionError::InvalidPrice(format!(
            "{price} truncates to zero at {decimals} decimals"
        )));
    }

    Ok(U256::from(units))
}

/// Inverse of [`price_to_units`]
pub fn units_to_price(units: U256, decimals: u32) -> ExecutionResult<Decimal> {
    let raw = u128::try_from(units)
        .ok()
        .and_then(|v| i128::try_from(v).ok())
        .ok_or_else(|| ExecutionError::InvalidPrice(format!("{units} does not fit a decimal")))?;

    Decimal::try_from_i128_with_scale(raw, decimals)
        .map_err(|e| ExecutionError::InvalidPrice(format!("{units}: {e}")))
}

/// Call builder
#[derive(Debug, Clone)]
pub struct CallBuilder {
    registry: Address,
    gas_limit: u64,
    price_decimals: u32,
}

impl CallBuilder {
    pub fn new(registry: Address, gas_limit: u64, price_decimals: u32) -> Self {
        Self {
            registry,
            gas_limit,
            price_decimals,
        }
    }

    pub fn from_config(chain: &ChainConfig) -> Self {
        Self::new(chain.registry, chain.gas_limit, chain.price_decimals)
    }

    /// Address a target contract resolves to for a token
    pub fn contract_for(&self, target: TargetContract, token: &TokenConfig) -> Address {
        match target {
            TargetContract::AggregatorRegistry => self.registry,
            TargetContract::PriceFeed => token.price_feed,
        }
    }

    /// Build the update call for one target
    pub fn build(
        &self,
        target: TargetContract,
        token: &TokenConfig,
        aggregated: &AggregatedPrice,
    ) -> ExecutionResult<ContractCall> {
        let to = self.contract_for(target, token);

        let call = match target {
            TargetContract::AggregatorRegistry => {
                let prices = aggregated
                    .prices
                    .iter()
                    .map(|p| price_to_units(*p, self.price_decimals))
                    .collect::<ExecutionResult<Vec<_>>>()?;

                ContractCall::new(
                    target,
                    to,
                    &IAggregatorRegistry::addTokenPriceFeedCall {
                        token: token.address,
                        prices,
                    },
                    self.gas_limit,
                )
            }
            TargetContract::PriceFeed => ContractCall::new(
                target,
                to,
                &IPriceFeed::updatePriceCall {
                    price: price_to_units(aggregated.price, self.price_decimals)?,
                },
                self.gas_limit,
            ),
        };

        call.validate()?;
        Ok(call)
    }

    /// Read-only `getTokenPriceFeed(token)` call
    pub fn registry_read(&self, token: &TokenConfig) -> ContractCall {
        ContractCall::new(
            TargetContract::AggregatorRegistry,
            self.registry,
            &IAggregatorRegistry::getTokenPriceFeedCall {
                token: token.address,
            },
            self.gas_limit,
        )
    }

    /// Decode `getTokenPriceFeed` return data into prices
    pub fn decode_registry_prices(&self, data: &[u8]) -> ExecutionResult<Vec<Decimal>> {
        let decoded = IAggregatorRegistry::getTokenPriceFeedCall::abi_decode_returns(data, true)
            .map_err(|e| ExecutionError::Rpc(format!("undecodable getTokenPriceFeed result: {e}")))?;

        decoded
            .prices
            .into_iter()
            .map(|units| units_to_price(units, self.price_decimals))
            .collect()
    }
}
